//! Service configuration loading and validation
//!
//! [`AuthorizeConfig`] is the on-disk TOML file. The check pipeline only
//! sees [`Config`], an immutable snapshot of the options that matter to a
//! single check.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::policy::Policy;
use crate::storage::CacheConfig;

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizeConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_check_timeout")]
    pub check_timeout_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            check_timeout_ms: default_check_timeout(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

/// Options consulted while checking a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Options {
    #[serde(default)]
    pub policies: Vec<Policy>,

    /// Policies contributed by other configuration sources, matched after
    /// `policies`
    #[serde(default)]
    pub additional_policies: Vec<Policy>,

    #[serde(default)]
    pub runtime_flags: RuntimeFlags,
}

impl Options {
    /// Every policy in matching order
    pub fn all_policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter().chain(self.additional_policies.iter())
    }
}

/// Feature switches that alter request translation
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuntimeFlags {
    /// Ignore the incoming port when normalising the request host
    #[serde(default)]
    pub match_any_incoming_port: bool,
}

/// Immutable configuration snapshot read once per check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub options: Options,
}

impl Config {
    pub fn new(options: Options) -> Self {
        Self { options }
    }
}

fn default_listen_addr() -> String { "127.0.0.1:5443".to_string() }
fn default_check_timeout() -> u64 { 10_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_cache_capacity() -> usize { 10_000 }
fn default_cache_ttl() -> u64 { 60 }

impl AuthorizeConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse configuration file")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.capacity == 0 {
            anyhow::bail!("Cache capacity must be greater than zero");
        }

        if self.cache.ttl_secs == 0 {
            anyhow::bail!("Cache TTL must be greater than zero");
        }

        if self.server.check_timeout_ms == 0 {
            anyhow::bail!("Check timeout must be greater than zero");
        }

        for (i, policy) in self.options.all_policies().enumerate() {
            if policy.from.trim().is_empty() {
                anyhow::bail!("Policy {} has an empty 'from' URL", i);
            }
        }

        Ok(())
    }

    /// Snapshot of the options used by the check pipeline
    pub fn snapshot(&self) -> Config {
        Config::new(self.options.clone())
    }

    /// Record cache settings
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.cache.capacity,
            ttl: Duration::from_secs(self.cache.ttl_secs),
        }
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.server.check_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
listen_addr = "0.0.0.0:9000"
check_timeout_ms = 2500
json_logs = true

[cache]
capacity = 500

[options.runtime_flags]
match_any_incoming_port = true

[[options.policies]]
from = "https://app.example.com"
to = ["http://app.internal:8080"]
show_error_details = true

[[options.additional_policies]]
from = "https://admin.example.com"
prefix = "/admin"
"#;

    #[test]
    fn test_parse_sample() {
        let config = AuthorizeConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(config.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.check_timeout(), Duration::from_millis(2500));
        assert!(config.server.json_logs);
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.cache.capacity, 500);
        assert_eq!(config.cache.ttl_secs, 60);
        assert!(config.options.runtime_flags.match_any_incoming_port);
        assert_eq!(config.options.all_policies().count(), 2);
        assert!(config.options.policies[0].show_error_details);

        config.validate().unwrap();
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AuthorizeConfig::from_toml("").unwrap();

        assert_eq!(config.server.check_timeout_ms, 10_000);
        assert_eq!(config.cache_config().capacity, 10_000);
        assert_eq!(config.cache_config().ttl, Duration::from_secs(60));
        assert!(config.snapshot().options.policies.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AuthorizeConfig::default();
        config.cache.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AuthorizeConfig::default();
        config.server.check_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AuthorizeConfig::default();
        config.options.additional_policies.push(Policy::new(" "));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AuthorizeConfig::load(file.path()).unwrap();
        assert_eq!(config.cache.capacity, 500);

        assert!(AuthorizeConfig::load("/nonexistent/authorize.toml").is_err());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = AuthorizeConfig::from_toml("[cache]\ncapacity = \"lots\"").unwrap_err();
        assert!(err.to_string().contains("parse"));
    }
}
