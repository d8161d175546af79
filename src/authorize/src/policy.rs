//! Route policies and route matching

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::config::Options;

/// Access policy bound to a proxied route
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Optional human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Source URL the route matches (e.g., "https://app.example.com")
    pub from: String,

    /// Upstream URLs
    #[serde(default)]
    pub to: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    /// Attach evaluation traces to denied responses
    #[serde(default)]
    pub show_error_details: bool,
}

impl Policy {
    /// Create a policy for a source URL
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Default::default()
        }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to.push(to.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_show_error_details(mut self, show: bool) -> Self {
        self.show_error_details = show;
        self
    }

    /// Route identifier, derived deterministically from the routing fields.
    ///
    /// The proxy configuration embeds the same value in each route's
    /// authorization context extensions.
    pub fn route_id(&self) -> u64 {
        let mut hasher = Hasher::new();

        write_field(&mut hasher, Some(&self.from));
        write_field(&mut hasher, self.prefix.as_deref());
        write_field(&mut hasher, self.path.as_deref());
        write_field(&mut hasher, self.regex.as_deref());
        hasher.update(&(self.to.len() as u64).to_le_bytes());
        for to in &self.to {
            write_field(&mut hasher, Some(to));
        }

        let digest = hasher.finalize();
        let mut id = [0u8; 8];
        id.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(id)
    }
}

fn write_field(hasher: &mut Hasher, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update(&[1]);
            hasher.update(&(v.len() as u64).to_le_bytes());
            hasher.update(v.as_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

/// First configured policy whose route id equals `route_id`.
///
/// Colliding route ids resolve to whichever policy iteration reaches first.
pub fn find_matching_policy(options: &Options, route_id: u64) -> Option<&Policy> {
    options.all_policies().find(|p| p.route_id() == route_id)
}
