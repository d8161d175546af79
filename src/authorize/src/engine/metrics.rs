//! Prometheus metrics for authorization checks

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::storage::CacheStats;

const MAX_SAMPLES: usize = 10_000;

/// Check counters and latency percentiles
#[derive(Debug, Clone, Default)]
pub struct CheckMetrics {
    pub total_checks: u64,
    pub allowed: u64,
    pub denied: u64,

    /// Denials caused by a rejected session (subset of `denied`)
    pub invalid_sessions: u64,

    /// Checks that failed with an error
    pub errors: u64,

    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,
    pub avg_latency_ms: f64,
}

impl CheckMetrics {
    /// Calculate allow rate
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed + self.denied;
        if total == 0 {
            0.0
        } else {
            self.allowed as f64 / total as f64
        }
    }
}

/// Metrics collector with Prometheus text export
pub struct MetricsCollector {
    metrics: Arc<RwLock<CheckMetrics>>,

    /// Latency samples for percentile calculation
    latency_samples: Arc<RwLock<Vec<f64>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(CheckMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(1_024))),
        }
    }

    /// Record a completed check
    pub async fn record_decision(&self, allowed: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.total_checks += 1;

        if allowed {
            metrics.allowed += 1;
        } else {
            metrics.denied += 1;
        }
    }

    /// Record the fixed denial for a rejected session
    pub async fn record_invalid_session(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.total_checks += 1;
        metrics.denied += 1;
        metrics.invalid_sessions += 1;
    }

    /// Record a failed check
    pub async fn record_error(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.total_checks += 1;
        metrics.errors += 1;
    }

    /// Record check latency
    pub async fn record_latency(&self, latency: Duration) {
        let mut samples = self.latency_samples.write().await;
        samples.push(latency.as_secs_f64() * 1000.0);
        if samples.len() > MAX_SAMPLES {
            samples.drain(0..1_000);
        }
    }

    /// Get current metrics snapshot; latency figures are computed from the
    /// samples held at the time of the call
    pub async fn get_metrics(&self) -> CheckMetrics {
        let mut metrics = self.metrics.read().await.clone();

        let mut sorted = self.latency_samples.read().await.clone();
        if !sorted.is_empty() {
            sorted.sort_by(f64::total_cmp);
            metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
            metrics.latency_p50_ms = percentile(&sorted, 0.50);
            metrics.latency_p90_ms = percentile(&sorted, 0.90);
            metrics.latency_p99_ms = percentile(&sorted, 0.99);
        }
        metrics
    }

    /// Reset all metrics
    pub async fn reset(&self) {
        *self.metrics.write().await = CheckMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Export metrics, plus record-cache statistics, in Prometheus format
    pub async fn export_prometheus(&self, cache: &CacheStats) -> String {
        let metrics = self.get_metrics().await;

        format!(
            r#"# HELP authorize_checks_total Total number of authorization checks
# TYPE authorize_checks_total counter
authorize_checks_total {}

# HELP authorize_allowed_total Number of allowed checks
# TYPE authorize_allowed_total counter
authorize_allowed_total {}

# HELP authorize_denied_total Number of denied checks
# TYPE authorize_denied_total counter
authorize_denied_total {}

# HELP authorize_invalid_sessions_total Checks denied because of an invalid session
# TYPE authorize_invalid_sessions_total counter
authorize_invalid_sessions_total {}

# HELP authorize_errors_total Checks that failed with an error
# TYPE authorize_errors_total counter
authorize_errors_total {}

# HELP authorize_check_latency_seconds Check latency percentiles
# TYPE authorize_check_latency_seconds summary
authorize_check_latency_seconds{{quantile="0.5"}} {}
authorize_check_latency_seconds{{quantile="0.9"}} {}
authorize_check_latency_seconds{{quantile="0.99"}} {}

# HELP authorize_record_cache_hits_total Record cache hits
# TYPE authorize_record_cache_hits_total counter
authorize_record_cache_hits_total {}

# HELP authorize_record_cache_misses_total Record cache misses
# TYPE authorize_record_cache_misses_total counter
authorize_record_cache_misses_total {}

# HELP authorize_record_cache_entries Records currently cached
# TYPE authorize_record_cache_entries gauge
authorize_record_cache_entries {}
"#,
            metrics.total_checks,
            metrics.allowed,
            metrics.denied,
            metrics.invalid_sessions,
            metrics.errors,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
            cache.hits,
            cache.misses,
            cache.entries,
        )
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentile of sorted samples
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64 * p).ceil() as usize).clamp(1, sorted.len()) - 1;
    sorted[index]
}
