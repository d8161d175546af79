//! Audit trail of authorization checks
//!
//! Every check that got past request translation produces one
//! [`AuditEntry`]. Entries are emitted as structured `tracing` events under
//! the `authorize::audit` target and kept in a bounded in-memory ring for
//! inspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use crate::evaluator::EvaluationResult;
use crate::http::RequestHttp;
use crate::policy::Policy;
use crate::resolver::ResolvedIdentity;

const DEFAULT_CAPACITY: usize = 10_000;

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID
    pub id: String,

    pub request_id: String,

    pub method: String,
    pub url: String,
    pub ip: String,

    pub route_id: u64,

    /// `from` of the matched policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,

    /// "session", "service_account" or "none"
    pub identity_kind: String,

    /// Session or service account id; empty when anonymous
    pub principal_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    pub allowed: bool,

    /// HTTP status of the denial
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(default)]
    pub reasons: Vec<String>,

    /// Error kind when the check failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Start an entry for a translated request
    pub fn new(request_id: impl Into<String>, http: &RequestHttp, route_id: u64, policy: Option<&Policy>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            method: http.method.clone(),
            url: http.url.to_string(),
            ip: http.ip.clone(),
            route_id,
            policy: policy.map(|p| p.from.clone()),
            identity_kind: "none".to_string(),
            principal_id: String::new(),
            user_id: None,
            email: None,
            allowed: false,
            status: None,
            reasons: Vec::new(),
            error: None,
            latency_ms: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_identity(mut self, resolved: &ResolvedIdentity) -> Self {
        self.identity_kind = resolved.identity.kind().to_string();
        self.principal_id = resolved.identity.id().to_string();
        self.user_id = resolved.identity.user_id().map(str::to_string);
        if let Some(user) = &resolved.user {
            self.email = Some(user.email.clone()).filter(|e| !e.is_empty());
        }
        self
    }

    pub fn with_result(mut self, result: &EvaluationResult) -> Self {
        self.allowed = result.is_allowed();
        if let Some(denial) = result.denial() {
            self.status = Some(denial.status);
            self.reasons = denial.reasons.clone();
        }
        self
    }

    /// Record the fixed invalid-session denial
    pub fn with_denial_status(mut self, status: u16) -> Self {
        self.allowed = false;
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, kind: &str) -> Self {
        self.allowed = false;
        self.error = Some(kind.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }
}

/// Audit logger with a bounded in-memory buffer
pub struct AuditLogger {
    buffer: Arc<RwLock<VecDeque<AuditEntry>>>,
    capacity: usize,
}

impl AuditLogger {
    /// Create a new audit logger
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)))),
            capacity: capacity.max(1),
        }
    }

    /// Emit and retain an entry
    pub async fn log_check(&self, entry: AuditEntry) {
        info!(
            target: "authorize::audit",
            request_id = %entry.request_id,
            method = %entry.method,
            url = %entry.url,
            ip = %entry.ip,
            route_id = entry.route_id,
            policy = entry.policy.as_deref().unwrap_or(""),
            identity = %entry.identity_kind,
            principal_id = %entry.principal_id,
            user_id = entry.user_id.as_deref().unwrap_or(""),
            email = entry.email.as_deref().unwrap_or(""),
            allow = entry.allowed,
            status = entry.status.unwrap_or(0),
            error = entry.error.as_deref().unwrap_or(""),
            latency_ms = entry.latency_ms,
            "authorize check"
        );

        let mut buffer = self.buffer.write().await;
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }

    /// Most recent entries for a session or service account, newest first
    pub async fn query_by_principal(&self, principal_id: &str, limit: usize) -> Vec<AuditEntry> {
        let buffer = self.buffer.read().await;

        buffer
            .iter()
            .rev()
            .filter(|e| e.principal_id == principal_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent entries, newest first
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let buffer = self.buffer.read().await;
        buffer.iter().rev().take(limit).cloned().collect()
    }

    /// Get audit statistics
    pub async fn get_stats(&self) -> AuditStats {
        let buffer = self.buffer.read().await;
        let total = buffer.len();
        let avg_latency = if total > 0 {
            buffer.iter().map(|e| e.latency_ms).sum::<u64>() as f64 / total as f64
        } else {
            0.0
        };

        AuditStats {
            total_checks: total,
            allowed_checks: buffer.iter().filter(|e| e.allowed).count(),
            denied_checks: buffer.iter().filter(|e| !e.allowed && e.error.is_none()).count(),
            failed_checks: buffer.iter().filter(|e| e.error.is_some()).count(),
            avg_latency_ms: avg_latency,
        }
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Audit statistics
#[derive(Debug, Clone, Default)]
pub struct AuditStats {
    pub total_checks: usize,
    pub allowed_checks: usize,
    pub denied_checks: usize,
    pub failed_checks: usize,
    pub avg_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_cert::ClientCertificateInfo;
    use crate::evaluator::Denial;
    use crate::http::RequestUrl;
    use crate::session::{Identity, Session, User};
    use std::collections::BTreeMap;

    fn http() -> RequestHttp {
        RequestHttp::new(
            "GET",
            RequestUrl {
                scheme: "https".into(),
                host: "app.example.com".into(),
                raw_path: "/".into(),
                path: "/".into(),
                raw_query: String::new(),
            },
            BTreeMap::new(),
            ClientCertificateInfo::default(),
            "10.0.0.1",
        )
    }

    fn session_identity(id: &str) -> ResolvedIdentity {
        ResolvedIdentity {
            identity: Identity::Session(Session::new(id, "u1")),
            user: Some(User {
                id: "u1".into(),
                email: "alice@example.com".into(),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_entry_builder() {
        let entry = AuditEntry::new("req-1", &http(), 7, None)
            .with_identity(&session_identity("s1"))
            .with_result(&EvaluationResult::deny(Denial::new(401).with_reason("login")))
            .with_latency(Duration::from_millis(3));

        assert_eq!(entry.url, "https://app.example.com/");
        assert_eq!(entry.principal_id, "s1");
        assert_eq!(entry.user_id.as_deref(), Some("u1"));
        assert_eq!(entry.email.as_deref(), Some("alice@example.com"));
        assert_eq!(entry.status, Some(401));
        assert_eq!(entry.reasons, vec!["login"]);
        assert!(!entry.allowed);
        assert_eq!(entry.latency_ms, 3);
    }

    #[tokio::test]
    async fn test_query_by_principal() {
        let logger = AuditLogger::new();
        for id in ["s1", "s2", "s1"] {
            let entry = AuditEntry::new("req", &http(), 0, None)
                .with_identity(&session_identity(id))
                .with_result(&EvaluationResult::allow());
            logger.log_check(entry).await;
        }

        let entries = logger.query_by_principal("s1", 10).await;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.principal_id == "s1"));
        assert_eq!(logger.query_by_principal("s1", 1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_ring_is_bounded() {
        let logger = AuditLogger::with_capacity(2);
        for i in 0..3 {
            logger.log_check(AuditEntry::new(format!("req-{}", i), &http(), 0, None)).await;
        }

        let recent = logger.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id, "req-2");
        assert_eq!(recent[1].request_id, "req-1");
    }

    #[tokio::test]
    async fn test_audit_stats() {
        let logger = AuditLogger::new();
        logger
            .log_check(AuditEntry::new("a", &http(), 0, None).with_result(&EvaluationResult::allow()))
            .await;
        logger
            .log_check(AuditEntry::new("b", &http(), 0, None).with_denial_status(403))
            .await;
        logger
            .log_check(AuditEntry::new("c", &http(), 0, None).with_error("evaluation"))
            .await;

        let stats = logger.get_stats().await;
        assert_eq!(stats.total_checks, 3);
        assert_eq!(stats.allowed_checks, 1);
        assert_eq!(stats.denied_checks, 1);
        assert_eq!(stats.failed_checks, 1);
    }
}
