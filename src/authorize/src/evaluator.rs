//! Policy evaluation engine capability
//!
//! The engine is opaque: it receives the assembled [`EvaluationRequest`]
//! and answers with an [`EvaluationResult`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::http::RequestHttp;
use crate::policy::Policy;

/// Session reference handed to the engine; `id` is empty when anonymous
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSession {
    pub id: String,
}

/// Everything the engine needs to decide a check
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRequest {
    pub policy: Option<Policy>,
    pub http: RequestHttp,
    pub session: RequestSession,
    pub is_internal: bool,
}

/// One step of the engine's reasoning, shown to users on request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEvaluationTrace {
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub explanation: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remediation: String,

    pub allow: bool,
    pub deny: bool,
}

/// Why and how a request is refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    /// HTTP status of the synthesized response
    pub status: u16,

    /// Status text; empty means the standard reason phrase
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub reasons: Vec<String>,

    /// Extra headers on the synthesized response
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Body override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Denial {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            message: String::new(),
            reasons: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// The fixed response for a conclusively invalid session
    pub fn forbidden() -> Self {
        Self::new(403)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Message, or the standard reason phrase for the status
    pub fn status_text(&self) -> String {
        if !self.message.is_empty() {
            return self.message.clone();
        }
        ::http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or_default()
            .to_string()
    }
}

/// Allow or deny
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny(Denial),
}

/// Engine output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub decision: Decision,

    /// Headers to add to the upstream request when allowed
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub traces: Vec<PolicyEvaluationTrace>,
}

impl EvaluationResult {
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            headers: BTreeMap::new(),
            traces: Vec::new(),
        }
    }

    pub fn deny(denial: Denial) -> Self {
        Self {
            decision: Decision::Deny(denial),
            headers: BTreeMap::new(),
            traces: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_trace(mut self, trace: PolicyEvaluationTrace) -> Self {
        self.traces.push(trace);
        self
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self.decision, Decision::Allow)
    }

    pub fn denial(&self) -> Option<&Denial> {
        match &self.decision {
            Decision::Deny(denial) => Some(denial),
            Decision::Allow => None,
        }
    }
}

/// Evaluation failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvaluateError {
    /// Transient; the check may be retried
    #[error("evaluation engine unavailable: {0}")]
    Unavailable(String),

    #[error("evaluation failed: {0}")]
    Failed(String),
}

/// Policy evaluation engine
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult, EvaluateError>;
}
