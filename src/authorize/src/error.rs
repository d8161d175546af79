//! Error types for the check pipeline

use std::time::Duration;
use thiserror::Error;

use crate::evaluator::EvaluateError;

/// Errors that fail a check outright.
///
/// A denial is a successful check; these are infrastructure faults that the
/// proxy layer surfaces (and retries) on its own terms. The one exception is
/// [`CheckError::InvalidSession`], which the orchestrator converts into a
/// fixed 403 denial before it reaches the caller.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The wire request could not be translated into an internal request
    #[error("invalid check request: {0}")]
    ProtocolTranslation(String),

    /// The presented credential was conclusively rejected
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// The record store or evaluation engine reported a transient failure
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Minting a session from an incoming identity-provider token failed
    #[error("error creating session from incoming token: {0}")]
    SessionCreation(String),

    /// The evaluation engine failed
    #[error("policy evaluation failed: {0}")]
    Evaluation(String),

    /// The caller cancelled the check before it completed
    #[error("check cancelled")]
    Cancelled,

    /// The check did not complete within its deadline
    #[error("check did not complete within {0:?}")]
    Timeout(Duration),
}

impl CheckError {
    /// Short, stable label used in audit records and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            CheckError::ProtocolTranslation(_) => "protocol_translation",
            CheckError::InvalidSession(_) => "invalid_session",
            CheckError::DependencyUnavailable(_) => "dependency_unavailable",
            CheckError::SessionCreation(_) => "session_creation",
            CheckError::Evaluation(_) => "evaluation",
            CheckError::Cancelled => "cancelled",
            CheckError::Timeout(_) => "timeout",
        }
    }

    /// Whether the proxy may retry the check
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckError::DependencyUnavailable(_))
    }
}

impl From<EvaluateError> for CheckError {
    fn from(err: EvaluateError) -> Self {
        match err {
            EvaluateError::Unavailable(msg) => CheckError::DependencyUnavailable(msg),
            EvaluateError::Failed(msg) => CheckError::Evaluation(msg),
        }
    }
}

/// Result type for check operations
pub type Result<T> = std::result::Result<T, CheckError>;
