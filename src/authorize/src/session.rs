//! Caller identity model and the session collaborators
//!
//! Sessions, service accounts and users are stored as JSON payloads in the
//! record store. The session store (cookie/header decoding) and the
//! incoming-token exchange are pluggable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::config::Config;
use crate::databroker::{DataBrokerError, Record, SERVICE_ACCOUNT_TYPE, SESSION_TYPE, USER_TYPE};
use crate::http::IncomingRequest;
use crate::policy::Policy;
use crate::storage::CachingQuerier;

/// An interactive user session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    #[serde(default)]
    pub user_id: String,

    /// Record version the session was read at; not part of the payload
    #[serde(skip)]
    pub version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Identity provider that issued the session
    #[serde(default)]
    pub idp_id: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub claims: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn from_record(record: &Record) -> Result<Self, CredentialError> {
        let mut session: Session = decode(record)?;
        session.version = record.version;
        Ok(session)
    }

    pub fn to_record(&self) -> Record {
        encode(SESSION_TYPE, &self.id, self)
    }

    /// Reject expired sessions
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), CredentialError> {
        check_expiry(&self.id, self.expires_at, now)
    }
}

/// A non-interactive credential
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub id: String,

    /// User the account acts for, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ServiceAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn from_record(record: &Record) -> Result<Self, CredentialError> {
        decode(record)
    }

    pub fn to_record(&self) -> Record {
        encode(SERVICE_ACCOUNT_TYPE, &self.id, self)
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), CredentialError> {
        check_expiry(&self.id, self.expires_at, now)
    }
}

/// User profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub email: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub claims: HashMap<String, serde_json::Value>,
}

impl User {
    pub fn from_record(record: &Record) -> Result<Self, CredentialError> {
        decode(record)
    }

    pub fn to_record(&self) -> Record {
        encode(USER_TYPE, &self.id, self)
    }
}

/// Who is making the request. Exactly one case holds per check.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Identity {
    /// No usable credential
    #[default]
    Absent,
    Session(Session),
    ServiceAccount(ServiceAccount),
}

impl Identity {
    /// Credential id; empty when absent
    pub fn id(&self) -> &str {
        match self {
            Identity::Absent => "",
            Identity::Session(s) => &s.id,
            Identity::ServiceAccount(sa) => &sa.id,
        }
    }

    /// Owning user, if the credential has one
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::Absent => None,
            Identity::Session(s) if s.user_id.is_empty() => None,
            Identity::Session(s) => Some(&s.user_id),
            Identity::ServiceAccount(sa) => sa.user_id.as_deref().filter(|id| !id.is_empty()),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Identity::Absent)
    }

    /// Label used in logs and audit records
    pub fn kind(&self) -> &'static str {
        match self {
            Identity::Absent => "none",
            Identity::Session(_) => "session",
            Identity::ServiceAccount(_) => "service_account",
        }
    }

    /// Decode a session or service-account record and check its expiry
    pub fn from_record(record: &Record, now: DateTime<Utc>) -> Result<Self, CredentialError> {
        match record.record_type.as_str() {
            SESSION_TYPE => {
                let session = Session::from_record(record)?;
                session.validate(now)?;
                Ok(Identity::Session(session))
            }
            SERVICE_ACCOUNT_TYPE => {
                let account = ServiceAccount::from_record(record)?;
                account.validate(now)?;
                Ok(Identity::ServiceAccount(account))
            }
            other => Err(CredentialError::UnexpectedType(other.to_string())),
        }
    }
}

/// A stored credential that cannot be used
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential {0} has expired")]
    Expired(String),

    #[error("failed to decode {record_type}/{id}: {reason}")]
    Decode {
        record_type: String,
        id: String,
        reason: String,
    },

    #[error("unexpected record type: {0}")]
    UnexpectedType(String),
}

fn decode<T: serde::de::DeserializeOwned>(record: &Record) -> Result<T, CredentialError> {
    serde_json::from_value(record.data.clone()).map_err(|e| CredentialError::Decode {
        record_type: record.record_type.clone(),
        id: record.id.clone(),
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(record_type: &str, id: &str, value: &T) -> Record {
    // plain structs with string keys always serialize
    let data = serde_json::to_value(value).unwrap_or_default();
    Record::new(record_type, id, data)
}

fn check_expiry(id: &str, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<(), CredentialError> {
    match expires_at {
        Some(expires_at) if expires_at <= now => Err(CredentialError::Expired(id.to_string())),
        _ => Ok(()),
    }
}

/// Session reference decoded from the request's cookie or bearer token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub id: String,

    /// Minimum record version the session must be read at
    pub databroker_record_version: u64,

    pub identity_provider_id: String,
}

impl SessionState {
    pub fn new(id: impl Into<String>, databroker_record_version: u64) -> Self {
        Self {
            id: id.into(),
            databroker_record_version,
            identity_provider_id: String::new(),
        }
    }
}

/// Session store errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionStoreError {
    /// The credential is well-formed but rejected (wrong identity provider,
    /// bad signature)
    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("malformed session: {0}")]
    Malformed(String),
}

/// Decodes session references carried by requests
pub trait SessionStore: Send + Sync {
    /// Load the session state and verify it belongs to the configured
    /// identity provider. `Ok(None)` when the request carries no session.
    fn load_session_state_and_check_idp(
        &self,
        request: &IncomingRequest,
    ) -> Result<Option<SessionState>, SessionStoreError>;
}

/// Session store for deployments without session cookies
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSessionStore;

impl SessionStore for NoSessionStore {
    fn load_session_state_and_check_idp(
        &self,
        _request: &IncomingRequest,
    ) -> Result<Option<SessionState>, SessionStoreError> {
        Ok(None)
    }
}

/// Errors from minting a session out of an incoming identity-provider token
#[derive(Debug, Clone, Error)]
pub enum TokenExchangeError {
    /// The request carries no usable token
    #[error("no session found")]
    NoSessionFound,

    /// The token was presented but conclusively rejected
    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error(transparent)]
    DataBroker(#[from] DataBrokerError),

    #[error("token exchange failed: {0}")]
    Failed(String),
}

/// Mints sessions from identity-provider tokens presented on the request.
///
/// Implementations read and write records through the given querier; a
/// `put` through it invalidates the cached entries it wrote.
#[async_trait]
pub trait IncomingTokenSessionCreator: Send + Sync {
    async fn create_session(
        &self,
        querier: &CachingQuerier,
        config: &Config,
        policy: Option<&Policy>,
        request: &IncomingRequest,
    ) -> Result<Session, TokenExchangeError>;
}

/// Token exchange that never applies
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTokenExchange;

#[async_trait]
impl IncomingTokenSessionCreator for NoTokenExchange {
    async fn create_session(
        &self,
        _querier: &CachingQuerier,
        _config: &Config,
        _policy: Option<&Policy>,
        _request: &IncomingRequest,
    ) -> Result<Session, TokenExchangeError> {
        Err(TokenExchangeError::NoSessionFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_session_record_roundtrip_keeps_version() {
        let session = Session {
            idp_id: "idp-1".into(),
            ..Session::new("s1", "u1")
        };
        let mut record = session.to_record();
        assert_eq!(record.record_type, SESSION_TYPE);
        record.version = 9;

        let decoded = Session::from_record(&record).unwrap();
        assert_eq!(decoded.id, "s1");
        assert_eq!(decoded.user_id, "u1");
        assert_eq!(decoded.version, 9);
    }

    #[test]
    fn test_identity_from_record_checks_expiry() {
        let now = Utc::now();
        let expired = Session {
            expires_at: Some(now - Duration::minutes(1)),
            ..Session::new("s1", "u1")
        };

        let err = Identity::from_record(&expired.to_record(), now).unwrap_err();
        assert_eq!(err, CredentialError::Expired("s1".into()));

        let valid = Session {
            expires_at: Some(now + Duration::minutes(1)),
            ..Session::new("s2", "u1")
        };
        let identity = Identity::from_record(&valid.to_record(), now).unwrap();
        assert_eq!(identity.id(), "s2");
        assert_eq!(identity.kind(), "session");
    }

    #[test]
    fn test_service_account_identity() {
        let account = ServiceAccount {
            user_id: Some("u9".into()),
            ..ServiceAccount::new("sa1")
        };
        let identity = Identity::from_record(&account.to_record(), Utc::now()).unwrap();

        assert_eq!(identity.id(), "sa1");
        assert_eq!(identity.user_id(), Some("u9"));
        assert_eq!(identity.kind(), "service_account");

        let detached = Identity::ServiceAccount(ServiceAccount::new("sa2"));
        assert_eq!(detached.user_id(), None);
    }

    #[test]
    fn test_undecodable_record() {
        let record = Record::new(SESSION_TYPE, "s1", json!({"id": 5}));
        assert!(matches!(
            Identity::from_record(&record, Utc::now()),
            Err(CredentialError::Decode { .. })
        ));

        let user = Record::new(USER_TYPE, "u1", json!({"id": "u1"}));
        assert!(matches!(
            Identity::from_record(&user, Utc::now()),
            Err(CredentialError::UnexpectedType(_))
        ));
    }

    #[test]
    fn test_absent_identity() {
        let identity = Identity::default();
        assert!(identity.is_absent());
        assert_eq!(identity.id(), "");
        assert_eq!(identity.user_id(), None);
    }

    #[tokio::test]
    async fn test_no_token_exchange() {
        use crate::databroker::InMemoryDataBroker;
        use crate::storage::RecordCache;
        use std::sync::Arc;

        let querier = CachingQuerier::new(Arc::new(InMemoryDataBroker::new()), Arc::new(RecordCache::default()));
        let result = NoTokenExchange
            .create_session(&querier, &Config::default(), None, &IncomingRequest::default())
            .await;

        assert!(matches!(result, Err(TokenExchangeError::NoSessionFound)));
        assert_eq!(
            NoSessionStore.load_session_state_and_check_idp(&IncomingRequest::default()),
            Ok(None)
        );
    }
}
