//! Record store capability
//!
//! Sessions, service accounts and users live in a remote record store. The
//! check pipeline reaches it through [`DataBrokerClient`]; production
//! deployments plug in a network client, tests and single-node setups use
//! [`InMemoryDataBroker`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Record type of a user session
pub const SESSION_TYPE: &str = "type.googleapis.com/session.Session";

/// Record type of a service account
pub const SERVICE_ACCOUNT_TYPE: &str = "type.googleapis.com/user.ServiceAccount";

/// Record type of a user profile
pub const USER_TYPE: &str = "type.googleapis.com/user.User";

/// A versioned record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub record_type: String,

    pub id: String,

    /// Assigned by the store on write; strictly increasing
    #[serde(default)]
    pub version: u64,

    /// Payload
    pub data: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(record_type: impl Into<String>, id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            record_type: record_type.into(),
            id: id.into(),
            version: 0,
            data,
            deleted_at: None,
        }
    }

    /// Cache/lookup key of this record
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.record_type, &self.id)
    }
}

/// (type, id) pair identifying a record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub record_type: String,
    pub id: String,
}

impl RecordKey {
    pub fn new(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            id: id.into(),
        }
    }
}

/// Record store errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataBrokerError {
    #[error("record not found: {record_type}/{id}")]
    NotFound { record_type: String, id: String },

    /// Transient: the store could not be reached
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("record {record_type}/{id} is at version {version}, need at least {min_version}")]
    VersionTooOld {
        record_type: String,
        id: String,
        version: u64,
        min_version: u64,
    },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("record store error: {0}")]
    Internal(String),
}

impl DataBrokerError {
    pub fn not_found(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        DataBrokerError::NotFound {
            record_type: record_type.into(),
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DataBrokerError::NotFound { .. })
    }

    /// Whether the failure is transient and worth retrying
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DataBrokerError::Unavailable(_))
    }
}

/// Remote record store
#[async_trait]
pub trait DataBrokerClient: Send + Sync {
    /// Fetch a record. `min_version` is a hint; callers verify it.
    async fn get(&self, record_type: &str, id: &str, min_version: u64) -> Result<Record, DataBrokerError>;

    /// Write records, returning them with their assigned versions
    async fn put(&self, records: Vec<Record>) -> Result<Vec<Record>, DataBrokerError>;
}

/// In-memory record store
pub struct InMemoryDataBroker {
    records: Arc<RwLock<HashMap<RecordKey, Record>>>,
    version: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryDataBroker {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            version: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every call fails with
    /// [`DataBrokerError::Unavailable`] until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored records, including deleted ones
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<(), DataBrokerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DataBrokerError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryDataBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataBrokerClient for InMemoryDataBroker {
    async fn get(&self, record_type: &str, id: &str, _min_version: u64) -> Result<Record, DataBrokerError> {
        self.check_available()?;

        let records = self.records.read().await;
        match records.get(&RecordKey::new(record_type, id)) {
            Some(record) if record.deleted_at.is_none() => Ok(record.clone()),
            _ => Err(DataBrokerError::not_found(record_type, id)),
        }
    }

    async fn put(&self, records: Vec<Record>) -> Result<Vec<Record>, DataBrokerError> {
        self.check_available()?;

        let mut stored = self.records.write().await;
        let mut written = Vec::with_capacity(records.len());
        for mut record in records {
            if record.record_type.is_empty() || record.id.is_empty() {
                return Err(DataBrokerError::InvalidRecord(
                    "record type and id are required".into(),
                ));
            }
            record.version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
            stored.insert(record.key(), record.clone());
            written.push(record);
        }

        Ok(written)
    }
}
