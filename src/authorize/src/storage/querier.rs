//! Per-check read-through querier

use std::sync::Arc;
use tracing::debug;

use super::cache::RecordCache;
use crate::databroker::{DataBrokerClient, DataBrokerError, Record, RecordKey};

/// Record-store access for a single check.
///
/// Reads are served from the shared [`RecordCache`] when a fresh record of
/// a sufficient version is cached, otherwise fetched and cached. Writes go
/// straight to the store and invalidate the written keys.
#[derive(Clone)]
pub struct CachingQuerier {
    client: Arc<dyn DataBrokerClient>,
    cache: Arc<RecordCache>,
}

impl CachingQuerier {
    pub fn new(client: Arc<dyn DataBrokerClient>, cache: Arc<RecordCache>) -> Self {
        Self { client, cache }
    }

    /// Fetch a record whose version is at least `min_version`
    pub async fn get(&self, record_type: &str, id: &str, min_version: u64) -> Result<Record, DataBrokerError> {
        let key = RecordKey::new(record_type, id);
        if let Some(record) = self.cache.get(&key, min_version) {
            return Ok(record);
        }

        let epoch = self.cache.epoch();
        debug!(record_type, id, min_version, "fetching record from store");
        let record = self.client.get(record_type, id, min_version).await?;

        if record.version < min_version {
            return Err(DataBrokerError::VersionTooOld {
                record_type: record_type.to_string(),
                id: id.to_string(),
                version: record.version,
                min_version,
            });
        }

        self.cache.insert(record.clone(), epoch);
        Ok(record)
    }

    /// Write records through to the store.
    ///
    /// The written keys are invalidated whether or not the write succeeded;
    /// a failed write may still have been applied remotely.
    pub async fn put(&self, records: Vec<Record>) -> Result<Vec<Record>, DataBrokerError> {
        let keys: Vec<RecordKey> = records.iter().map(Record::key).collect();
        let result = self.client.put(records).await;
        self.cache.invalidate(&keys);
        result
    }

    /// The shared cache behind this querier
    pub fn cache(&self) -> &Arc<RecordCache> {
        &self.cache
    }
}
