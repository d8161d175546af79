//! Read-through access to the record store
//!
//! A process-wide [`RecordCache`] is shared by every check; each check wraps
//! it, together with the current record-store client, in a
//! [`CachingQuerier`].

pub mod cache;
pub mod querier;

pub use cache::{CacheConfig, CacheStats, RecordCache};
pub use querier::CachingQuerier;
