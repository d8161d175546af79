//! Atomically replaceable, immutable snapshots
//!
//! Readers take an `Arc` to the current value and keep using it for the rest
//! of their unit of work, so a concurrent [`AtomicSnapshot::store`] never
//! changes what an in-flight check observes.

use parking_lot::RwLock;
use std::sync::Arc;

/// Holder for the current immutable snapshot of `T`
pub struct AtomicSnapshot<T> {
    current: RwLock<Arc<T>>,
}

impl<T> AtomicSnapshot<T> {
    /// Create a holder with an initial snapshot
    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Create a holder around an already shared snapshot
    pub fn from_arc(value: Arc<T>) -> Self {
        Self {
            current: RwLock::new(value),
        }
    }

    /// Get the current snapshot
    pub fn load(&self) -> Arc<T> {
        self.current.read().clone()
    }

    /// Replace the current snapshot
    pub fn store(&self, value: T) {
        self.swap(value);
    }

    /// Replace the current snapshot, returning the previous one
    pub fn swap(&self, value: T) -> Arc<T> {
        std::mem::replace(&mut *self.current.write(), Arc::new(value))
    }
}

impl<T: Default> Default for AtomicSnapshot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
