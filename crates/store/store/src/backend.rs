use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use imgup_core::Record;

use crate::error::StoreError;
use crate::pattern::SearchFilter;

/// Storage engine behind a [`RecordStore`](crate::RecordStore).
///
/// Reads run without the write lock. All mutations go through a
/// [`WriteTxn`] obtained from [`begin_write`](Backend::begin_write), so at
/// most one writer is active against the backend at any instant.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Acquire the exclusive write lock and open a write transaction,
    /// waiting up to `timeout`.
    ///
    /// Returns [`StoreError::LockTimeout`] if another writer still holds the
    /// lock when the timeout elapses.
    async fn begin_write(&self, timeout: Duration) -> Result<Box<dyn WriteTxn>, StoreError>;

    /// Fetch a record by id, ignoring visibility.
    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError>;

    /// Return up to `limit` visible records, newest first, ties broken by
    /// ascending id.
    async fn recents(&self, limit: u32) -> Result<Vec<Record>, StoreError> {
        self.search(&SearchFilter::default(), limit).await
    }

    /// Return up to `limit` visible records matching `filter`, with the same
    /// ordering as [`recents`](Backend::recents).
    async fn search(&self, filter: &SearchFilter, limit: u32) -> Result<Vec<Record>, StoreError>;

    /// Release backend resources. Further calls may fail.
    async fn close(&self) {}
}

/// An open write transaction holding the backend's exclusive lock.
///
/// Changes become visible to readers only on [`commit`](WriteTxn::commit).
/// Dropping the transaction without committing discards every change and
/// releases the lock.
#[async_trait]
pub trait WriteTxn: Send {
    /// Check whether a live record holds `id`, including records inserted
    /// earlier in this transaction.
    async fn exists(&mut self, id: &str) -> Result<bool, StoreError>;

    /// Stage a new record. A duplicate id is a
    /// [`StoreError::ConstraintViolation`].
    async fn insert(&mut self, record: &Record) -> Result<(), StoreError>;

    /// Stage deletion of every record whose retention window has elapsed at
    /// `now`, regardless of visibility. Returns the number of records
    /// affected.
    async fn delete_expired(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Apply staged changes atomically and release the lock.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard staged changes and release the lock.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify object safety of both traits.
    fn _assert_dyn_backend(_: &dyn Backend) {}
    fn _assert_dyn_write_txn(_: &dyn WriteTxn) {}
}
