use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tracing::{debug, info, warn};

use imgup_core::{NewRecord, Record};

use crate::allocator::{DEFAULT_MAX_ATTEMPTS, IdAllocator};
use crate::backend::{Backend, WriteTxn};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::pattern::SearchFilter;

/// How long a writer waits for the exclusive lock by default.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables for a [`RecordStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long insert and sweep wait for the exclusive write lock.
    pub lock_timeout: Duration,
    /// Number of id candidates tried per insert.
    pub max_id_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_id_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Persistent store of uploaded records.
///
/// Owns one backend handle for its whole life. Inserts and sweeps are
/// serialized through the backend's exclusive write lock; lookups and
/// listings run concurrently without it.
pub struct RecordStore {
    backend: Arc<dyn Backend>,
    allocator: IdAllocator,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl RecordStore {
    /// Create a store over `backend` with default settings.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::builder(backend).build()
    }

    /// Start configuring a store over `backend`.
    pub fn builder(backend: Arc<dyn Backend>) -> RecordStoreBuilder {
        RecordStoreBuilder {
            backend,
            config: StoreConfig::default(),
            allocator: None,
            clock: None,
        }
    }

    /// The backend this store runs against.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// The current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate, stamp and persist a new record, returning its id.
    ///
    /// Id allocation and the write happen inside one write transaction.
    /// On any failure the transaction is rolled back, so no partial record
    /// and no reserved id are ever left behind.
    pub async fn insert(&self, new: &NewRecord) -> Result<String, StoreError> {
        validate(new)?;
        debug!("creating new record");

        let mut txn = self.backend.begin_write(self.lock_timeout).await?;

        match self.stage_insert(txn.as_mut(), new).await {
            Ok(record) => {
                txn.commit().await?;
                info!(
                    id = %record.id,
                    author = %record.author,
                    duration = record.duration,
                    "new record stored"
                );
                Ok(record.id)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed insert failed");
                }
                warn!(error = %e, "insert failed");
                Err(e)
            }
        }
    }

    async fn stage_insert(
        &self,
        txn: &mut dyn WriteTxn,
        new: &NewRecord,
    ) -> Result<Record, StoreError> {
        let id = self.allocator.allocate(txn).await?;
        let record = new.to_record(id, self.stamp());
        txn.insert(&record).await?;
        Ok(record)
    }

    /// Creation stamp, truncated to the millisecond precision backends keep.
    fn stamp(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        now.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(now)
    }

    /// Fetch a record by id. Hidden records are returned too: the id itself
    /// is the access credential.
    pub async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        debug!(id, "accessing record");
        self.backend.get(id).await
    }

    /// Return up to `limit` visible records, most recent first.
    pub async fn recents(&self, limit: u32) -> Result<Vec<Record>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let records = self.backend.recents(limit).await?;
        debug!(count = records.len(), "listed recent records");
        Ok(records)
    }

    /// Return up to `limit` visible records matching `filter`, most recent
    /// first. An empty filter behaves exactly like [`recents`](Self::recents).
    pub async fn search(
        &self,
        limit: u32,
        filter: &SearchFilter,
    ) -> Result<Vec<Record>, StoreError> {
        if filter.is_unfiltered() {
            return self.recents(limit).await;
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        let records = self.backend.search(filter, limit).await?;
        debug!(
            title = ?filter.title.as_ref().map(ToString::to_string),
            author = ?filter.author.as_ref().map(ToString::to_string),
            count = records.len(),
            "searched records"
        );
        Ok(records)
    }

    /// Delete every expired record in one atomic operation and return how
    /// many were removed.
    ///
    /// Visibility is ignored. Errors are logged and reported as zero
    /// removals so an unattended periodic job never fails on them; use
    /// [`try_sweep`](Self::try_sweep) to observe the failure.
    pub async fn sweep(&self) -> u64 {
        match self.try_sweep().await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "sweep failed");
                0
            }
        }
    }

    /// Like [`sweep`](Self::sweep) but returns the failure to the caller.
    pub async fn try_sweep(&self) -> Result<u64, StoreError> {
        debug!("clearing expired records");
        let now = self.clock.now();
        let mut txn = self.backend.begin_write(self.lock_timeout).await?;

        let removed = match txn.delete_expired(now).await {
            Ok(n) => n,
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed sweep failed");
                }
                return Err(e);
            }
        };
        txn.commit().await?;

        if removed > 0 {
            info!(removed, "sweep removed expired records");
        }
        Ok(removed)
    }

    /// Close the backend and drop the store.
    pub async fn close(self) {
        debug!("closing record store");
        self.backend.close().await;
    }
}

/// Builder for [`RecordStore`].
pub struct RecordStoreBuilder {
    backend: Arc<dyn Backend>,
    config: StoreConfig,
    allocator: Option<IdAllocator>,
    clock: Option<Arc<dyn Clock>>,
}

impl RecordStoreBuilder {
    /// Apply a full configuration.
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the write lock timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Use a specific id allocator (for example one with a seeded RNG).
    ///
    /// The allocator keeps its own attempt budget; `max_id_attempts` from the
    /// configuration is not applied to it.
    #[must_use]
    pub fn allocator(mut self, allocator: IdAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Use a specific clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the store.
    pub fn build(self) -> RecordStore {
        let allocator = self
            .allocator
            .unwrap_or_else(|| IdAllocator::new().with_max_attempts(self.config.max_id_attempts));

        RecordStore {
            backend: self.backend,
            allocator,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            lock_timeout: self.config.lock_timeout,
        }
    }
}

fn validate(new: &NewRecord) -> Result<(), StoreError> {
    if new.data.is_empty() {
        return Err(StoreError::ConstraintViolation(
            "record data must not be empty".into(),
        ));
    }
    if new.duration == 0 {
        return Err(StoreError::ConstraintViolation(
            "record duration must be greater than zero".into(),
        ));
    }
    if i64::try_from(new.duration).is_err() {
        return Err(StoreError::ConstraintViolation(format!(
            "record duration {} is out of range",
            new.duration
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.lock_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_id_attempts, 30);
    }

    #[test]
    fn validate_rejects_empty_data() {
        let err = validate(&NewRecord::new(Vec::new())).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn validate_rejects_zero_duration() {
        let err = validate(&NewRecord::new(&b"x"[..]).with_duration(0)).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn validate_rejects_unrepresentable_duration() {
        let err = validate(&NewRecord::new(&b"x"[..]).with_duration(u64::MAX)).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn validate_accepts_minimal_record() {
        assert!(validate(&NewRecord::new(&b"x"[..]).with_duration(1)).is_ok());
    }
}
