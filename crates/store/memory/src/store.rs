use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use imgup_core::Record;
use imgup_store::{Backend, SearchFilter, StoreError, WriteTxn};

/// In-memory record backend using `DashMap`. Suitable for development and
/// testing; nothing survives the process.
///
/// Writers are serialized by a single async mutex standing in for the
/// database's exclusive lock. Readers go straight to the map and never see
/// a writer's staged changes.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    records: Arc<DashMap<String, Record>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records, hidden ones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn begin_write(&self, timeout: Duration) -> Result<Box<dyn WriteTxn>, StoreError> {
        let guard = tokio::time::timeout(timeout, Arc::clone(&self.writer).lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(timeout))?;

        Ok(Box::new(MemoryWriteTxn {
            records: Arc::clone(&self.records),
            inserts: HashMap::new(),
            deletes: HashSet::new(),
            _guard: guard,
        }))
    }

    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn search(&self, filter: &SearchFilter, limit: u32) -> Result<Vec<Record>, StoreError> {
        let mut matching: Vec<Record> = self
            .records
            .iter()
            .filter(|entry| entry.visible && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        // Most recent first, ties broken by ascending id.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        matching.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(matching)
    }
}

/// Write transaction over a [`MemoryBackend`].
///
/// Changes are staged locally and applied to the shared map on commit.
/// Dropping the transaction discards them and releases the writer lock.
pub struct MemoryWriteTxn {
    records: Arc<DashMap<String, Record>>,
    inserts: HashMap<String, Record>,
    deletes: HashSet<String>,
    _guard: OwnedMutexGuard<()>,
}

impl MemoryWriteTxn {
    fn committed_live(&self, id: &str) -> bool {
        !self.deletes.contains(id) && self.records.contains_key(id)
    }
}

#[async_trait]
impl WriteTxn for MemoryWriteTxn {
    async fn exists(&mut self, id: &str) -> Result<bool, StoreError> {
        Ok(self.inserts.contains_key(id) || self.committed_live(id))
    }

    async fn insert(&mut self, record: &Record) -> Result<(), StoreError> {
        if self.inserts.contains_key(&record.id) || self.committed_live(&record.id) {
            return Err(StoreError::ConstraintViolation(format!(
                "record id {} already exists",
                record.id
            )));
        }
        self.inserts.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_expired(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|entry| !self.deletes.contains(entry.key()) && entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let before = self.inserts.len();
        self.inserts.retain(|_, rec| !rec.is_expired(now));
        let staged = before - self.inserts.len();

        let removed = expired.len() + staged;
        self.deletes.extend(expired);
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        for id in &this.deletes {
            this.records.remove(id);
        }
        for (id, record) in this.inserts {
            this.records.insert(id, record);
        }
        debug!("memory write transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use imgup_core::NewRecord;
    use imgup_store::testing::run_store_conformance_tests;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(id: &str, created: i64, duration: u64) -> Record {
        NewRecord::new(&b"PNG"[..])
            .with_title(id)
            .with_duration(duration)
            .to_record(id.to_owned(), at(created))
    }

    #[tokio::test]
    async fn conformance() {
        run_store_conformance_tests(|| async {
            Ok::<_, StoreError>(Arc::new(MemoryBackend::new()) as Arc<dyn Backend>)
        })
        .await
        .expect("conformance tests should pass");
    }

    #[tokio::test(start_paused = true)]
    async fn writer_waits_then_times_out() {
        let backend = MemoryBackend::new();
        let held = backend.begin_write(Duration::from_secs(1)).await.unwrap();

        let err = backend
            .begin_write(Duration::from_secs(30))
            .await
            .err()
            .expect("second writer should time out");
        assert!(matches!(err, StoreError::LockTimeout(d) if d == Duration::from_secs(30)));

        held.commit().await.unwrap();
        assert!(backend.begin_write(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_writer_proceeds_once_released() {
        let backend = MemoryBackend::new();
        let held = backend.begin_write(Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.begin_write(Duration::from_secs(30)).await.is_ok() })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(held);
        assert!(waiter.await.unwrap(), "writer should get the lock after release");
    }

    #[tokio::test]
    async fn commit_applies_staged_changes() {
        let backend = MemoryBackend::new();

        let mut txn = backend.begin_write(Duration::from_secs(1)).await.unwrap();
        txn.insert(&record("old", 0, 10)).await.unwrap();
        txn.insert(&record("new", 100, 10)).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(backend.len(), 2);

        let mut txn = backend.begin_write(Duration::from_secs(1)).await.unwrap();
        assert_eq!(txn.delete_expired(at(50)).await.unwrap(), 1);
        assert!(!txn.exists("old").await.unwrap(), "staged delete hides the id");
        assert_eq!(backend.len(), 2, "nothing applied before commit");
        txn.commit().await.unwrap();

        assert_eq!(backend.len(), 1);
        assert!(backend.get("old").await.unwrap().is_none());
        assert!(backend.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_counts_staged_inserts() {
        let backend = MemoryBackend::new();

        let mut txn = backend.begin_write(Duration::from_secs(1)).await.unwrap();
        txn.insert(&record("staged", 0, 1)).await.unwrap();
        assert_eq!(txn.delete_expired(at(5)).await.unwrap(), 1);
        txn.commit().await.unwrap();

        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn deleted_id_can_be_reused_in_same_txn() {
        let backend = MemoryBackend::new();

        let mut txn = backend.begin_write(Duration::from_secs(1)).await.unwrap();
        txn.insert(&record("reuse", 0, 1)).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = backend.begin_write(Duration::from_secs(1)).await.unwrap();
        txn.delete_expired(at(10)).await.unwrap();
        txn.insert(&record("reuse", 10, 100)).await.unwrap();
        txn.commit().await.unwrap();

        let rec = backend.get("reuse").await.unwrap().unwrap();
        assert_eq!(rec.duration, 100);
    }
}
