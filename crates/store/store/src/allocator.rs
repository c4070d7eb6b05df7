use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::debug;

use crate::backend::WriteTxn;
use crate::error::StoreError;

/// Characters an identifier is drawn from.
pub const ID_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz1234567890";

/// Length of every generated identifier.
pub const ID_LENGTH: usize = 12;

/// Number of candidates tried before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Generates random record identifiers and checks them for uniqueness.
///
/// Identifiers are short enough to share and drawn from 36^12 possible
/// values, so collisions are rare but possible. Each candidate is checked
/// against the caller's write transaction, which holds the exclusive lock,
/// so two writers can never both accept the same id.
pub struct IdAllocator {
    rng: Mutex<Box<dyn RngCore + Send>>,
    max_attempts: u32,
}

impl IdAllocator {
    /// Create an allocator seeded from OS entropy.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create an allocator drawing from the given randomness source.
    pub fn with_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the number of candidates tried before giving up. Zero is
    /// treated as one.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Number of candidates tried before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Produce one candidate identifier.
    pub fn candidate(&self) -> String {
        let mut rng = self.rng.lock();
        #[allow(clippy::cast_possible_truncation)]
        let modulus = ID_ALPHABET.len() as u32;
        (0..ID_LENGTH)
            .map(|_| char::from(ID_ALPHABET[(rng.next_u32() % modulus) as usize]))
            .collect()
    }

    /// Return an identifier no live record holds, as seen by `txn`.
    ///
    /// Fails with [`StoreError::AllocationExhausted`] when every candidate is
    /// taken, and propagates any error from the existence check.
    pub async fn allocate(&self, txn: &mut dyn WriteTxn) -> Result<String, StoreError> {
        for attempt in 1..=self.max_attempts {
            let id = self.candidate();
            if !txn.exists(&id).await? {
                return Ok(id);
            }
            debug!(attempt, "id candidate already taken");
        }

        Err(StoreError::AllocationExhausted {
            attempts: self.max_attempts,
        })
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use imgup_core::Record;

    use crate::testing::ScriptedRng;

    use super::*;

    /// Transaction stub whose existence check consults a fixed set.
    struct TakenIds {
        taken: HashSet<String>,
        checks: u32,
        fail: bool,
    }

    impl TakenIds {
        fn new(taken: &[&str]) -> Self {
            Self {
                taken: taken.iter().map(|s| (*s).to_owned()).collect(),
                checks: 0,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl WriteTxn for TakenIds {
        async fn exists(&mut self, id: &str) -> Result<bool, StoreError> {
            self.checks += 1;
            if self.fail {
                return Err(StoreError::Backend("disk on fire".into()));
            }
            Ok(self.taken.contains(id))
        }

        async fn insert(&mut self, _record: &Record) -> Result<(), StoreError> {
            unreachable!("allocator never inserts")
        }

        async fn delete_expired(&mut self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
            unreachable!("allocator never deletes")
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn candidate_shape() {
        let alloc = IdAllocator::new();
        for _ in 0..100 {
            let id = alloc.candidate();
            assert_eq!(id.len(), ID_LENGTH);
            assert!(id.bytes().all(|b| ID_ALPHABET.contains(&b)), "bad id {id}");
        }
    }

    #[test]
    fn candidate_maps_draws_onto_alphabet() {
        // 0 -> 'a', 25 -> 'z', 26 -> '1', 35 -> '0', 36 wraps to 'a'.
        let alloc = IdAllocator::with_rng(ScriptedRng::new(vec![
            0, 25, 26, 35, 36, 1, 2, 3, 4, 5, 6, 7,
        ]));
        assert_eq!(alloc.candidate(), "az10abcdefgh");
    }

    #[tokio::test]
    async fn allocate_returns_first_free_candidate() {
        let alloc = IdAllocator::with_rng(ScriptedRng::new(vec![0]));
        let mut txn = TakenIds::new(&[]);
        let id = alloc.allocate(&mut txn).await.unwrap();
        assert_eq!(id, "aaaaaaaaaaaa");
        assert_eq!(txn.checks, 1);
    }

    #[tokio::test]
    async fn allocate_retries_past_collisions() {
        // Two candidates of all 'a', then one of all 'b'.
        let mut script = vec![0; ID_LENGTH * 2];
        script.extend(vec![1; ID_LENGTH]);
        let alloc = IdAllocator::with_rng(ScriptedRng::new(script));
        let mut txn = TakenIds::new(&["aaaaaaaaaaaa"]);

        let id = alloc.allocate(&mut txn).await.unwrap();
        assert_eq!(id, "bbbbbbbbbbbb");
        assert_eq!(txn.checks, 3);
    }

    #[tokio::test]
    async fn allocate_gives_up_after_budget() {
        let alloc = IdAllocator::with_rng(ScriptedRng::new(vec![0])).with_max_attempts(5);
        let mut txn = TakenIds::new(&["aaaaaaaaaaaa"]);

        let err = alloc.allocate(&mut txn).await.unwrap_err();
        assert!(matches!(err, StoreError::AllocationExhausted { attempts: 5 }));
        assert_eq!(txn.checks, 5);
    }

    #[tokio::test]
    async fn default_budget_is_thirty() {
        let alloc = IdAllocator::with_rng(ScriptedRng::new(vec![7]));
        let mut txn = TakenIds::new(&["hhhhhhhhhhhh"]);

        let err = alloc.allocate(&mut txn).await.unwrap_err();
        assert!(matches!(err, StoreError::AllocationExhausted { attempts: 30 }));
        assert_eq!(txn.checks, DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn existence_check_failure_propagates() {
        let alloc = IdAllocator::new();
        let mut txn = TakenIds::new(&[]);
        txn.fail = true;

        let err = alloc.allocate(&mut txn).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(txn.checks, 1);
    }

    #[test]
    fn zero_attempts_is_clamped() {
        assert_eq!(IdAllocator::new().with_max_attempts(0).max_attempts(), 1);
    }
}
