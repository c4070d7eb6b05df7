use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rand::RngCore;

use imgup_core::{NewRecord, Record};

use crate::allocator::IdAllocator;
use crate::backend::Backend;
use crate::clock::ManualClock;
use crate::error::StoreError;
use crate::pattern::SearchFilter;
use crate::store::RecordStore;

/// A randomness source that replays a fixed script of `u32` draws, cycling
/// when it runs out. Lets tests force id collisions deterministically.
#[derive(Debug, Clone)]
pub struct ScriptedRng {
    script: Vec<u32>,
    pos: usize,
}

impl ScriptedRng {
    /// Create a source replaying `script`. An empty script always yields 0.
    pub fn new(script: Vec<u32>) -> Self {
        Self { script, pos: 0 }
    }
}

impl RngCore for ScriptedRng {
    fn next_u32(&mut self) -> u32 {
        let Some(value) = self.script.get(self.pos % self.script.len().max(1)) else {
            return 0;
        };
        self.pos += 1;
        *value
    }

    fn next_u64(&mut self) -> u64 {
        (u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Fixed starting instant for conformance clocks.
fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn image(title: &str, author: &str, data: &str) -> NewRecord {
    NewRecord::new(data.as_bytes().to_vec())
        .with_title(title)
        .with_author(author)
        .with_filename(format!("{title}.png"))
        .with_duration(3600)
}

struct Fixture {
    backend: Arc<dyn Backend>,
    store: RecordStore,
    clock: ManualClock,
}

async fn fixture<F, Fut>(factory: &F) -> Result<Fixture, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let backend = factory().await?;
    let clock = ManualClock::new(epoch());
    let store = RecordStore::builder(Arc::clone(&backend))
        .clock(Arc::new(clock.clone()))
        .build();
    Ok(Fixture {
        backend,
        store,
        clock,
    })
}

fn ids(records: &[Record]) -> Vec<String> {
    records.iter().map(|r| r.id.clone()).collect()
}

/// Run the full record store conformance suite.
///
/// `factory` must return a fresh, empty backend on every call; each test
/// gets its own instance.
///
/// # Errors
///
/// Returns an error if a backend operation fails unexpectedly. Assertion
/// failures panic.
pub async fn run_store_conformance_tests<F, Fut>(factory: F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    test_get_missing(&factory).await?;
    test_insert_and_get(&factory).await?;
    test_blank_fields_get_defaults(&factory).await?;
    test_invalid_records_rejected(&factory).await?;
    test_hidden_record(&factory).await?;
    test_recents_order(&factory).await?;
    test_recents_limit(&factory).await?;
    test_recents_zero_limit(&factory).await?;
    test_same_timestamp_tie_break(&factory).await?;
    test_search_by_author(&factory).await?;
    test_search_filters_combine(&factory).await?;
    test_search_unfiltered_equals_recents(&factory).await?;
    test_sweep_removes_expired(&factory).await?;
    test_sweep_boundary(&factory).await?;
    test_sweep_ignores_visibility(&factory).await?;
    test_sweep_empty(&factory).await?;
    test_sequential_ids_unique(&factory).await?;
    test_concurrent_ids_unique(&factory).await?;
    test_collision_exhausts_budget(&factory).await?;
    test_lock_timeout(&factory).await?;
    test_rollback_discards(&factory).await?;
    test_uncommitted_insert_invisible(&factory).await?;
    test_duplicate_id_rejected(&factory).await?;
    Ok(())
}

async fn test_get_missing<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    assert!(
        fx.store.get("unknown").await?.is_none(),
        "get on missing id should return None"
    );
    Ok(())
}

async fn test_insert_and_get<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let new = NewRecord::new(&b"PNG..."[..])
        .with_title("t1")
        .with_author("a1")
        .with_filename("image.png")
        .with_duration(3600)
        .with_visible(true);

    let id = fx.store.insert(&new).await?;
    assert_eq!(id.len(), crate::ID_LENGTH);

    let rec = fx.store.get(&id).await?.expect("inserted record should exist");
    assert_eq!(rec.id, id);
    assert_eq!(rec.title, "t1");
    assert_eq!(rec.author, "a1");
    assert_eq!(rec.data.as_ref(), b"PNG...");
    assert_eq!(rec.filename, "image.png");
    assert_eq!(rec.created_at, epoch(), "created_at should be the insert time");
    assert!(rec.visible);
    assert_eq!(rec.duration, 3600);
    Ok(())
}

async fn test_blank_fields_get_defaults<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let id = fx
        .store
        .insert(&NewRecord::new(&b"GIF89a"[..]).with_title("  "))
        .await?;

    let rec = fx.store.get(&id).await?.expect("record should exist");
    assert_eq!(rec.title, imgup_core::DEFAULT_TITLE);
    assert_eq!(rec.author, imgup_core::DEFAULT_AUTHOR);
    assert_eq!(rec.filename, "");
    Ok(())
}

async fn test_invalid_records_rejected<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;

    let empty = fx.store.insert(&NewRecord::new(Vec::new())).await;
    assert!(
        matches!(empty, Err(StoreError::ConstraintViolation(_))),
        "empty data should be rejected"
    );

    let zero = fx
        .store
        .insert(&NewRecord::new(&b"x"[..]).with_duration(0))
        .await;
    assert!(
        matches!(zero, Err(StoreError::ConstraintViolation(_))),
        "zero duration should be rejected"
    );

    assert!(fx.store.recents(10).await?.is_empty(), "nothing stored");
    Ok(())
}

async fn test_hidden_record<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let id = fx
        .store
        .insert(&image("secret", "me", "PNG...").with_visible(false))
        .await?;

    assert!(fx.store.recents(10).await?.is_empty());
    assert!(fx.store.search(10, &SearchFilter::new()).await?.is_empty());
    assert!(
        fx.store
            .search(10, &SearchFilter::new().with_title("secret"))
            .await?
            .is_empty()
    );

    let rec = fx.store.get(&id).await?.expect("hidden record is fetchable by id");
    assert!(!rec.visible);
    Ok(())
}

async fn test_recents_order<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let mut inserted = Vec::new();
    for i in 0..3 {
        inserted.push(
            fx.store
                .insert(&image(&format!("test {i}"), "unit test", "PNG"))
                .await?,
        );
        fx.clock.advance(TimeDelta::seconds(2));
    }

    let recents = fx.store.recents(3).await?;
    inserted.reverse();
    assert_eq!(ids(&recents), inserted, "most recent first");
    assert_eq!(recents[0].title, "test 2");
    assert!(recents.windows(2).all(|w| w[0].created_at > w[1].created_at));
    Ok(())
}

async fn test_recents_limit<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    for i in 0..20 {
        fx.store
            .insert(&image(&format!("test {i}"), &format!("unit test {i}"), "PNG"))
            .await?;
        fx.clock.advance(TimeDelta::seconds(2));
    }
    // A hidden newer record must not take a slot.
    fx.store
        .insert(&image("hidden", "x", "PNG").with_visible(false))
        .await?;

    let recents = fx.store.recents(3).await?;
    let titles: Vec<&str> = recents.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, ["test 19", "test 18", "test 17"]);

    let all = fx.store.recents(100).await?;
    assert_eq!(all.len(), 20, "fewer than limit returns all visible");
    Ok(())
}

async fn test_recents_zero_limit<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    fx.store.insert(&image("a", "b", "c")).await?;
    assert!(fx.store.recents(0).await?.is_empty());
    assert!(
        fx.store
            .search(0, &SearchFilter::new().with_author("b"))
            .await?
            .is_empty()
    );
    Ok(())
}

async fn test_same_timestamp_tie_break<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let mut inserted = Vec::new();
    for i in 0..5 {
        inserted.push(fx.store.insert(&image(&format!("same {i}"), "x", "y")).await?);
    }
    inserted.sort();

    assert_eq!(ids(&fx.store.recents(5).await?), inserted, "ties by ascending id");
    assert_eq!(
        ids(&fx.store.search(5, &SearchFilter::new().with_author("x")).await?),
        inserted
    );
    Ok(())
}

async fn test_search_by_author<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let mario = fx
        .store
        .insert(&image("Super Mario", "Mario", "PNG mario"))
        .await?;
    fx.store
        .insert(&image("Super Luigi", "Luigi", "PNG luigi"))
        .await?;

    let found = fx
        .store
        .search(10, &SearchFilter::new().with_author("Mario"))
        .await?;
    assert_eq!(ids(&found), [mario.clone()]);
    assert_eq!(found[0].title, "Super Mario");
    assert_eq!(found[0].data.as_ref(), b"PNG mario");

    let none = fx
        .store
        .search(1, &SearchFilter::new().with_author("jean"))
        .await?;
    assert!(none.is_empty(), "no author matches");

    let folded = fx
        .store
        .search(10, &SearchFilter::new().with_author("mARIO"))
        .await?;
    assert_eq!(ids(&folded), [mario], "matching ignores ASCII case");
    Ok(())
}

async fn test_search_filters_combine<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let kart = fx.store.insert(&image("Mario Kart", "Mario", "k")).await?;
    fx.clock.advance(TimeDelta::seconds(1));
    let bros = fx.store.insert(&image("Super Mario", "Mario", "b")).await?;
    fx.clock.advance(TimeDelta::seconds(1));
    fx.store.insert(&image("Super Luigi", "Luigi", "l")).await?;
    fx.clock.advance(TimeDelta::seconds(1));
    fx.store
        .insert(&image("Super Mario", "Mario", "h").with_visible(false))
        .await?;

    let both = SearchFilter::new().with_title("Super").with_author("Mario");
    assert_eq!(ids(&fx.store.search(10, &both).await?), [bros.clone()]);

    let prefix = SearchFilter::new().with_title("Mario*");
    assert_eq!(ids(&fx.store.search(10, &prefix).await?), [kart.clone()]);

    let by_author = SearchFilter::new().with_author("Mario");
    assert_eq!(ids(&fx.store.search(10, &by_author).await?), [bros, kart]);

    let literal = SearchFilter::new().with_title("Super_Mario");
    assert!(fx.store.search(10, &literal).await?.is_empty(), "_ is literal");
    Ok(())
}

async fn test_search_unfiltered_equals_recents<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    for i in 0..6 {
        fx.store
            .insert(&image(&format!("r{i}"), "a", "d").with_visible(i % 3 != 0))
            .await?;
        fx.clock.advance(TimeDelta::seconds(1));
    }

    for limit in [1, 3, 10] {
        let recents = fx.store.recents(limit).await?;
        let searched = fx.store.search(limit, &SearchFilter::new()).await?;
        assert_eq!(recents, searched, "limit {limit}");

        let everything = SearchFilter::new().with_title("*").with_author("%");
        assert_eq!(ids(&fx.store.search(limit, &everything).await?), ids(&recents));
    }
    Ok(())
}

async fn test_sweep_removes_expired<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let short = fx
        .store
        .insert(&image("short", "a", "d").with_duration(1))
        .await?;
    let long = fx.store.insert(&image("long", "a", "d")).await?;

    fx.clock.advance(TimeDelta::seconds(2));
    assert_eq!(fx.store.sweep().await, 1);

    assert!(fx.store.get(&short).await?.is_none(), "expired record removed");
    assert!(fx.store.get(&long).await?.is_some(), "live record survives");
    assert_eq!(ids(&fx.store.recents(10).await?), [long]);
    Ok(())
}

async fn test_sweep_boundary<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let id = fx
        .store
        .insert(&image("edge", "a", "d").with_duration(10))
        .await?;

    fx.clock.advance(TimeDelta::milliseconds(9_999));
    assert_eq!(fx.store.try_sweep().await?, 0, "still inside its window");
    assert!(fx.store.get(&id).await?.is_some());

    fx.clock.advance(TimeDelta::milliseconds(1));
    assert_eq!(fx.store.try_sweep().await?, 1, "elapsed == duration expires");
    assert!(fx.store.get(&id).await?.is_none());
    Ok(())
}

async fn test_sweep_ignores_visibility<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let hidden = fx
        .store
        .insert(&image("hidden", "a", "d").with_visible(false).with_duration(1))
        .await?;

    fx.clock.advance(TimeDelta::seconds(2));
    assert_eq!(fx.store.sweep().await, 1);
    assert!(fx.store.get(&hidden).await?.is_none());
    Ok(())
}

async fn test_sweep_empty<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    assert_eq!(fx.store.try_sweep().await?, 0);
    Ok(())
}

async fn test_sequential_ids_unique<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let mut seen = HashSet::new();
    for i in 0..50 {
        let id = fx.store.insert(&image(&format!("s{i}"), "a", "d")).await?;
        assert!(seen.insert(id), "ids must be pairwise distinct");
    }
    Ok(())
}

async fn test_concurrent_ids_unique<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let records: Vec<NewRecord> = (0..32)
        .map(|i| image(&format!("c{i}"), "a", "d"))
        .collect();

    let results =
        futures::future::join_all(records.iter().map(|r| fx.store.insert(r))).await;

    let mut seen = HashSet::new();
    for result in results {
        assert!(seen.insert(result?), "ids must be pairwise distinct");
    }
    assert_eq!(fx.store.recents(100).await?.len(), 32);
    Ok(())
}

async fn test_collision_exhausts_budget<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    // Every candidate is "aaaaaaaaaaaa".
    let store = RecordStore::builder(Arc::clone(&fx.backend))
        .clock(Arc::new(fx.clock.clone()))
        .allocator(IdAllocator::with_rng(ScriptedRng::new(vec![0])))
        .build();

    let first = store.insert(&image("first", "a", "d")).await?;
    assert_eq!(first, "aaaaaaaaaaaa");

    let second = store.insert(&image("second", "a", "d")).await;
    assert!(
        matches!(second, Err(StoreError::AllocationExhausted { attempts: 30 })),
        "colliding candidates should exhaust the budget"
    );

    let all = store.recents(10).await?;
    assert_eq!(all.len(), 1, "failed insert leaves nothing behind");
    assert_eq!(all[0].title, "first");
    Ok(())
}

async fn test_lock_timeout<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let store = RecordStore::builder(Arc::clone(&fx.backend))
        .clock(Arc::new(fx.clock.clone()))
        .lock_timeout(Duration::from_millis(100))
        .build();

    let held = fx.backend.begin_write(Duration::from_secs(5)).await?;

    let result = store.insert(&image("blocked", "a", "d")).await;
    assert!(
        matches!(result, Err(StoreError::LockTimeout(_))),
        "insert should time out while another writer holds the lock"
    );
    assert!(matches!(
        store.try_sweep().await,
        Err(StoreError::LockTimeout(_))
    ));
    assert_eq!(store.sweep().await, 0, "sweep swallows the failure");

    // Readers are not blocked by the writer.
    assert!(store.recents(10).await?.is_empty());

    held.rollback().await?;
    store.insert(&image("unblocked", "a", "d")).await?;
    assert_eq!(store.recents(10).await?.len(), 1);
    Ok(())
}

async fn test_rollback_discards<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let rec = image("ghost", "a", "d").to_record("ghost0000000".into(), epoch());

    let mut txn = fx.backend.begin_write(Duration::from_secs(5)).await?;
    txn.insert(&rec).await?;
    assert!(txn.exists("ghost0000000").await?, "visible inside the txn");
    txn.rollback().await?;
    assert!(fx.store.get("ghost0000000").await?.is_none());

    // Dropping without commit behaves like rollback and frees the lock.
    let mut txn = fx.backend.begin_write(Duration::from_secs(5)).await?;
    txn.insert(&rec).await?;
    drop(txn);
    assert!(fx.store.get("ghost0000000").await?.is_none());

    let mut txn = fx.backend.begin_write(Duration::from_secs(5)).await?;
    txn.insert(&rec).await?;
    txn.commit().await?;
    assert_eq!(fx.store.get("ghost0000000").await?, Some(rec));
    Ok(())
}

async fn test_uncommitted_insert_invisible<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let rec = image("pending", "a", "d").to_record("pending00000".into(), epoch());

    let mut txn = fx.backend.begin_write(Duration::from_secs(5)).await?;
    txn.insert(&rec).await?;
    assert!(fx.store.get("pending00000").await?.is_none());
    assert!(fx.store.recents(10).await?.is_empty());
    txn.commit().await?;

    assert!(fx.store.get("pending00000").await?.is_some());
    Ok(())
}

async fn test_duplicate_id_rejected<F, Fut>(factory: &F) -> Result<(), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, StoreError>>,
{
    let fx = fixture(factory).await?;
    let rec = image("dup", "a", "d").to_record("dup000000000".into(), epoch());

    let mut txn = fx.backend.begin_write(Duration::from_secs(5)).await?;
    txn.insert(&rec).await?;
    txn.commit().await?;

    let mut txn = fx.backend.begin_write(Duration::from_secs(5)).await?;
    let result = txn.insert(&rec).await;
    assert!(
        matches!(result, Err(StoreError::ConstraintViolation(_))),
        "duplicate id should violate the key constraint"
    );
    txn.rollback().await?;
    Ok(())
}
