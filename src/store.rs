use crate::api::*;
use crate::kv::{KvStore, MemoryKv};
use crate::settings::StoreSettings;
use chrono::Utc;
use log::{debug, trace, warn};
use tokio::sync::Mutex;
use std::collections::BTreeMap;

pub const DEFAULT_CAPACITY: usize = 500;
const KEY_PREFIX: &str = "p2pool_bets_";

/// What became of a [`PredictionStore::save`]. The store never fails the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The first write failed; history was cut down to the newest `kept` records.
    Degraded { kept: usize },
    /// Both writes failed; nothing changed.
    Dropped,
}
impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

/// Bounded per-address history of submitted predictions, one record per
/// `(batch, tick)`, oldest insertions evicted first.
pub struct PredictionStore {
    kv: Box<dyn KvStore + Send + Sync>,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl PredictionStore {
    pub fn new(kv: Box<dyn KvStore + Send + Sync>, capacity: usize) -> Self {
        Self {
            kv,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }
    /// SQLite when a database is configured, process memory otherwise.
    pub async fn open(settings: &StoreSettings) -> anyhow::Result<Self> {
        let kv: Box<dyn KvStore + Send + Sync> = match &settings.database {
            #[cfg(feature = "sqlite")]
            Some(url) => Box::new(crate::db::SqliteKv::new(Some(url.as_str())).await?),
            #[cfg(not(feature = "sqlite"))]
            Some(url) => anyhow::bail!("built without sqlite support, can't open {}", url),
            None => Box::new(MemoryKv::default()),
        };
        Ok(Self::new(kv, settings.capacity))
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub async fn save(
        &self,
        address: &str,
        batch_id: BatchId,
        tick_id: TickId,
        bets: BTreeMap<MarketId, bool>,
    ) -> SaveOutcome {
        let _guard = self.write_lock.lock().await;
        let key = storage_key(address);
        let mut records = match self.read(&key).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Dropping prediction write for {}, history unreadable: {:#}", key, e);
                return SaveOutcome::Dropped;
            }
        };
        records.retain(|r| r.key() != (batch_id, tick_id));
        records.push(StoredBet {
            batch_id,
            tick_id,
            bets,
            submitted_at: Utc::now(),
        });
        if records.len() > self.capacity {
            let excess = records.len() - self.capacity;
            records.drain(..excess);
            trace!("Evicted {} old records for {}", excess, key);
        }
        let err = match self.write(&key, &records).await {
            Ok(()) => return SaveOutcome::Saved,
            Err(e) => e,
        };
        warn!("Couldn't store {} records for {}: {:#}", records.len(), key, err);
        let kept = (records.len() / 2).max(1);
        records.drain(..records.len() - kept);
        match self.write(&key, &records).await {
            Ok(()) => {
                debug!("Stored {} after shrinking to {} records", key, kept);
                SaveOutcome::Degraded { kept }
            }
            Err(e) => {
                warn!("Dropping prediction write for {}: {:#}", key, e);
                SaveOutcome::Dropped
            }
        }
    }
    /// Records of one batch in insertion order. Unreadable data reads as empty.
    pub async fn load_for_batch(&self, address: &str, batch_id: BatchId) -> Vec<StoredBet> {
        let mut records = self.load_all(address).await;
        records.retain(|r| r.batch_id == batch_id);
        records
    }
    pub async fn load_all(&self, address: &str) -> Vec<StoredBet> {
        let key = storage_key(address);
        self.read(&key).await.unwrap_or_else(|e| {
            debug!("Couldn't read {}: {:#}", key, e);
            vec![]
        })
    }
    /// Forgets the address's history. Failures are logged only.
    pub async fn clear(&self, address: &str) {
        let _guard = self.write_lock.lock().await;
        let key = storage_key(address);
        if let Err(e) = self.kv.remove(&key).await {
            warn!("Couldn't clear {}: {:#}", key, e);
        }
    }

    /// Fails only when storage can't be read. Corrupt data reads as empty.
    async fn read(&self, key: &str) -> anyhow::Result<Vec<StoredBet>> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(vec![]);
        };
        Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
            debug!("Ignoring corrupt history in {}: {}", key, e);
            vec![]
        }))
    }
    async fn write(&self, key: &str, records: &[StoredBet]) -> anyhow::Result<()> {
        let value = serde_json::to_string(records)?;
        self.kv.set(key, value).await
    }
}

pub fn storage_key(address: &str) -> String {
    format!("{}{}", KEY_PREFIX, address.to_lowercase())
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    const ALICE: &str = "0xAbC0000000000000000000000000000000000001";

    fn bets(pairs: &[(&str, bool)]) -> BTreeMap<MarketId, bool> {
        pairs.iter().map(|(m, up)| (m.to_string(), *up)).collect()
    }

    struct BrokenKv;
    #[async_trait]
    impl KvStore for BrokenKv {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            bail!("storage unavailable")
        }
        async fn set(&self, _key: &str, _value: String) -> anyhow::Result<()> {
            bail!("storage unavailable")
        }
        async fn remove(&self, _key: &str) -> anyhow::Result<()> {
            bail!("storage unavailable")
        }
    }

    #[tokio::test]
    async fn same_tick_replaces_previous_record() {
        let store = PredictionStore::new(Box::new(MemoryKv::default()), DEFAULT_CAPACITY);
        store.save(ALICE, 1, 4, bets(&[("m1", true)])).await;
        store.save(ALICE, 1, 5, bets(&[("m1", true)])).await;
        let outcome = store.save(ALICE, 1, 4, bets(&[("m1", false), ("m2", true)])).await;
        assert_eq!(outcome, SaveOutcome::Saved);

        let records = store.load_for_batch(ALICE, 1).await;
        assert_eq!(records.len(), 2);
        let tick4: Vec<_> = records.iter().filter(|r| r.tick_id == 4).collect();
        assert_eq!(tick4.len(), 1);
        assert_eq!(tick4[0].bets, bets(&[("m1", false), ("m2", true)]));
        // Replacement moves the record to the back of the insertion order.
        assert_eq!(records.last().unwrap().tick_id, 4);
    }

    #[tokio::test]
    async fn evicts_oldest_inserted_beyond_capacity() {
        let cap = DEFAULT_CAPACITY;
        let store = PredictionStore::new(Box::new(MemoryKv::default()), cap);
        for tick in 0..(cap as u64 + 5) {
            store.save(ALICE, 9, tick, bets(&[("m1", true)])).await;
        }
        let records = store.load_all(ALICE).await;
        assert_eq!(records.len(), cap);
        for tick in 0..5 {
            assert!(records.iter().all(|r| r.tick_id != tick));
        }
        assert_eq!(records.first().unwrap().tick_id, 5);
    }

    #[tokio::test]
    async fn load_filters_by_batch_and_normalizes_address() {
        let store = PredictionStore::new(Box::new(MemoryKv::default()), DEFAULT_CAPACITY);
        store.save(ALICE, 1, 1, bets(&[("m1", true)])).await;
        store.save(&ALICE.to_lowercase(), 2, 1, bets(&[("m1", true)])).await;
        assert_eq!(store.load_for_batch(ALICE, 1).await.len(), 1);
        assert_eq!(store.load_for_batch(ALICE, 2).await.len(), 1);
        assert!(store.load_for_batch(ALICE, 3).await.is_empty());
        assert!(store.load_for_batch("0xother", 1).await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_or_unreadable_history_reads_as_empty() {
        let kv = MemoryKv::default();
        kv.set(&storage_key(ALICE), "{not json".into()).await.unwrap();
        let store = PredictionStore::new(Box::new(kv), DEFAULT_CAPACITY);
        assert!(store.load_for_batch(ALICE, 1).await.is_empty());
        // Saving over corrupt data starts a fresh history.
        store.save(ALICE, 1, 1, bets(&[("m1", true)])).await;
        assert_eq!(store.load_for_batch(ALICE, 1).await.len(), 1);

        let broken = PredictionStore::new(Box::new(BrokenKv), DEFAULT_CAPACITY);
        assert!(broken.load_all(ALICE).await.is_empty());
    }

    #[tokio::test]
    async fn quota_failure_shrinks_history_by_half() {
        let kv = MemoryKv::default();
        let store = PredictionStore::new(Box::new(kv.clone()), DEFAULT_CAPACITY);
        for tick in 0..8 {
            store.save(ALICE, 1, tick, bets(&[("m1", true)])).await;
        }
        let full = kv.get(&storage_key(ALICE)).await.unwrap().unwrap().len();

        let limited = MemoryKv::with_quota(full);
        limited
            .set(&storage_key(ALICE), kv.get(&storage_key(ALICE)).await.unwrap().unwrap())
            .await
            .unwrap();
        let store = PredictionStore::new(Box::new(limited), DEFAULT_CAPACITY);
        let outcome = store.save(ALICE, 1, 8, bets(&[("m1", false)])).await;
        assert_eq!(outcome, SaveOutcome::Degraded { kept: 4 });
        let records = store.load_all(ALICE).await;
        let ticks: Vec<_> = records.iter().map(|r| r.tick_id).collect();
        assert_eq!(ticks, vec![5, 6, 7, 8]);
    }

    #[derive(Clone, Default)]
    struct FlakyKv {
        inner: MemoryKv,
        fail_next_get: Arc<AtomicBool>,
    }
    #[async_trait]
    impl KvStore for FlakyKv {
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            if self.fail_next_get.swap(false, Ordering::SeqCst) {
                bail!("read timed out");
            }
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: String) -> anyhow::Result<()> {
            self.inner.set(key, value).await
        }
        async fn remove(&self, key: &str) -> anyhow::Result<()> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn read_error_keeps_existing_history() {
        let kv = FlakyKv::default();
        let store = PredictionStore::new(Box::new(kv.clone()), DEFAULT_CAPACITY);
        for tick in 0..10 {
            store.save(ALICE, 1, tick, bets(&[("m1", true)])).await;
        }

        kv.fail_next_get.store(true, Ordering::SeqCst);
        let outcome = store.save(ALICE, 1, 10, bets(&[("m1", false)])).await;
        assert_eq!(outcome, SaveOutcome::Dropped);
        assert_eq!(store.load_all(ALICE).await.len(), 10);

        kv.fail_next_get.store(true, Ordering::SeqCst);
        assert!(store.load_for_batch(ALICE, 1).await.is_empty());

        let outcome = store.save(ALICE, 1, 10, bets(&[("m1", false)])).await;
        assert_eq!(outcome, SaveOutcome::Saved);
        assert_eq!(store.load_all(ALICE).await.len(), 11);
    }

    #[tokio::test]
    async fn failing_storage_drops_silently() {
        let store = PredictionStore::new(Box::new(BrokenKv), DEFAULT_CAPACITY);
        let outcome = store.save(ALICE, 1, 1, bets(&[("m1", true)])).await;
        assert_eq!(outcome, SaveOutcome::Dropped);
        assert!(!outcome.is_saved());
        store.clear(ALICE).await;
    }

    #[tokio::test]
    async fn concurrent_saves_keep_every_tick() {
        let store = Arc::new(PredictionStore::new(
            Box::new(MemoryKv::default()),
            DEFAULT_CAPACITY,
        ));
        let handles: Vec<_> = (0..16u64)
            .map(|tick| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.save(ALICE, 1, tick, BTreeMap::new()).await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.load_for_batch(ALICE, 1).await.len(), 16);
    }

    #[tokio::test]
    async fn clear_removes_history() {
        let store = PredictionStore::new(Box::new(MemoryKv::default()), DEFAULT_CAPACITY);
        store.save(ALICE, 1, 1, bets(&[("m1", true)])).await;
        store.clear(ALICE).await;
        assert!(store.load_all(ALICE).await.is_empty());
    }
}
