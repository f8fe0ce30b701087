/*!
C8 — an in-process cache engine, same contract as [`super::db::DbCacheEngine`]
but backed by a `RwLock<HashMap>` instead of a SQL connection. Useful for
tests and for deployments that want KVLite's eviction/expiry semantics
without a database.
*/

use crate::clock::{Clock, SystemClock};
use crate::compressor::{compress_if_over_threshold, decompress_if_flagged, Compressor, NoneCompressor};
use crate::entry::{CacheEntry, CacheValue, CountMode, ExpirationPolicy, ParentRef, MAX_PARENT_KEY_COUNT};
use crate::error::Result;
use crate::executor::FireAndForgetExecutor;
use crate::hash::{KeyHasher, XxHasher64};
use crate::random::{RandomSource, ThreadRandom};
use crate::serializer::{JsonSerializer, ValueSerializer};
use crate::settings::{Settings, SettingsHandle};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::{validate_interval, validate_write, CacheEngine};

/// In-process store, keyed by the identity hash (spec §3.2 invariant 1).
struct Store {
    entries: HashMap<i64, CacheEntry>,
}

/// Backed by a `std::sync::RwLock<HashMap<i64, CacheEntry>>` rather than a
/// lock-free map: writes already serialize through a single upsert/evict
/// path, and a plain `RwLock` keeps this engine's locking as easy to reason
/// about as the SQL engine's transaction boundaries.
pub struct MemoryCacheEngine<S = JsonSerializer> {
    store: Arc<RwLock<Store>>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    hasher: Arc<dyn KeyHasher>,
    serializer: S,
    compressor: Arc<dyn Compressor>,
    settings: SettingsHandle,
    executor: FireAndForgetExecutor,
    insertions_since_cleanup: Arc<AtomicU64>,
}

impl<S: Clone> Clone for MemoryCacheEngine<S> {
    fn clone(&self) -> Self {
        MemoryCacheEngine {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            random: Arc::clone(&self.random),
            hasher: Arc::clone(&self.hasher),
            serializer: self.serializer.clone(),
            compressor: Arc::clone(&self.compressor),
            settings: self.settings.clone(),
            executor: self.executor.clone(),
            insertions_since_cleanup: Arc::clone(&self.insertions_since_cleanup),
        }
    }
}

impl MemoryCacheEngine<JsonSerializer> {
    pub fn builder(settings: Settings) -> MemoryCacheEngineBuilder<JsonSerializer> {
        MemoryCacheEngineBuilder::new(settings)
    }

    pub fn new(settings: Settings) -> Self {
        Self::builder(settings).build()
    }
}

pub struct MemoryCacheEngineBuilder<S> {
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    hasher: Arc<dyn KeyHasher>,
    serializer: S,
    compressor: Arc<dyn Compressor>,
    settings: Settings,
    max_concurrency: usize,
}

impl MemoryCacheEngineBuilder<JsonSerializer> {
    pub fn new(settings: Settings) -> Self {
        MemoryCacheEngineBuilder {
            clock: Arc::new(SystemClock),
            random: Arc::new(ThreadRandom),
            hasher: Arc::new(XxHasher64),
            serializer: JsonSerializer,
            compressor: Arc::new(NoneCompressor),
            settings,
            max_concurrency: 16,
        }
    }
}

impl<S> MemoryCacheEngineBuilder<S> {
    pub fn with_serializer<S2>(self, serializer: S2) -> MemoryCacheEngineBuilder<S2> {
        MemoryCacheEngineBuilder {
            clock: self.clock,
            random: self.random,
            hasher: self.hasher,
            serializer,
            compressor: self.compressor,
            settings: self.settings,
            max_concurrency: self.max_concurrency,
        }
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn KeyHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn build(self) -> MemoryCacheEngine<S> {
        MemoryCacheEngine {
            store: Arc::new(RwLock::new(Store {
                entries: HashMap::new(),
            })),
            clock: self.clock,
            random: self.random,
            hasher: self.hasher,
            serializer: self.serializer,
            compressor: self.compressor,
            settings: SettingsHandle::new(self.settings),
            executor: FireAndForgetExecutor::with_available_parallelism(self.max_concurrency),
            insertions_since_cleanup: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<S> MemoryCacheEngine<S>
where
    S: ValueSerializer + Clone + Send + Sync + 'static,
{
    fn resolve_partition(&self, partition: Option<&str>, settings: &Settings) -> String {
        partition
            .map(|p| p.to_string())
            .unwrap_or_else(|| settings.default_partition.clone())
    }

    fn pad_parents(parents: &[ParentRef]) -> Vec<Option<ParentRef>> {
        let mut padded: Vec<Option<ParentRef>> = parents.iter().cloned().map(Some).collect();
        padded.resize(MAX_PARENT_KEY_COUNT, None);
        padded
    }

    fn write_entry<T>(
        &self,
        partition: Option<&str>,
        key: &str,
        value: &T,
        policy: ExpirationPolicy,
        parents: &[ParentRef],
    ) -> Result<()>
    where
        T: Serialize,
    {
        let settings = self.settings.current();
        let partition = self.resolve_partition(partition, &settings);
        validate_write(&partition, key, parents)?;
        if let ExpirationPolicy::Sliding { interval_seconds } = policy {
            validate_interval(interval_seconds)?;
        }

        let now = self.clock.now();
        let encoded = self.serializer.encode(value)?;
        let (bytes, compressed) =
            compress_if_over_threshold(&*self.compressor, encoded, settings.compression_threshold_bytes)?;
        let hash = self.hasher.hash(&partition, key);
        let interval = policy.interval_seconds(settings.static_interval_seconds());
        let utc_expiry = policy.initial_expiry(now, settings.static_interval_seconds());

        let entry = CacheEntry {
            hash,
            partition,
            key: key.to_string(),
            utc_creation: now,
            utc_expiry,
            interval,
            value: bytes,
            compressed,
            parents: Self::pad_parents(parents),
        };

        self.store.write().unwrap().entries.insert(hash, entry);
        self.maybe_schedule_eviction(&settings);
        Ok(())
    }

    fn maybe_schedule_eviction(&self, settings: &Settings) {
        let count = self.insertions_since_cleanup.fetch_add(1, Ordering::Relaxed) + 1;
        let size_limited = settings.max_cache_size_in_mb > 0;
        if count < settings.insertion_count_before_cleanup && !size_limited {
            return;
        }
        if count >= settings.insertion_count_before_cleanup {
            self.insertions_since_cleanup.store(0, Ordering::Relaxed);
        }
        let engine = self.clone();
        self.executor.try_spawn_or_drop("eviction_sweep", async move {
            engine.run_eviction_pass();
            Ok(())
        });
    }

    fn children_of(&self, hash: i64) -> Vec<i64> {
        let store = self.store.read().unwrap();
        store
            .entries
            .values()
            .filter(|e| {
                e.parents
                    .iter()
                    .any(|p| p.as_ref().map(|p| p.hash) == Some(hash))
            })
            .map(|e| e.hash)
            .collect()
    }

    fn cascade_delete_by_hashes(&self, roots: Vec<i64>) -> u64 {
        let mut visited: HashSet<i64> = HashSet::new();
        let mut frontier = roots;
        while let Some(hash) = frontier.pop() {
            if !visited.insert(hash) {
                continue;
            }
            for child in self.children_of(hash) {
                if !visited.contains(&child) {
                    frontier.push(child);
                }
            }
        }
        let mut store = self.store.write().unwrap();
        let mut removed = 0u64;
        for hash in visited {
            if store.entries.remove(&hash).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Both eviction passes (spec §4.2): expired rows, then — if a size
    /// limit is configured and still exceeded — the oldest-`utc_expiry`-first
    /// size pass.
    pub fn run_eviction_pass(&self) {
        let now = self.clock.now();
        let expired: Vec<i64> = {
            let store = self.store.read().unwrap();
            store
                .entries
                .values()
                .filter(|e| !e.is_valid_at(now))
                .map(|e| e.hash)
                .collect()
        };
        self.cascade_delete_by_hashes(expired);

        let settings = self.settings.current();
        if settings.max_cache_size_in_mb == 0 {
            return;
        }
        let limit_bytes = (settings.max_cache_size_in_mb as i64) * 1024 * 1024;
        let soft_limit = (limit_bytes as f64 * settings.eviction_soft_factor) as i64;

        loop {
            let current_size: i64 = self.store.read().unwrap().entries.values().map(|e| e.size_in_bytes()).sum();
            if current_size <= soft_limit {
                break;
            }
            let jitter = (self.random.uniform() * 50.0) as i64;
            let batch_size = (100 + jitter) as usize;
            let mut ordered: Vec<(i64, i64)> = {
                let store = self.store.read().unwrap();
                store
                    .entries
                    .values()
                    .map(|e| (e.utc_expiry, e.hash))
                    .collect()
            };
            if ordered.is_empty() {
                break;
            }
            ordered.sort_by_key(|(expiry, _)| *expiry);
            let batch: Vec<i64> = ordered.into_iter().take(batch_size).map(|(_, hash)| hash).collect();
            self.cascade_delete_by_hashes(batch);
        }
    }

    fn decode_value<T>(&self, value: &CacheValue) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let raw = match decompress_if_flagged(&*self.compressor, &value.value, value.compressed) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "cache row failed to decompress; treating as absent");
                return Ok(None);
            }
        };
        match self.serializer.decode::<T>(&raw) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                tracing::warn!(error = %e, "cache row failed to deserialize; treating as absent");
                Ok(None)
            }
        }
    }

    fn read_value(&self, partition: Option<&str>, key: &str, bump: bool) -> Result<Option<CacheValue>> {
        let settings = self.settings.current();
        let partition = self.resolve_partition(partition, &settings);
        validate_write(&partition, key, &[])?;
        let now = self.clock.now();
        let hash = self.hasher.hash(&partition, key);

        let value = {
            let store = self.store.read().unwrap();
            match store.entries.get(&hash) {
                Some(e) if e.is_valid_at(now) => CacheValue::from(e),
                _ => return Ok(None),
            }
        };

        if bump && ExpirationPolicy::bumps_on_read(value.interval) {
            let mut store = self.store.write().unwrap();
            if let Some(entry) = store.entries.get_mut(&hash) {
                entry.utc_expiry = now + value.interval;
            }
        }
        Ok(Some(value))
    }
}

#[async_trait]
impl<S> CacheEngine for MemoryCacheEngine<S>
where
    S: ValueSerializer + Clone + Send + Sync + 'static,
{
    async fn add_timed<T>(
        &self,
        partition: Option<&str>,
        key: &str,
        value: &T,
        utc_expiry: i64,
        parents: &[ParentRef],
    ) -> Result<()>
    where
        T: Serialize + Send + Sync,
    {
        self.write_entry(partition, key, value, ExpirationPolicy::Timed { utc_expiry }, parents)
    }

    async fn add_sliding<T>(
        &self,
        partition: Option<&str>,
        key: &str,
        value: &T,
        interval_seconds: i64,
        parents: &[ParentRef],
    ) -> Result<()>
    where
        T: Serialize + Send + Sync,
    {
        self.write_entry(
            partition,
            key,
            value,
            ExpirationPolicy::Sliding { interval_seconds },
            parents,
        )
    }

    async fn add_static<T>(
        &self,
        partition: Option<&str>,
        key: &str,
        value: &T,
        parents: &[ParentRef],
    ) -> Result<()>
    where
        T: Serialize + Send + Sync,
    {
        self.write_entry(partition, key, value, ExpirationPolicy::Static, parents)
    }

    async fn contains(&self, partition: Option<&str>, key: &str) -> Result<bool> {
        let settings = self.settings.current();
        let partition = self.resolve_partition(partition, &settings);
        validate_write(&partition, key, &[])?;
        let now = self.clock.now();
        let hash = self.hasher.hash(&partition, key);
        let store = self.store.read().unwrap();
        Ok(store.entries.get(&hash).map(|e| e.is_valid_at(now)).unwrap_or(false))
    }

    async fn count(&self, partition: Option<&str>, mode: CountMode) -> Result<i64> {
        let now = self.clock.now();
        let store = self.store.read().unwrap();
        let count = store
            .entries
            .values()
            .filter(|e| partition.map(|p| p == e.partition).unwrap_or(true))
            .filter(|e| mode == CountMode::IgnoreExpiry || e.is_valid_at(now))
            .count();
        Ok(count as i64)
    }

    async fn get<T>(&self, partition: Option<&str>, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.read_value(partition, key, true)? {
            Some(value) => self.decode_value(&value),
            None => Ok(None),
        }
    }

    async fn peek<T>(&self, partition: Option<&str>, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.read_value(partition, key, false)? {
            Some(value) => self.decode_value(&value),
            None => Ok(None),
        }
    }

    async fn peek_item(&self, partition: Option<&str>, key: &str) -> Result<Option<CacheValue>> {
        self.read_value(partition, key, false)
    }

    async fn remove(&self, partition: Option<&str>, key: &str) -> Result<()> {
        let settings = self.settings.current();
        let partition = self.resolve_partition(partition, &settings);
        validate_write(&partition, key, &[])?;
        let hash = self.hasher.hash(&partition, key);
        self.cascade_delete_by_hashes(vec![hash]);
        Ok(())
    }

    async fn clear(&self, partition: Option<&str>, mode: CountMode) -> Result<i64> {
        let now = self.clock.now();
        let roots: Vec<i64> = {
            let store = self.store.read().unwrap();
            store
                .entries
                .values()
                .filter(|e| partition.map(|p| p == e.partition).unwrap_or(true))
                .filter(|e| mode == CountMode::IgnoreExpiry || !e.is_valid_at(now))
                .map(|e| e.hash)
                .collect()
        };
        Ok(self.cascade_delete_by_hashes(roots) as i64)
    }

    async fn get_items<T>(&self, partition: Option<&str>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let now = self.clock.now();
        let entries: Vec<CacheEntry> = {
            let store = self.store.read().unwrap();
            store
                .entries
                .values()
                .filter(|e| partition.map(|p| p == e.partition).unwrap_or(true))
                .filter(|e| e.is_valid_at(now))
                .cloned()
                .collect()
        };
        let mut out = Vec::with_capacity(entries.len());
        for entry in &entries {
            let value = CacheValue::from(entry);
            if ExpirationPolicy::bumps_on_read(value.interval) {
                let mut store = self.store.write().unwrap();
                if let Some(e) = store.entries.get_mut(&entry.hash) {
                    e.utc_expiry = now + value.interval;
                }
            }
            if let Some(decoded) = self.decode_value(&value)? {
                out.push(decoded);
            }
        }
        Ok(out)
    }

    async fn peek_items<T>(&self, partition: Option<&str>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let now = self.clock.now();
        let entries: Vec<CacheEntry> = {
            let store = self.store.read().unwrap();
            store
                .entries
                .values()
                .filter(|e| partition.map(|p| p == e.partition).unwrap_or(true))
                .filter(|e| e.is_valid_at(now))
                .cloned()
                .collect()
        };
        let mut out = Vec::with_capacity(entries.len());
        for entry in &entries {
            let value = CacheValue::from(entry);
            if let Some(decoded) = self.decode_value(&value)? {
                out.push(decoded);
            }
        }
        Ok(out)
    }

    async fn get_cache_size_in_bytes(&self) -> Result<i64> {
        let store = self.store.read().unwrap();
        Ok(store.entries.values().map(|e| e.size_in_bytes()).sum())
    }

    fn executor(&self) -> &FireAndForgetExecutor {
        &self.executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Widget {
        name: String,
    }

    fn engine_with_clock(clock: Arc<FixedClock>) -> MemoryCacheEngine<JsonSerializer> {
        MemoryCacheEngine::builder(Settings::default())
            .with_clock(clock)
            .build()
    }

    #[tokio::test]
    async fn static_round_trips() {
        let clock = Arc::new(FixedClock::new(1_000));
        let engine = engine_with_clock(clock);
        let w = Widget { name: "bolt".into() };
        engine.add_static(Some("p"), "k", &w, &[]).await.unwrap();
        let back: Option<Widget> = engine.get(Some("p"), "k").await.unwrap();
        assert_eq!(back, Some(w));
    }

    #[tokio::test]
    async fn timed_entry_expires() {
        let clock = Arc::new(FixedClock::new(1_000));
        let engine = engine_with_clock(Arc::clone(&clock));
        let w = Widget { name: "bolt".into() };
        engine.add_timed(Some("p"), "k", &w, 1_010, &[]).await.unwrap();
        assert!(engine.contains(Some("p"), "k").await.unwrap());
        clock.set(1_011);
        assert!(!engine.contains(Some("p"), "k").await.unwrap());
        let back: Option<Widget> = engine.get(Some("p"), "k").await.unwrap();
        assert_eq!(back, None);
    }

    #[tokio::test]
    async fn sliding_entry_bumps_on_read() {
        let clock = Arc::new(FixedClock::new(1_000));
        let engine = engine_with_clock(Arc::clone(&clock));
        let w = Widget { name: "bolt".into() };
        engine.add_sliding(Some("p"), "k", &w, 30, &[]).await.unwrap();
        clock.set(1_025);
        let _: Option<Widget> = engine.get(Some("p"), "k").await.unwrap();
        clock.set(1_050);
        assert!(engine.contains(Some("p"), "k").await.unwrap());
    }

    #[tokio::test]
    async fn remove_cascades_to_children() {
        let clock = Arc::new(FixedClock::new(1_000));
        let engine = engine_with_clock(clock);
        let parent = Widget { name: "parent".into() };
        let child = Widget { name: "child".into() };
        engine.add_static(Some("p"), "parent", &parent, &[]).await.unwrap();
        let parent_hash = engine.hasher.hash("p", "parent");
        engine
            .add_static(
                Some("p"),
                "child",
                &child,
                &[ParentRef { hash: parent_hash, key: "parent".into() }],
            )
            .await
            .unwrap();

        engine.remove(Some("p"), "parent").await.unwrap();
        assert!(!engine.contains(Some("p"), "parent").await.unwrap());
        assert!(!engine.contains(Some("p"), "child").await.unwrap());
    }

    #[tokio::test]
    async fn clear_respects_partition_scope() {
        let clock = Arc::new(FixedClock::new(1_000));
        let engine = engine_with_clock(clock);
        let w = Widget { name: "bolt".into() };
        engine.add_static(Some("a"), "k1", &w, &[]).await.unwrap();
        engine.add_static(Some("b"), "k2", &w, &[]).await.unwrap();
        let removed = engine.clear(Some("a"), CountMode::IgnoreExpiry).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!engine.contains(Some("a"), "k1").await.unwrap());
        assert!(engine.contains(Some("b"), "k2").await.unwrap());
    }
}
