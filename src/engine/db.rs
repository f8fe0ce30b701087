/*!
C7 — the SQL-backed cache engine.

Composes a [`ConnectionFactory`], [`Clock`], [`RandomSource`], [`KeyHasher`]
and [`Compressor`] (all object-safe, held as `Arc<dyn _>`) plus a
[`ValueSerializer`] (held as a concrete generic `S`, since its methods are
generic over the caller's value type and so cannot be boxed as `dyn`).
*/

use crate::clock::{Clock, SystemClock};
use crate::compressor::{compress_if_over_threshold, decompress_if_flagged, Compressor, NoneCompressor};
use crate::connection::ConnectionFactory;
use crate::entry::{CacheEntry, CacheValue, CountMode, ExpirationPolicy, ParentRef, MAX_PARENT_KEY_COUNT};
use crate::error::{Error, Result};
use crate::executor::FireAndForgetExecutor;
use crate::hash::{KeyHasher, XxHasher64};
use crate::random::{RandomSource, ThreadRandom};
use crate::serializer::{JsonSerializer, ValueSerializer};
use crate::settings::{Settings, SettingsHandle};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{validate_interval, validate_write, CacheEngine};

/// The SQL-backed engine (spec §4.1/§4.2).
pub struct DbCacheEngine<S = JsonSerializer> {
    connection: Arc<dyn ConnectionFactory>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    hasher: Arc<dyn KeyHasher>,
    serializer: S,
    compressor: Arc<dyn Compressor>,
    settings: SettingsHandle,
    executor: FireAndForgetExecutor,
    insertions_since_cleanup: Arc<AtomicU64>,
}

impl<S: Clone> Clone for DbCacheEngine<S> {
    fn clone(&self) -> Self {
        DbCacheEngine {
            connection: Arc::clone(&self.connection),
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

impl DbCacheEngine<JsonSerializer> {
    /// A `DbCacheEngine` wired up with the default capability set: system
    /// clock, thread RNG, xxHash64, JSON serializer, no compression.
    pub fn builder(connection: Arc<dyn ConnectionFactory>, settings: Settings) -> DbCacheEngineBuilder<JsonSerializer> {
        DbCacheEngineBuilder::new(connection, settings)
    }
}

/// Builder mirroring the teacher's `XCacheBuilder` shape.
pub struct DbCacheEngineBuilder<S> {
    connection: Arc<dyn ConnectionFactory>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    hasher: Arc<dyn KeyHasher>,
    serializer: S,
    compressor: Arc<dyn Compressor>,
    settings: Settings,
    max_concurrency: usize,
}

impl DbCacheEngineBuilder<JsonSerializer> {
    pub fn new(connection: Arc<dyn ConnectionFactory>, settings: Settings) -> Self {
        DbCacheEngineBuilder {
            connection,
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

impl<S> DbCacheEngineBuilder<S> {
    pub fn with_serializer<S2>(self, serializer: S2) -> DbCacheEngineBuilder<S2> {
        DbCacheEngineBuilder {
            connection: self.connection,
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

    pub fn build(self) -> DbCacheEngine<S> {
        DbCacheEngine {
            connection: self.connection,
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

impl<S> DbCacheEngine<S>
where
    S: ValueSerializer + Clone + Send + Sync + 'static,
{
    /// Runs the `ensure_schema` DDL (spec §6.1). Callers typically invoke
    /// this once at startup.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.connection.ensure_schema().await
    }

    fn resolve_partition<'a>(&self, partition: Option<&'a str>, settings: &'a Settings) -> String {
        partition
            .map(|p| p.to_string())
            .unwrap_or_else(|| settings.default_partition.clone())
    }

    fn pad_parents(parents: &[ParentRef]) -> Vec<Option<ParentRef>> {
        let mut padded: Vec<Option<ParentRef>> = parents.iter().cloned().map(Some).collect();
        padded.resize(MAX_PARENT_KEY_COUNT, None);
        padded
    }

    async fn write_entry<T>(
        &self,
        partition: Option<&str>,
        key: &str,
        value: &T,
        policy: ExpirationPolicy,
        parents: &[ParentRef],
    ) -> Result<()>
    where
        T: Serialize + Send + Sync,
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

        self.connection.upsert(&entry).await?;
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
            engine.run_eviction_pass().await
        });
    }

    /// Both eviction passes, in order (spec §4.2): expired rows first, then
    /// — only if a size limit is configured and still exceeded — the size
    /// pass.
    pub async fn run_eviction_pass(&self) -> Result<()> {
        let now = self.clock.now();
        let expired = self
            .connection
            .select_hashes_for_clear(None, CountMode::ConsiderExpiry, now)
            .await?;
        self.cascade_delete_by_hashes(expired).await?;

        let settings = self.settings.current();
        if settings.max_cache_size_in_mb == 0 {
            return Ok(());
        }
        let limit_bytes = (settings.max_cache_size_in_mb as i64) * 1024 * 1024;
        let soft_limit = (limit_bytes as f64 * settings.eviction_soft_factor) as i64;

        loop {
            let current = self.connection.size_in_bytes().await?;
            if current <= soft_limit {
                break;
            }
            // Jittered batch size: the spec allows "sample or order"; this
            // engine orders by `utc_expiry` ascending (oldest first) and
            // jitters the batch width with the random source so repeated
            // sweeps don't always cut at the same boundary.
            let jitter = (self.random.uniform() * 50.0) as i64;
            let batch_size = 100 + jitter;
            let candidates = self.connection.candidates_for_size_pass(batch_size).await?;
            if candidates.is_empty() {
                break;
            }
            let hashes: Vec<i64> = candidates.into_iter().map(|(hash, _)| hash).collect();
            self.cascade_delete_by_hashes(hashes).await?;
        }
        Ok(())
    }

    /// Collects `roots` plus every transitive descendant (spec §3.2
    /// invariant 6) and deletes them all, returning the total row count
    /// removed.
    async fn cascade_delete_by_hashes(&self, roots: Vec<i64>) -> Result<u64> {
        let mut visited: HashSet<i64> = HashSet::new();
        let mut frontier = roots;
        while let Some(hash) = frontier.pop() {
            if !visited.insert(hash) {
                continue;
            }
            let children = self.connection.children_of(hash).await?;
            for child in children {
                if !visited.contains(&child) {
                    frontier.push(child);
                }
            }
        }
        let mut removed = 0u64;
        for hash in visited {
            removed += self.connection.delete_by_hash(hash).await?;
        }
        Ok(removed)
    }

    async fn decode_value<T>(&self, value: &CacheValue) -> Result<Option<T>>
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

    async fn read_value(&self, partition: Option<&str>, key: &str, bump: bool) -> Result<Option<CacheValue>> {
        let settings = self.settings.current();
        let partition = self.resolve_partition(partition, &settings);
        validate_write(&partition, key, &[])?;
        let now = self.clock.now();
        let hash = self.hasher.hash(&partition, key);

        let value = match self.connection.select_value(hash).await? {
            Some(v) => v,
            None => return Ok(None),
        };
        if !value_is_valid(&value, now) {
            return Ok(None);
        }
        if bump && ExpirationPolicy::bumps_on_read(value.interval) {
            let new_expiry = now + value.interval;
            let connection = Arc::clone(&self.connection);
            self.executor
                .try_spawn_or_drop("sliding_bump", async move {
                    connection.update_expiry(hash, new_expiry).await
                });
        }
        Ok(Some(value))
    }
}

fn value_is_valid(value: &CacheValue, now: i64) -> bool {
    value.utc_expiry >= now
}

#[async_trait]
impl<S> CacheEngine for DbCacheEngine<S>
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
            .await
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
        .await
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
            .await
    }

    async fn contains(&self, partition: Option<&str>, key: &str) -> Result<bool> {
        let settings = self.settings.current();
        let partition = self.resolve_partition(partition, &settings);
        validate_write(&partition, key, &[])?;
        let now = self.clock.now();
        let hash = self.hasher.hash(&partition, key);
        self.connection.contains(hash, now).await
    }

    async fn count(&self, partition: Option<&str>, mode: CountMode) -> Result<i64> {
        let now = self.clock.now();
        match partition {
            Some(p) => self.connection.count_partition(p, mode, now).await,
            None => self.connection.count_all(mode, now).await,
        }
    }

    async fn get<T>(&self, partition: Option<&str>, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.read_value(partition, key, true).await? {
            Some(value) => self.decode_value(&value).await,
            None => Ok(None),
        }
    }

    async fn peek<T>(&self, partition: Option<&str>, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        if !self.can_peek() {
            return Err(Error::not_supported("this connector does not support Peek"));
        }
        match self.read_value(partition, key, false).await? {
            Some(value) => self.decode_value(&value).await,
            None => Ok(None),
        }
    }

    async fn peek_item(&self, partition: Option<&str>, key: &str) -> Result<Option<CacheValue>> {
        if !self.can_peek() {
            return Err(Error::not_supported("this connector does not support Peek"));
        }
        self.read_value(partition, key, false).await
    }

    async fn remove(&self, partition: Option<&str>, key: &str) -> Result<()> {
        let settings = self.settings.current();
        let partition = self.resolve_partition(partition, &settings);
        validate_write(&partition, key, &[])?;
        let hash = self.hasher.hash(&partition, key);
        self.cascade_delete_by_hashes(vec![hash]).await?;
        Ok(())
    }

    async fn clear(&self, partition: Option<&str>, mode: CountMode) -> Result<i64> {
        let now = self.clock.now();
        let roots = self
            .connection
            .select_hashes_for_clear(partition, mode, now)
            .await?;
        let removed = self.cascade_delete_by_hashes(roots).await?;
        Ok(removed as i64)
    }

    async fn get_items<T>(&self, partition: Option<&str>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let now = self.clock.now();
        let entries = self.connection.select_items(partition, now).await?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in &entries {
            let value = CacheValue::from(entry);
            if ExpirationPolicy::bumps_on_read(value.interval) {
                let connection = Arc::clone(&self.connection);
                let new_expiry = now + value.interval;
                let hash = entry.hash;
                self.executor
                    .try_spawn_or_drop("sliding_bump", async move {
                        connection.update_expiry(hash, new_expiry).await
                    });
            }
            if let Some(decoded) = self.decode_value(&value).await? {
                out.push(decoded);
            }
        }
        Ok(out)
    }

    async fn peek_items<T>(&self, partition: Option<&str>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        if !self.can_peek() {
            return Err(Error::not_supported("this connector does not support Peek"));
        }
        let now = self.clock.now();
        let entries = self.connection.select_items(partition, now).await?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in &entries {
            let value = CacheValue::from(entry);
            if let Some(decoded) = self.decode_value(&value).await? {
                out.push(decoded);
            }
        }
        Ok(out)
    }

    async fn get_cache_size_in_bytes(&self) -> Result<i64> {
        self.connection.size_in_bytes().await
    }

    fn can_peek(&self) -> bool {
        self.connection.can_peek()
    }

    fn executor(&self) -> &FireAndForgetExecutor {
        &self.executor
    }
}
