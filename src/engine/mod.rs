/*!
C7/C8 — the behavioral core: the `CacheEngine` contract every backend
implements (spec §4.1), plus the state-machine and algorithm notes the two
concrete engines ([`db::DbCacheEngine`] and [`memory::MemoryCacheEngine`])
share.

Re-architected per spec §9's redesign note: rather than a class hierarchy
with a templated abstract base, this is one engine *shape* (a trait)
implemented independently by each backend, each composing its own pluggable
capability objects (clock, random, serializer, compressor, hasher,
connection factory) injected at construction. No inheritance between
engines.
*/

pub mod db;
pub mod memory;

use crate::entry::{CacheValue, CountMode, ParentRef};
use crate::error::{Error, Result};
use crate::executor::FireAndForgetExecutor;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;

/// Validates the tie-break rules common to every `Add*` call (spec §4.1):
/// partition/key must be non-empty and within the length cap, and the
/// parent count must not exceed the compile-time bound.
pub(crate) fn validate_write(
    partition: &str,
    key: &str,
    parents: &[ParentRef],
) -> Result<()> {
    if partition.is_empty() || key.is_empty() {
        return Err(Error::invalid_argument(
            "partition and key must be non-empty",
        ));
    }
    if partition.chars().count() > crate::entry::MAX_IDENTIFIER_LEN
        || key.chars().count() > crate::entry::MAX_IDENTIFIER_LEN
    {
        return Err(Error::invalid_argument(format!(
            "partition/key must be at most {} characters",
            crate::entry::MAX_IDENTIFIER_LEN
        )));
    }
    if parents.len() > crate::entry::MAX_PARENT_KEY_COUNT {
        return Err(Error::invalid_argument(format!(
            "at most {} parents are allowed per entry",
            crate::entry::MAX_PARENT_KEY_COUNT
        )));
    }
    Ok(())
}

pub(crate) fn validate_interval(interval_seconds: i64) -> Result<()> {
    if interval_seconds < 0 {
        return Err(Error::invalid_argument("interval must not be negative"));
    }
    Ok(())
}

/// The public contract every cache engine implements (spec §4.1). Generic
/// over the stored value type at each call site — the engine itself only
/// ever touches byte slices (spec §9's "dynamic dispatch over target type"
/// note resolved by making the *trait methods* generic rather than the
/// engine dynamically typed).
///
/// Not object-safe (several methods are generic) by design: callers are
/// expected to hold a concrete engine type or be generic over `E:
/// CacheEngine`, matching the "compose capability interfaces, don't
/// subclass a base" redesign direction.
#[async_trait]
pub trait CacheEngine: Send + Sync + Sized {
    /// Absolute-expiry write; `interval = 0` (spec §3.2 invariant 5).
    async fn add_timed<T>(
        &self,
        partition: Option<&str>,
        key: &str,
        value: &T,
        utc_expiry: i64,
        parents: &[ParentRef],
    ) -> Result<()>
    where
        T: Serialize + Send + Sync;

    /// `utc_expiry = now + interval`; bumps on every successful `Get`
    /// (spec §3.2 invariant 4).
    async fn add_sliding<T>(
        &self,
        partition: Option<&str>,
        key: &str,
        value: &T,
        interval_seconds: i64,
        parents: &[ParentRef],
    ) -> Result<()>
    where
        T: Serialize + Send + Sync;

    /// `interval = static_interval_seconds`; bumps on every successful
    /// `Get` (spec §3.2 invariant 3).
    async fn add_static<T>(
        &self,
        partition: Option<&str>,
        key: &str,
        value: &T,
        parents: &[ParentRef],
    ) -> Result<()>
    where
        T: Serialize + Send + Sync;

    /// `true` iff a valid (non-expired) entry exists. Never touches expiry.
    async fn contains(&self, partition: Option<&str>, key: &str) -> Result<bool>;

    /// Number of visible entries, scoped to `partition` if given.
    async fn count(&self, partition: Option<&str>, mode: CountMode) -> Result<i64>;

    /// Deserialize/decompress the value if a valid entry exists; bumps
    /// sliding/static expiry on a hit (spec §3.2 invariants 3-4). Readers
    /// downgrade `SerializationFailure`/`Corrupt` to `Ok(None)` per spec §7.
    async fn get<T>(&self, partition: Option<&str>, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send;

    /// Like `get`, but never mutates expiry. Fails with `NotSupported` if
    /// `can_peek()` is false.
    async fn peek<T>(&self, partition: Option<&str>, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send;

    /// `peek`'s untyped projection — expiry/interval/raw bytes, no decode.
    async fn peek_item(&self, partition: Option<&str>, key: &str) -> Result<Option<CacheValue>>;

    /// Deletes the entry and cascades to every descendant (spec §3.2
    /// invariant 6).
    async fn remove(&self, partition: Option<&str>, key: &str) -> Result<()>;

    /// `ConsiderExpiry` removes only expired rows in scope (cleanup);
    /// `IgnoreExpiry` removes everything in scope. Returns the count
    /// removed.
    async fn clear(&self, partition: Option<&str>, mode: CountMode) -> Result<i64>;

    /// Enumerate visible entries' decoded values (spec §4.1 `GetItems`).
    /// Bumps sliding/static expiry for each entry the same way `get` does,
    /// since each row is read via the same path.
    async fn get_items<T>(&self, partition: Option<&str>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send;

    /// Like `get_items`, but never mutates expiry (spec §4.1 `PeekItems`).
    async fn peek_items<T>(&self, partition: Option<&str>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send;

    /// Sum of `LENGTH(value)` over all entries, expired included (spec §9
    /// open question (b) preserves the source's behavior here).
    async fn get_cache_size_in_bytes(&self) -> Result<i64>;

    /// Whether this engine supports `Peek`/`PeekItem`/`PeekItems`.
    fn can_peek(&self) -> bool {
        true
    }

    /// The bounded off-path executor backing this engine's async mutators
    /// and background sliding bumps (spec §5/§C10).
    fn executor(&self) -> &FireAndForgetExecutor;

    // -- Default-derived operations --------------------------------------
    //
    // `GetOrAdd*` and the async (fire-and-forget) `Add*` variants are
    // expressed once, in terms of the required methods above, so neither
    // concrete engine has to repeat the composition (spec §4.1).

    /// Returns the existing valid value, or invokes `factory` and writes
    /// its result with `Timed` semantics. Concurrent callers with the same
    /// key may each invoke `factory`; only one upsert wins, but every
    /// caller observes a value (spec §4.1 — single-flight is explicitly
    /// not guaranteed; layer a per-hash mutex above this call if you need
    /// it, per spec §9 open question (a)).
    async fn get_or_add_timed<T, F, Fut>(
        &self,
        partition: Option<&str>,
        key: &str,
        utc_expiry: i64,
        parents: &[ParentRef],
        factory: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        if let Some(existing) = self.get::<T>(partition, key).await? {
            return Ok(existing);
        }
        let value = factory().await?;
        self.add_timed(partition, key, &value, utc_expiry, parents)
            .await?;
        Ok(value)
    }

    async fn get_or_add_sliding<T, F, Fut>(
        &self,
        partition: Option<&str>,
        key: &str,
        interval_seconds: i64,
        parents: &[ParentRef],
        factory: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        if let Some(existing) = self.get::<T>(partition, key).await? {
            return Ok(existing);
        }
        let value = factory().await?;
        self.add_sliding(partition, key, &value, interval_seconds, parents)
            .await?;
        Ok(value)
    }

    async fn get_or_add_static<T, F, Fut>(
        &self,
        partition: Option<&str>,
        key: &str,
        parents: &[ParentRef],
        factory: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        if let Some(existing) = self.get::<T>(partition, key).await? {
            return Ok(existing);
        }
        let value = factory().await?;
        self.add_static(partition, key, &value, parents).await?;
        Ok(value)
    }

    /// Fire-and-forget `add_timed`: returns immediately, the write runs on
    /// the bounded executor (spec §4.1's async mutator variants).
    async fn add_timed_async<T>(
        &self,
        partition: Option<String>,
        key: String,
        value: T,
        utc_expiry: i64,
        parents: Vec<ParentRef>,
    ) where
        T: Serialize + Send + Sync + 'static,
        Self: Clone + 'static,
    {
        let engine = self.clone();
        self.executor()
            .spawn_detached("add_timed_async", async move {
                engine
                    .add_timed(partition.as_deref(), &key, &value, utc_expiry, &parents)
                    .await
            })
            .await;
    }

    async fn add_sliding_async<T>(
        &self,
        partition: Option<String>,
        key: String,
        value: T,
        interval_seconds: i64,
        parents: Vec<ParentRef>,
    ) where
        T: Serialize + Send + Sync + 'static,
        Self: Clone + 'static,
    {
        let engine = self.clone();
        self.executor()
            .spawn_detached("add_sliding_async", async move {
                engine
                    .add_sliding(partition.as_deref(), &key, &value, interval_seconds, &parents)
                    .await
            })
            .await;
    }

    async fn add_static_async<T>(
        &self,
        partition: Option<String>,
        key: String,
        value: T,
        parents: Vec<ParentRef>,
    ) where
        T: Serialize + Send + Sync + 'static,
        Self: Clone + 'static,
    {
        let engine = self.clone();
        self.executor()
            .spawn_detached("add_static_async", async move {
                engine.add_static(partition.as_deref(), &key, &value, &parents).await
            })
            .await;
    }
}
