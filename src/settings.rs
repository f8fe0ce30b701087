/*!
C9 — the configuration surface (spec §6.2) plus the change-notification
mechanism required by spec §4.5: when `CacheSchemaName`/`CacheEntriesTableName`
change, dependents must re-read template SQL before the next operation
completes.

Builder shape follows the teacher's `XCacheBuilder` pattern
(`DiskCacheBuilder`, `RedisCacheBuilder`): construct via `Settings::builder()`,
set what differs from the defaults, `.build()`.
*/

use crate::compressor::DEFAULT_COMPRESSION_THRESHOLD_BYTES;
use crate::entry::MAX_PARENT_KEY_COUNT;
use std::sync::Arc;
use tokio::sync::watch;

/// Plain configuration record (spec §6.2's table).
#[derive(Debug, Clone)]
pub struct Settings {
    pub default_partition: String,
    pub static_interval_in_days: i64,
    pub insertion_count_before_cleanup: u64,
    pub max_cache_size_in_mb: u64,
    pub cache_schema_name: Option<String>,
    pub cache_entries_table_name: String,
    pub connection_string: String,
    pub cache_file: Option<String>,
    pub compression_threshold_bytes: usize,
    /// `soft_factor` from spec §4.2's size pass; recommended `0.8`.
    pub eviction_soft_factor: f64,
}

/// Compile-time constant exposed read-only per spec §6.2 (`N` in §3.1); not
/// part of [`Settings`] because it cannot change without invalidating the
/// on-disk schema's parent columns.
pub const MAX_PARENT_KEY_COUNT_PER_ITEM: usize = MAX_PARENT_KEY_COUNT;

impl Default for Settings {
    fn default() -> Self {
        Settings {
            default_partition: "default".to_string(),
            static_interval_in_days: 10,
            insertion_count_before_cleanup: 1000,
            max_cache_size_in_mb: 0,
            cache_schema_name: None,
            cache_entries_table_name: "kvl_cache_entries".to_string(),
            connection_string: String::new(),
            cache_file: None,
            compression_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD_BYTES,
            eviction_soft_factor: 0.8,
        }
    }
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    pub fn static_interval_seconds(&self) -> i64 {
        self.static_interval_in_days * 86_400
    }

    /// Schema-qualified table name, rebuilt whenever either component
    /// changes (spec §4.5).
    pub fn qualified_table_name(&self) -> String {
        match &self.cache_schema_name {
            Some(schema) => format!("{}.{}", schema, self.cache_entries_table_name),
            None => self.cache_entries_table_name.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SettingsBuilder {
    inner: Settings,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        SettingsBuilder {
            inner: Settings::default(),
        }
    }
}

impl SettingsBuilder {
    pub fn default_partition(mut self, partition: impl Into<String>) -> Self {
        self.inner.default_partition = partition.into();
        self
    }

    pub fn static_interval_in_days(mut self, days: i64) -> Self {
        self.inner.static_interval_in_days = days;
        self
    }

    pub fn insertion_count_before_cleanup(mut self, count: u64) -> Self {
        self.inner.insertion_count_before_cleanup = count;
        self
    }

    pub fn max_cache_size_in_mb(mut self, mb: u64) -> Self {
        self.inner.max_cache_size_in_mb = mb;
        self
    }

    pub fn cache_schema_name(mut self, schema: impl Into<String>) -> Self {
        self.inner.cache_schema_name = Some(schema.into());
        self
    }

    pub fn cache_entries_table_name(mut self, table: impl Into<String>) -> Self {
        self.inner.cache_entries_table_name = table.into();
        self
    }

    pub fn connection_string(mut self, cs: impl Into<String>) -> Self {
        self.inner.connection_string = cs.into();
        self
    }

    pub fn cache_file(mut self, path: impl Into<String>) -> Self {
        self.inner.cache_file = Some(path.into());
        self
    }

    pub fn compression_threshold_bytes(mut self, bytes: usize) -> Self {
        self.inner.compression_threshold_bytes = bytes;
        self
    }

    pub fn eviction_soft_factor(mut self, factor: f64) -> Self {
        self.inner.eviction_soft_factor = factor;
        self
    }

    pub fn build(self) -> Settings {
        self.inner
    }
}

/// A shared, observable `Settings` record.
///
/// `CacheEngine`s hold a clone of the receiver side; the owner of a
/// `SettingsHandle` can call [`SettingsHandle::update`] at any time and
/// every engine subscribed to it will see the new settings on its *next*
/// operation (spec §4.5's "delivered before the next operation completes" —
/// the engine re-borrows the latest settings at the top of every call
/// rather than caching a snapshot at construction time).
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<Settings>>,
    rx: watch::Receiver<Settings>,
}

impl SettingsHandle {
    pub fn new(initial: Settings) -> Self {
        let (tx, rx) = watch::channel(initial);
        SettingsHandle {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// The latest settings, as of the most recent `update` observed by this
    /// handle's clone lineage.
    pub fn current(&self) -> Settings {
        self.rx.borrow().clone()
    }

    /// Publish new settings. Every clone of this handle observes the change
    /// before its next `current()` call.
    pub fn update(&self, settings: Settings) {
        let _ = self.tx.send(settings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let s = Settings::builder()
            .default_partition("p1")
            .static_interval_in_days(5)
            .max_cache_size_in_mb(64)
            .build();
        assert_eq!(s.default_partition, "p1");
        assert_eq!(s.static_interval_seconds(), 5 * 86_400);
        assert_eq!(s.max_cache_size_in_mb, 64);
    }

    #[test]
    fn qualified_table_name_includes_schema_when_set() {
        let s = Settings::builder()
            .cache_schema_name("cache")
            .cache_entries_table_name("entries")
            .build();
        assert_eq!(s.qualified_table_name(), "cache.entries");
    }

    #[test]
    fn qualified_table_name_omits_schema_when_unset() {
        let s = Settings::builder().cache_entries_table_name("entries").build();
        assert_eq!(s.qualified_table_name(), "entries");
    }

    #[test]
    fn settings_handle_propagates_updates() {
        let handle = SettingsHandle::new(Settings::default());
        let reader = handle.clone();
        assert_eq!(
            reader.current().cache_entries_table_name,
            "kvl_cache_entries"
        );

        handle.update(Settings::builder().cache_entries_table_name("other").build());
        assert_eq!(reader.current().cache_entries_table_name, "other");
    }
}
