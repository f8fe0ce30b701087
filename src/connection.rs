/*!
C6 (half 2) — connection factory: opens pooled connections and executes the
dialect templates from [`crate::dialect`].

[`SqlxConnectionFactory`] is the one connector this crate ships fully wired
up, built on `sqlx::Any` so a single implementation serves Postgres, MySQL
and SQLite (the three dialects `sqlx::Any` itself drives); SQL Server and
Oracle connectors are external per spec §1 and return
[`crate::error::Error::NotSupported`] here.
*/

use crate::dialect::{Dialect, SqlTemplates};
use crate::entry::{CacheEntry, CacheValue, CountMode, ParentRef, MAX_PARENT_KEY_COUNT};
use crate::error::{Error, Result};
use crate::settings::SettingsHandle;
use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

/// Everything a [`crate::engine::db::DbCacheEngine`] needs from a backend:
/// open connections, and execute the dialect's SQL templates. Kept narrow
/// and table-shaped (rather than exposing a raw `Executor`) so swapping
/// connectors never requires touching engine code.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    fn can_peek(&self) -> bool {
        true
    }

    async fn ensure_schema(&self) -> Result<()>;
    async fn upsert(&self, entry: &CacheEntry) -> Result<()>;
    async fn select_value(&self, hash: i64) -> Result<Option<CacheValue>>;
    async fn contains(&self, hash: i64, now: i64) -> Result<bool>;
    async fn update_expiry(&self, hash: i64, new_expiry: i64) -> Result<()>;
    async fn delete_by_hash(&self, hash: i64) -> Result<u64>;
    /// Hashes of every row whose `parent_hash_i = hash` for any slot `i`.
    async fn children_of(&self, hash: i64) -> Result<Vec<i64>>;
    /// Hashes in scope for a `Clear` call, before cascade: all rows in
    /// `partition` (or the whole table) when `mode` is `IgnoreExpiry`, or
    /// only the expired ones when `mode` is `ConsiderExpiry`. Both `clear`
    /// and the eviction passes route through this plus
    /// `delete_by_hash`/`children_of` rather than a direct bulk delete, so
    /// the parent cascade (spec §3.2 invariant 6) is never bypassed.
    async fn select_hashes_for_clear(
        &self,
        partition: Option<&str>,
        mode: CountMode,
        now: i64,
    ) -> Result<Vec<i64>>;
    async fn count_all(&self, mode: CountMode, now: i64) -> Result<i64>;
    async fn count_partition(&self, partition: &str, mode: CountMode, now: i64) -> Result<i64>;
    async fn size_in_bytes(&self) -> Result<i64>;
    /// `(hash, size_in_bytes)` pairs, oldest `utc_expiry` first, for the
    /// eviction size pass (spec §4.2).
    async fn candidates_for_size_pass(&self, limit: i64) -> Result<Vec<(i64, i64)>>;
    async fn select_items(&self, partition: Option<&str>, now: i64) -> Result<Vec<CacheEntry>>;
}

/// Connector built on `sqlx::Any`, covering Postgres/MySQL/SQLite.
pub struct SqlxConnectionFactory {
    pool: AnyPool,
    dialect: Dialect,
    settings: SettingsHandle,
}

impl SqlxConnectionFactory {
    /// Connects using `settings.current().connection_string`, picking a
    /// dialect from its scheme (spec §6.1/§6.2). Returns
    /// [`Error::NotSupported`] for SQL Server/Oracle connection strings —
    /// those dialects have no `sqlx::Any` executor.
    pub async fn connect(settings: SettingsHandle) -> Result<Self> {
        let cs = settings.current().connection_string;
        let dialect = Dialect::from_connection_string(&cs).ok_or_else(|| {
            Error::invalid_argument(format!("unrecognized connection string scheme: {cs}"))
        })?;
        if !dialect.executable_by_sqlx_any() {
            return Err(Error::not_supported(format!(
                "{:?} has no sqlx::Any executor; bring your own ConnectionFactory",
                dialect
            )));
        }
        let pool = AnyPoolOptions::new()
            .max_connections(10)
            .connect(&cs)
            .await?;
        Ok(SqlxConnectionFactory {
            pool,
            dialect,
            settings,
        })
    }

    fn templates(&self) -> SqlTemplates {
        SqlTemplates::new(self.dialect, self.settings.current().qualified_table_name())
    }

    fn row_to_entry(row: AnyRow) -> std::result::Result<CacheEntry, sqlx::Error> {
        let mut parents = Vec::with_capacity(MAX_PARENT_KEY_COUNT);
        for i in 0..MAX_PARENT_KEY_COUNT {
            let hash: Option<i64> = row.try_get(format!("parent_hash_{}", i).as_str())?;
            let key: Option<String> = row.try_get(format!("parent_key_{}", i).as_str())?;
            parents.push(match (hash, key) {
                (Some(h), Some(k)) => Some(ParentRef { hash: h, key: k }),
                _ => None,
            });
        }
        Ok(CacheEntry {
            hash: row.try_get("hash")?,
            partition: row.try_get("partition")?,
            key: row.try_get("key")?,
            utc_creation: row.try_get("utc_creation")?,
            utc_expiry: row.try_get("utc_expiry")?,
            interval: row.try_get("interval")?,
            value: row.try_get("value")?,
            compressed: row.try_get("compressed")?,
            parents,
        })
    }
}

#[async_trait]
impl ConnectionFactory for SqlxConnectionFactory {
    async fn ensure_schema(&self) -> Result<()> {
        let templates = self.templates();
        let mut tx = self.pool.begin().await?;
        for statement in templates.create_schema() {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let templates = self.templates();
        let sql = templates.upsert();
        let mut tx = self.pool.begin().await?;
        let mut query = sqlx::query(&sql)
            .bind(entry.hash)
            .bind(&entry.partition)
            .bind(&entry.key)
            .bind(entry.utc_creation)
            .bind(entry.utc_expiry)
            .bind(entry.interval)
            .bind(&entry.value)
            .bind(entry.compressed);
        for i in 0..MAX_PARENT_KEY_COUNT {
            let parent = entry.parents.get(i).and_then(|p| p.as_ref());
            query = query
                .bind(parent.map(|p| p.hash))
                .bind(parent.map(|p| p.key.clone()));
        }
        query.execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn select_value(&self, hash: i64) -> Result<Option<CacheValue>> {
        let templates = self.templates();
        let row = sqlx::query(&templates.select_value_by_hash())
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(CacheValue {
                utc_expiry: row.try_get("utc_expiry")?,
                interval: row.try_get("interval")?,
                value: row.try_get("value")?,
                compressed: row.try_get("compressed")?,
            })),
            None => Ok(None),
        }
    }

    async fn contains(&self, hash: i64, now: i64) -> Result<bool> {
        let templates = self.templates();
        let row = sqlx::query(&templates.contains_by_hash())
            .bind(hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn update_expiry(&self, hash: i64, new_expiry: i64) -> Result<()> {
        let templates = self.templates();
        sqlx::query(&templates.update_expiry_by_hash())
            .bind(new_expiry)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_hash(&self, hash: i64) -> Result<u64> {
        let templates = self.templates();
        let result = sqlx::query(&templates.delete_by_hash())
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn children_of(&self, hash: i64) -> Result<Vec<i64>> {
        let templates = self.templates();
        let mut children = Vec::new();
        for slot in 0..MAX_PARENT_KEY_COUNT {
            let sql = templates.select_children_by_parent_hash(slot);
            let rows = sqlx::query(&sql).bind(hash).fetch_all(&self.pool).await?;
            for row in rows {
                children.push(row.try_get::<i64, _>("hash")?);
            }
        }
        Ok(children)
    }

    async fn select_hashes_for_clear(
        &self,
        partition: Option<&str>,
        mode: CountMode,
        now: i64,
    ) -> Result<Vec<i64>> {
        let templates = self.templates();
        let considers_expiry = mode == CountMode::ConsiderExpiry;
        let sql = templates.select_hashes(partition.is_some(), considers_expiry);
        let rows = match (partition, considers_expiry) {
            (Some(p), true) => {
                sqlx::query(&sql)
                    .bind(p)
                    .bind(now)
                    .fetch_all(&self.pool)
                    .await?
            }
            (Some(p), false) => sqlx::query(&sql).bind(p).fetch_all(&self.pool).await?,
            (None, true) => sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?,
            (None, false) => sqlx::query(&sql).fetch_all(&self.pool).await?,
        };
        rows.into_iter()
            .map(|row| Ok(row.try_get::<i64, _>("hash")?))
            .collect()
    }

    async fn count_all(&self, mode: CountMode, now: i64) -> Result<i64> {
        let templates = self.templates();
        let considers_expiry = mode == CountMode::ConsiderExpiry;
        let sql = templates.count_all(considers_expiry);
        let row = if considers_expiry {
            sqlx::query(&sql).bind(now).fetch_one(&self.pool).await?
        } else {
            sqlx::query(&sql).fetch_one(&self.pool).await?
        };
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn count_partition(&self, partition: &str, mode: CountMode, now: i64) -> Result<i64> {
        let templates = self.templates();
        let considers_expiry = mode == CountMode::ConsiderExpiry;
        let sql = templates.count_partition(considers_expiry);
        let row = if considers_expiry {
            sqlx::query(&sql)
                .bind(partition)
                .bind(now)
                .fetch_one(&self.pool)
                .await?
        } else {
            sqlx::query(&sql)
                .bind(partition)
                .fetch_one(&self.pool)
                .await?
        };
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn size_in_bytes(&self) -> Result<i64> {
        let templates = self.templates();
        let row = sqlx::query(&templates.size_in_bytes())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn candidates_for_size_pass(&self, limit: i64) -> Result<Vec<(i64, i64)>> {
        let templates = self.templates();
        let rows = sqlx::query(&templates.select_candidates_for_size_pass())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let hash: i64 = row.try_get("hash")?;
            let value: Vec<u8> = row.try_get("value")?;
            out.push((hash, value.len() as i64));
        }
        Ok(out)
    }

    async fn select_items(&self, partition: Option<&str>, now: i64) -> Result<Vec<CacheEntry>> {
        let templates = self.templates();
        let sql = templates.select_items(partition.is_some());
        let rows = match partition {
            Some(p) => {
                sqlx::query(&sql)
                    .bind(p)
                    .bind(now)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?,
        };
        rows.into_iter()
            .map(|row| Self::row_to_entry(row).map_err(|e| Error::Corrupt(e.to_string())))
            .collect()
    }
}
