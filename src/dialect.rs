/*!
C6 (half 1) — dialect-specific SQL templates.

Backend connectors are external collaborators (spec §1): this module does
not open a connection, it only renders the SQL text a [`crate::connection`]
factory executes. The five dialects differ in exactly three places per spec
§1: identifier quoting, the upsert idiom, and a handful of type names in the
schema DDL — everything else (selects, deletes, counts) is portable enough
to share one template modulo placeholder style.

Parameter placeholders are rendered as `?` throughout, which is what
`sqlx::Any` expects — it rewrites them to each backend's native positional
syntax (`$1`, `@p1`, ...) at bind time, so the templates here stay
dialect-agnostic on that axis.
*/

use crate::entry::MAX_PARENT_KEY_COUNT;

/// The five backend dialects named in spec §1. Only [`Dialect::Postgres`],
/// [`Dialect::MySql`] and [`Dialect::Sqlite`] have a live executor in
/// [`crate::connection::SqlxConnectionFactory`] — those are the three
/// `sqlx::Any` itself supports. [`Dialect::SqlServer`] and
/// [`Dialect::Oracle`] templates are provided for completeness and for
/// connectors built outside this crate; attempting to execute them through
/// `SqlxConnectionFactory` returns [`crate::error::Error::NotSupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
    SqlServer,
    Oracle,
}

impl Dialect {
    /// Picks a dialect from a connection string's scheme, the way
    /// `sqlx::any::install_default_drivers` routing works.
    pub fn from_connection_string(cs: &str) -> Option<Dialect> {
        if cs.starts_with("postgres://") || cs.starts_with("postgresql://") {
            Some(Dialect::Postgres)
        } else if cs.starts_with("mysql://") {
            Some(Dialect::MySql)
        } else if cs.starts_with("sqlite://") || cs.starts_with("sqlite:") {
            Some(Dialect::Sqlite)
        } else if cs.starts_with("mssql://") || cs.starts_with("sqlserver://") {
            Some(Dialect::SqlServer)
        } else if cs.starts_with("oracle://") {
            Some(Dialect::Oracle)
        } else {
            None
        }
    }

    pub fn executable_by_sqlx_any(&self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::MySql | Dialect::Sqlite)
    }

    /// Quotes an identifier in this dialect's style. Used for the handful of
    /// KVLite column names (`key`, `value`, `interval`, `partition`) that
    /// collide with reserved words in at least one supported backend.
    fn quote_ident(&self, ident: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Oracle => format!("\"{}\"", ident),
            Dialect::MySql => format!("`{}`", ident),
            Dialect::Sqlite => format!("\"{}\"", ident),
            Dialect::SqlServer => format!("[{}]", ident),
        }
    }

    fn blob_type(&self) -> &'static str {
        match self {
            Dialect::Postgres => "BYTEA",
            Dialect::MySql => "MEDIUMBLOB",
            Dialect::Sqlite => "BLOB",
            Dialect::SqlServer => "VARBINARY(MAX)",
            Dialect::Oracle => "BLOB",
        }
    }

    fn autoincrement_pk(&self) -> &'static str {
        match self {
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
            Dialect::MySql => "BIGINT AUTO_INCREMENT PRIMARY KEY",
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::SqlServer => "BIGINT IDENTITY(1,1) PRIMARY KEY",
            Dialect::Oracle => "NUMBER GENERATED ALWAYS AS IDENTITY PRIMARY KEY",
        }
    }

    fn varchar(&self, len: usize) -> String {
        match self {
            Dialect::Oracle => format!("VARCHAR2({})", len),
            _ => format!("VARCHAR({})", len),
        }
    }
}

/// Rendered SQL text for one dialect + table name, built once (per spec
/// §4.5, rebuilt whenever schema/table settings change) and reused across
/// operations.
#[derive(Debug, Clone)]
pub struct SqlTemplates {
    pub dialect: Dialect,
    table: String,
}

impl SqlTemplates {
    pub fn new(dialect: Dialect, qualified_table_name: impl Into<String>) -> Self {
        SqlTemplates {
            dialect,
            table: qualified_table_name.into(),
        }
    }

    /// Quotes one of the reserved-word-risk column names (`key`, `value`,
    /// `interval`, `partition`); every other column is a safe bare
    /// identifier across all five dialects.
    fn col(&self, name: &str) -> String {
        self.dialect.quote_ident(name)
    }

    fn parent_hash_col(i: usize) -> String {
        format!("parent_hash_{}", i)
    }

    fn parent_key_col(i: usize) -> String {
        format!("parent_key_{}", i)
    }

    /// Required schema (spec §6.1): one table, `hash` unique, `(utc_expiry,
    /// partition)` composite, and one secondary index per `parent_hash_i`
    /// column. Returned as separate statements because several dialects do
    /// not allow `CREATE INDEX` inside the same batch as `CREATE TABLE`.
    pub fn create_schema(&self) -> Vec<String> {
        let d = self.dialect;
        let t = &self.table;
        let mut parent_cols = String::new();
        for i in 0..MAX_PARENT_KEY_COUNT {
            parent_cols.push_str(&format!(
                ",\n    {} BIGINT NULL,\n    {} {} NULL",
                Self::parent_hash_col(i),
                Self::parent_key_col(i),
                d.varchar(2000)
            ));
        }

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n    \
             id {pk},\n    \
             hash BIGINT NOT NULL,\n    \
             {partition} {varchar_part} NOT NULL,\n    \
             {key} {varchar_key} NOT NULL,\n    \
             utc_creation BIGINT NOT NULL,\n    \
             utc_expiry BIGINT NOT NULL,\n    \
             {interval} BIGINT NOT NULL,\n    \
             {value} {blob} NOT NULL,\n    \
             compressed BOOLEAN NOT NULL{parents}\n\
             )",
            table = t,
            pk = d.autoincrement_pk(),
            partition = self.col("partition"),
            varchar_part = d.varchar(2000),
            key = self.col("key"),
            varchar_key = d.varchar(2000),
            interval = self.col("interval"),
            value = self.col("value"),
            blob = d.blob_type(),
            parents = parent_cols,
        )];

        statements.push(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_{name}_hash ON {table} (hash)",
            name = Self::index_safe_name(t),
            table = t
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{name}_expiry_partition ON {table} (utc_expiry, {partition})",
            name = Self::index_safe_name(t),
            table = t,
            partition = self.col("partition"),
        ));
        for i in 0..MAX_PARENT_KEY_COUNT {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{name}_parent_hash_{i} ON {table} ({col})",
                name = Self::index_safe_name(t),
                i = i,
                table = t,
                col = Self::parent_hash_col(i)
            ));
        }
        statements
    }

    fn index_safe_name(table: &str) -> String {
        table.replace(['.', '"', '`', '[', ']'], "_")
    }

    /// The atomic upsert (spec §4.1's "Upsert (atomic write)"). All
    /// non-identity columns are overwritten on conflict; parent columns
    /// absent from the write are bound as `NULL` by the caller.
    pub fn upsert(&self) -> String {
        let t = &self.table;
        let parent_cols: Vec<String> = (0..MAX_PARENT_KEY_COUNT)
            .flat_map(|i| vec![Self::parent_hash_col(i), Self::parent_key_col(i)])
            .collect();
        // (raw name, rendered identifier) — the raw name drives bind order
        // and comparisons, the rendered identifier is what goes in the SQL.
        let all_cols: Vec<(String, String)> = {
            let mut v = vec![
                ("hash".to_string(), "hash".to_string()),
                ("partition".to_string(), self.col("partition")),
                ("key".to_string(), self.col("key")),
                ("utc_creation".to_string(), "utc_creation".to_string()),
                ("utc_expiry".to_string(), "utc_expiry".to_string()),
                ("interval".to_string(), self.col("interval")),
                ("value".to_string(), self.col("value")),
                ("compressed".to_string(), "compressed".to_string()),
            ];
            v.extend(parent_cols.iter().map(|c| (c.clone(), c.clone())));
            v
        };
        let col_list: Vec<&str> = all_cols.iter().map(|(_, rendered)| rendered.as_str()).collect();
        let placeholders: Vec<&str> = all_cols.iter().map(|_| "?").collect();
        let update_assignments: Vec<String> = all_cols
            .iter()
            .filter(|(raw, _)| raw != "hash")
            .map(|(_, rendered)| format!("{col} = EXCLUDED.{col}", col = rendered))
            .collect();

        match self.dialect {
            Dialect::Postgres | Dialect::Sqlite => format!(
                "INSERT INTO {table} ({cols}) VALUES ({vals}) \
                 ON CONFLICT (hash) DO UPDATE SET {updates}",
                table = t,
                cols = col_list.join(", "),
                vals = placeholders.join(", "),
                updates = update_assignments.join(", "),
            ),
            Dialect::MySql => {
                let updates: Vec<String> = all_cols
                    .iter()
                    .filter(|(raw, _)| raw != "hash")
                    .map(|(_, rendered)| format!("{col} = VALUES({col})", col = rendered))
                    .collect();
                format!(
                    "INSERT INTO {table} ({cols}) VALUES ({vals}) \
                     ON DUPLICATE KEY UPDATE {updates}",
                    table = t,
                    cols = col_list.join(", "),
                    vals = placeholders.join(", "),
                    updates = updates.join(", "),
                )
            }
            Dialect::SqlServer => {
                // Two-statement idiom (spec §4.1): UPDATE first, INSERT only
                // if no row matched. Executed inside one transaction by the
                // caller; sqlx::Any cannot run this (no mssql support), so
                // this template exists for an external connector only.
                let set_clause: Vec<String> = all_cols
                    .iter()
                    .filter(|(raw, _)| raw != "hash")
                    .map(|(_, rendered)| format!("{col} = ?", col = rendered))
                    .collect();
                format!(
                    "UPDATE {table} SET {sets} WHERE hash = ?; \
                     IF @@ROWCOUNT = 0 INSERT INTO {table} ({cols}) VALUES ({vals})",
                    table = t,
                    sets = set_clause.join(", "),
                    cols = col_list.join(", "),
                    vals = placeholders.join(", "),
                )
            }
            Dialect::Oracle => {
                // MERGE, per spec §9 open question (c): the source's
                // `INSERT ... ; ON DUPLICATE KEY` idiom is not valid Oracle
                // syntax and is treated as a defect rather than replicated.
                let update_set: Vec<String> = all_cols
                    .iter()
                    .filter(|(raw, _)| raw != "hash")
                    .map(|(_, rendered)| format!("target.{col} = source.{col}", col = rendered))
                    .collect();
                format!(
                    "MERGE INTO {table} target \
                     USING (SELECT ? AS hash FROM dual) source \
                     ON (target.hash = source.hash) \
                     WHEN MATCHED THEN UPDATE SET {updates} \
                     WHEN NOT MATCHED THEN INSERT ({cols}) VALUES ({vals})",
                    table = t,
                    updates = update_set.join(", "),
                    cols = col_list.join(", "),
                    vals = placeholders.join(", "),
                )
            }
        }
    }

    pub fn select_value_by_hash(&self) -> String {
        format!(
            "SELECT utc_expiry, {interval}, {value}, compressed FROM {table} WHERE hash = ?",
            interval = self.col("interval"),
            value = self.col("value"),
            table = self.table
        )
    }

    fn parent_select_list(&self) -> String {
        (0..MAX_PARENT_KEY_COUNT)
            .map(|i| format!("{}, {}", Self::parent_hash_col(i), Self::parent_key_col(i)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn contains_by_hash(&self) -> String {
        format!(
            "SELECT 1 FROM {table} WHERE hash = ? AND utc_expiry >= ?",
            table = self.table
        )
    }

    pub fn update_expiry_by_hash(&self) -> String {
        format!(
            "UPDATE {table} SET utc_expiry = ? WHERE hash = ?",
            table = self.table
        )
    }

    pub fn delete_by_hash(&self) -> String {
        format!("DELETE FROM {table} WHERE hash = ?", table = self.table)
    }

    /// One statement per parent slot `i`; the engine's cascade walk runs
    /// these across all slots so every advisory parent column is checked
    /// (spec §4.1 "Parent cascade").
    pub fn select_children_by_parent_hash(&self, parent_index: usize) -> String {
        format!(
            "SELECT hash FROM {table} WHERE {col} = ?",
            table = self.table,
            col = Self::parent_hash_col(parent_index),
        )
    }

    pub fn count_all(&self, mode_expiry_clause: bool) -> String {
        if mode_expiry_clause {
            format!(
                "SELECT COUNT(*) FROM {table} WHERE utc_expiry >= ?",
                table = self.table
            )
        } else {
            format!("SELECT COUNT(*) FROM {table}", table = self.table)
        }
    }

    pub fn count_partition(&self, mode_expiry_clause: bool) -> String {
        let partition = self.col("partition");
        if mode_expiry_clause {
            format!(
                "SELECT COUNT(*) FROM {table} WHERE {partition} = ? AND utc_expiry >= ?",
                table = self.table,
                partition = partition,
            )
        } else {
            format!(
                "SELECT COUNT(*) FROM {table} WHERE {partition} = ?",
                table = self.table,
                partition = partition,
            )
        }
    }

    pub fn size_in_bytes(&self) -> String {
        // Spec §9 open question (b): expired rows are included.
        format!(
            "SELECT COALESCE(SUM(LENGTH({value})), 0) FROM {table}",
            value = self.col("value"),
            table = self.table
        )
    }

    /// Candidate rows for the eviction size pass (spec §4.2), oldest
    /// `utc_expiry` first so the pass evicts the entries closest to expiry
    /// before anything with a strictly later expiry.
    pub fn select_candidates_for_size_pass(&self) -> String {
        format!(
            "SELECT hash, {value} FROM {table} ORDER BY utc_expiry ASC LIMIT ?",
            value = self.col("value"),
            table = self.table
        )
    }

    /// Hashes matching a `Clear`/cascade scope: all rows in `partition` (or
    /// the whole table), optionally restricted to expired rows.
    pub fn select_hashes(&self, partition_clause: bool, expiry_clause: bool) -> String {
        let partition = self.col("partition");
        match (partition_clause, expiry_clause) {
            (true, true) => format!(
                "SELECT hash FROM {table} WHERE {partition} = ? AND utc_expiry < ?",
                table = self.table,
                partition = partition,
            ),
            (true, false) => format!(
                "SELECT hash FROM {table} WHERE {partition} = ?",
                table = self.table,
                partition = partition,
            ),
            (false, true) => format!(
                "SELECT hash FROM {table} WHERE utc_expiry < ?",
                table = self.table
            ),
            (false, false) => format!("SELECT hash FROM {table}", table = self.table),
        }
    }

    pub fn select_items(&self, partition_clause: bool) -> String {
        let partition = self.col("partition");
        let key = self.col("key");
        let interval = self.col("interval");
        let value = self.col("value");
        let parents = self.parent_select_list();
        if partition_clause {
            format!(
                "SELECT hash, {partition}, {key}, utc_creation, utc_expiry, {interval}, {value}, compressed, {parents} \
                 FROM {table} WHERE {partition} = ? AND utc_expiry >= ? ORDER BY id ASC",
                partition = partition,
                key = key,
                interval = interval,
                value = value,
                parents = parents,
                table = self.table,
            )
        } else {
            format!(
                "SELECT hash, {partition}, {key}, utc_creation, utc_expiry, {interval}, {value}, compressed, {parents} \
                 FROM {table} WHERE utc_expiry >= ? ORDER BY id ASC",
                partition = partition,
                key = key,
                interval = interval,
                value = value,
                parents = parents,
                table = self.table,
            )
        }
    }
}
