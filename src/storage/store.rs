//! The aggregation store.
//!
//! A [`Store`] owns one connection pool to one database file and one table
//! of time buckets. Samples are merged into buckets as running sums and
//! counts; queries report the per-bucket mean.
//!
//! Read-write stores hold a single pooled connection, so writers are
//! serialized by the pool itself. Read-only stores hold several and never
//! touch schema or data.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;

use super::driver::{AccessMode, Backend};
use super::pool::{BucketRow, ConnectionPool, EngineError, MergeStatements};
use super::schema::{self, MASTER_MERGES_COLUMN, PREFIX_MERGE, PREFIX_VALUE};
use crate::now_secs;
use crate::observability::metrics::{record_submit, Outcome};

/// Default time to wait for a pooled connection.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    #[error("schema error in `{statement}`: {source}")]
    Schema {
        statement: String,
        #[source]
        source: EngineError,
    },

    #[error("cannot modify read-only store")]
    Permission,

    #[error("query failed: {0}")]
    Query(#[source] EngineError),

    #[error("store is closed")]
    Closed,
}

/// Parameters for opening a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub backend: Backend,
    /// Database name; the file is `<base_path>/<database>.<ext>`
    pub database: String,
    /// Table written by this store
    pub table: String,
    pub base_path: PathBuf,
    pub mode: AccessMode,
    /// Share one `merges` column across all fields
    pub master_merges: bool,
    pub connection_timeout: Duration,
}

impl StoreOptions {
    /// Read-write, per-field merge columns.
    pub fn new(
        backend: Backend,
        database: impl Into<String>,
        table: impl Into<String>,
        base_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            database: database.into(),
            table: table.into(),
            base_path: base_path.into(),
            mode: AccessMode::ReadWrite,
            master_merges: false,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }

    pub fn mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn read_only(self) -> Self {
        self.mode(AccessMode::ReadOnly)
    }

    pub fn master_merges(mut self, enabled: bool) -> Self {
        self.master_merges = enabled;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Path of the database file.
    pub fn path(&self) -> PathBuf {
        self.base_path.join(format!(
            "{}.{}",
            self.database,
            self.backend.file_extension()
        ))
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.database.is_empty() {
            return Err(StoreError::Configuration("database name cannot be empty".into()));
        }
        if self.database.contains(['/', '\\']) || self.database == ".." {
            return Err(StoreError::Configuration(format!(
                "database name must not contain path separators: {}",
                self.database
            )));
        }
        if self.table.is_empty() {
            return Err(StoreError::Configuration("table name cannot be empty".into()));
        }
        Ok(())
    }
}

/// Per-bucket means, ordered by ascending time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub timestamps: Vec<i64>,
    pub means: Vec<i64>,
}

impl QueryResult {
    fn from_rows(rows: Vec<BucketRow>) -> Self {
        let mut result = Self {
            timestamps: Vec::with_capacity(rows.len()),
            means: Vec::with_capacity(rows.len()),
        };
        for (time, sum, count) in rows {
            result.timestamps.push(time);
            result.means.push(mean(sum, count));
        }
        result
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Integer mean of a bucket; zero when nothing was merged.
pub fn mean(sum: i64, count: i64) -> i64 {
    if count > 0 {
        sum / count
    } else {
        0
    }
}

/// A time-bucketed aggregation store over one database file.
pub struct Store {
    backend: Backend,
    database: String,
    table: String,
    path: PathBuf,
    mode: AccessMode,
    master_merges: bool,
    /// `None` once closed
    pool: RwLock<Option<ConnectionPool>>,
    /// Fields whose columns are known to exist
    fields: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("backend", &self.backend)
            .field("database", &self.database)
            .field("table", &self.table)
            .field("mode", &self.mode)
            .field("master_merges", &self.master_merges)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Store {
    /// Open or create the database file and, for read-write stores, the
    /// table.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Configuration`] for empty or path-like names
    /// - [`StoreError::StorageUnavailable`] if the directory, file or
    ///   connection cannot be opened, or the liveness check fails
    /// - [`StoreError::Schema`] if the table cannot be created
    pub fn open(options: StoreOptions) -> Result<Self, StoreError> {
        options.validate()?;
        let path = options.path();
        let unavailable = |source: EngineError| StoreError::StorageUnavailable {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&options.base_path).map_err(|e| unavailable(e.into()))?;

        if options.mode.is_read_only() && !path.exists() {
            return Err(unavailable(
                io::Error::new(io::ErrorKind::NotFound, "database file does not exist").into(),
            ));
        }

        let pool = ConnectionPool::open(
            options.backend,
            &path,
            options.mode,
            options.connection_timeout,
        )
        .map_err(unavailable)?;
        pool.ping().map_err(unavailable)?;

        let mut fields = HashSet::new();
        if !options.mode.is_read_only() {
            let statement = schema::create_table_sql(options.backend, &options.table);
            pool.execute(&statement)
                .map_err(|source| StoreError::Schema { statement, source })?;

            if options.master_merges {
                ensure_column(
                    &pool,
                    options.backend,
                    &options.table,
                    MASTER_MERGES_COLUMN,
                    options.backend.merge_column_type(),
                )?;
            }

            let columns = pool
                .column_names(options.backend.columns_query(), &options.table)
                .map_err(StoreError::Query)?;
            fields = known_fields(&columns, options.master_merges);
        }

        tracing::info!(
            database = %options.database,
            table = %options.table,
            backend = %options.backend,
            path = %path.display(),
            read_only = options.mode.is_read_only(),
            master_merges = options.master_merges,
            pool_size = pool.max_size(),
            "Opened store"
        );

        Ok(Self {
            backend: options.backend,
            database: options.database,
            table: options.table,
            path,
            mode: options.mode,
            master_merges: options.master_merges,
            pool: RwLock::new(Some(pool)),
            fields: Mutex::new(fields),
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.mode.is_read_only()
    }

    pub fn master_merges(&self) -> bool {
        self.master_merges
    }

    pub fn is_closed(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Ensure the columns for `key` exist.
    ///
    /// "Column already exists" counts as success. Any other schema failure
    /// is logged and swallowed; the field stays unusable, so later submits
    /// for it fail until the schema is repaired.
    ///
    /// # Errors
    ///
    /// [`StoreError::Permission`] on a read-only store,
    /// [`StoreError::Closed`] after [`Store::close`].
    pub fn add_field(&self, key: &str) -> Result<(), StoreError> {
        let pool = self.pool()?;
        self.ensure_writable()?;
        if self.has_field(key) {
            return Ok(());
        }

        match self.create_field_columns(&pool, key) {
            Ok(()) => {
                self.fields
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key.to_string());
                tracing::debug!(table = %self.table, field = key, "Field ready");
            }
            Err(StoreError::Schema { statement, source }) => {
                tracing::error!(
                    database = %self.database,
                    table = %self.table,
                    field = key,
                    statement = %statement,
                    error = %source,
                    "Failed to add field"
                );
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Merge one sample into the bucket at `time`.
    ///
    /// Creates the field's columns on first use. The bucket insert and the
    /// sum/count update commit together or not at all.
    ///
    /// # Errors
    ///
    /// [`StoreError::Permission`] on a read-only store,
    /// [`StoreError::Closed`] after close, [`StoreError::Query`] when a
    /// statement fails or the running sum would overflow (the transaction
    /// is rolled back).
    pub fn submit(&self, time: i64, key: &str, value: i64) -> Result<(), StoreError> {
        let result = self.merge(time, key, value);
        let outcome = match &result {
            Ok(()) => Outcome::Ok,
            Err(StoreError::Query(_)) => Outcome::RolledBack,
            Err(StoreError::Permission | StoreError::Closed) => Outcome::Rejected,
            Err(_) => Outcome::Error,
        };
        record_submit(&self.database, outcome);
        result
    }

    fn merge(&self, time: i64, key: &str, value: i64) -> Result<(), StoreError> {
        let pool = self.pool()?;
        self.ensure_writable()?;
        if !self.has_field(key) {
            self.add_field(key)?;
        }

        let statements = MergeStatements {
            insert: schema::insert_bucket_sql(&self.table),
            select_sum: schema::select_sum_sql(&self.table, key),
            update: schema::update_bucket_sql(&self.table, key, self.master_merges),
        };
        pool.merge_sample(&statements, time, value)
            .map_err(|e| {
                tracing::warn!(
                    database = %self.database,
                    table = %self.table,
                    field = key,
                    time,
                    error = %e,
                    "Submit rolled back"
                );
                StoreError::Query(e)
            })
    }

    /// Per-bucket means of `field` in `table` for buckets newer than
    /// `since_seconds` ago.
    ///
    /// A table or field that does not exist yields an empty result.
    pub fn query(
        &self,
        table: &str,
        field: &str,
        since_seconds: i64,
    ) -> Result<QueryResult, StoreError> {
        let pool = self.pool()?;

        let columns = pool
            .column_names(self.backend.columns_query(), table)
            .map_err(StoreError::Query)?;
        let value_column = schema::value_column(field);
        let merge_column = schema::merge_column(field, self.master_merges);
        if !columns.contains(&value_column) || !columns.contains(&merge_column) {
            return Ok(QueryResult::default());
        }

        let cutoff = now_secs().saturating_sub(since_seconds);
        let sql = schema::select_buckets_sql(table, &value_column, &merge_column);
        let rows = pool
            .select_buckets(&sql, cutoff)
            .map_err(StoreError::Query)?;

        tracing::trace!(table, field, rows = rows.len(), "Query complete");
        Ok(QueryResult::from_rows(rows))
    }

    /// Release the connection pool. Idempotent.
    pub fn close(&self) {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if pool.is_some() {
            tracing::info!(database = %self.database, "Closed store");
        }
    }

    fn pool(&self) -> Result<ConnectionPool, StoreError> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StoreError::Closed)
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.mode.is_read_only() {
            return Err(StoreError::Permission);
        }
        Ok(())
    }

    fn has_field(&self, key: &str) -> bool {
        self.fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn create_field_columns(&self, pool: &ConnectionPool, key: &str) -> Result<(), StoreError> {
        ensure_column(
            pool,
            self.backend,
            &self.table,
            &schema::value_column(key),
            self.backend.value_column_type(),
        )?;
        if !self.master_merges {
            ensure_column(
                pool,
                self.backend,
                &self.table,
                &schema::merge_column(key, false),
                self.backend.merge_column_type(),
            )?;
        }
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close();
    }
}

/// Add a column, treating "already exists" as success.
fn ensure_column(
    pool: &ConnectionPool,
    backend: Backend,
    table: &str,
    column: &str,
    column_type: &str,
) -> Result<(), StoreError> {
    let statement = schema::add_column_sql(table, column, column_type);
    match pool.execute(&statement) {
        Ok(()) => Ok(()),
        Err(e) if backend.is_duplicate_column(&e.to_string()) => Ok(()),
        Err(source) => Err(StoreError::Schema { statement, source }),
    }
}

/// Field keys whose columns are all present.
fn known_fields(columns: &HashSet<String>, master_merges: bool) -> HashSet<String> {
    columns
        .iter()
        .filter_map(|column| column.strip_prefix(PREFIX_VALUE))
        .filter(|key| {
            if master_merges {
                columns.contains(MASTER_MERGES_COLUMN)
            } else {
                columns.contains(&format!("{PREFIX_MERGE}{key}"))
            }
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    const ALL_TIME: i64 = i64::MAX;

    fn open_store(dir: &TempDir) -> Store {
        Store::open(StoreOptions::new(Backend::Sqlite, "metrics", "host", dir.path())).unwrap()
    }

    #[test]
    fn test_open_creates_directory_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("nested/dir");

        let store =
            Store::open(StoreOptions::new(Backend::Sqlite, "metrics", "host", &base)).unwrap();
        assert!(base.join("metrics.sqlite").exists());
        assert_eq!(store.path(), base.join("metrics.sqlite"));
        assert!(!store.is_read_only());
    }

    #[test]
    fn test_open_rejects_bad_names() {
        let temp_dir = TempDir::new().unwrap();
        let empty = Store::open(StoreOptions::new(Backend::Sqlite, "", "host", temp_dir.path()));
        assert!(matches!(empty, Err(StoreError::Configuration(_))));

        let nested = Store::open(StoreOptions::new(
            Backend::Sqlite,
            "a/b",
            "host",
            temp_dir.path(),
        ));
        assert!(matches!(nested, Err(StoreError::Configuration(_))));
    }

    #[test]
    fn test_read_only_open_of_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = Store::open(
            StoreOptions::new(Backend::Sqlite, "absent", "host", temp_dir.path()).read_only(),
        );
        assert!(matches!(result, Err(StoreError::StorageUnavailable { .. })));
    }

    #[test]
    fn test_submit_averages_bucket() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.submit(100, "cpu", 50).unwrap();
        store.submit(100, "cpu", 30).unwrap();

        let result = store.query("host", "cpu", ALL_TIME).unwrap();
        assert_eq!(result.timestamps, vec![100]);
        assert_eq!(result.means, vec![40]);
    }

    #[test]
    fn test_repeated_submits_keep_one_row_per_time() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        for value in [1, 2, 3, 4] {
            store.submit(500, "cpu", value).unwrap();
        }
        store.submit(400, "cpu", 9).unwrap();

        let result = store.query("host", "cpu", ALL_TIME).unwrap();
        assert_eq!(result.timestamps, vec![400, 500]);
        assert_eq!(result.means, vec![9, 2]);
    }

    #[test]
    fn test_results_are_ordered_by_time() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        for time in [300, 100, 200, 50, 250] {
            store.submit(time, "cpu", time).unwrap();
        }

        let result = store.query("host", "cpu", ALL_TIME).unwrap();
        assert_eq!(result.timestamps, vec![50, 100, 200, 250, 300]);
        assert!(result.timestamps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(result.means, result.timestamps);
    }

    #[test]
    fn test_zero_merge_count_reports_zero_mean() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.submit(100, "cpu", 10).unwrap();
        store.add_field("mem").unwrap();

        let result = store.query("host", "mem", ALL_TIME).unwrap();
        assert_eq!(result.timestamps, vec![100]);
        assert_eq!(result.means, vec![0]);
    }

    #[test]
    fn test_add_field_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.add_field("cpu").unwrap();
        store.add_field("cpu").unwrap();

        let columns = store
            .pool()
            .unwrap()
            .column_names(Backend::Sqlite.columns_query(), "host")
            .unwrap();
        let mut names: Vec<_> = columns.into_iter().collect();
        names.sort();
        assert_eq!(names, vec!["M_cpu", "V_cpu", "time"]);
    }

    #[test]
    fn test_add_field_tolerates_existing_columns_from_another_instance() {
        let temp_dir = TempDir::new().unwrap();
        {
            let first = open_store(&temp_dir);
            first.add_field("cpu").unwrap();
        }
        let second = open_store(&temp_dir);
        // Columns already exist on disk; the second instance must not fail.
        second.add_field("cpu").unwrap();
        second.submit(10, "cpu", 4).unwrap();
        assert_eq!(second.query("host", "cpu", ALL_TIME).unwrap().means, vec![4]);
    }

    #[test]
    fn test_unknown_field_returns_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        store.submit(100, "cpu", 1).unwrap();

        assert!(store.query("host", "disk", ALL_TIME).unwrap().is_empty());
        assert!(store.query("no_such_table", "cpu", ALL_TIME).unwrap().is_empty());
    }

    #[test]
    fn test_query_window_excludes_old_buckets() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let now = now_secs();

        store.submit(now - 7200, "cpu", 1).unwrap();
        store.submit(now - 10, "cpu", 2).unwrap();

        let result = store.query("host", "cpu", 3600).unwrap();
        assert_eq!(result.timestamps, vec![now - 10]);
        assert_eq!(result.means, vec![2]);
    }

    #[test]
    fn test_read_only_store_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        {
            let writer = open_store(&temp_dir);
            writer.submit(100, "cpu", 8).unwrap();
        }

        let reader = Store::open(
            StoreOptions::new(Backend::Sqlite, "metrics", "host", temp_dir.path()).read_only(),
        )
        .unwrap();
        assert!(reader.is_read_only());
        assert!(matches!(reader.submit(100, "cpu", 1), Err(StoreError::Permission)));
        assert!(matches!(reader.submit(200, "new", 1), Err(StoreError::Permission)));
        assert!(matches!(reader.add_field("new"), Err(StoreError::Permission)));

        let result = reader.query("host", "cpu", ALL_TIME).unwrap();
        assert_eq!(result.timestamps, vec![100]);
        assert_eq!(result.means, vec![8]);
        assert!(reader.query("host", "new", ALL_TIME).unwrap().is_empty());
    }

    #[test]
    fn test_master_merges_shares_count_column() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(
            StoreOptions::new(Backend::Sqlite, "shared", "host", temp_dir.path())
                .master_merges(true),
        )
        .unwrap();

        store.submit(100, "cpu", 10).unwrap();
        store.submit(100, "cpu", 20).unwrap();

        let columns = store
            .pool()
            .unwrap()
            .column_names(Backend::Sqlite.columns_query(), "host")
            .unwrap();
        assert!(columns.contains("merges"));
        assert!(!columns.contains("M_cpu"));

        let result = store.query("host", "cpu", ALL_TIME).unwrap();
        assert_eq!(result.means, vec![15]);
    }

    #[test]
    fn test_closed_store_fails_operations() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        store.close();
        store.close();

        assert!(store.is_closed());
        assert!(matches!(store.submit(1, "cpu", 1), Err(StoreError::Closed)));
        assert!(matches!(store.add_field("cpu"), Err(StoreError::Closed)));
        assert!(matches!(store.query("host", "cpu", ALL_TIME), Err(StoreError::Closed)));
    }

    #[test]
    fn test_concurrent_submits_are_not_lost() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&temp_dir));

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..25 {
                        store.submit(1_000, "cpu", worker * 100 + i).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let total: i64 = (0..8).flat_map(|w| (0..25).map(move |i| w * 100 + i)).sum();
        let result = store.query("host", "cpu", ALL_TIME).unwrap();
        assert_eq!(result.timestamps, vec![1_000]);
        assert_eq!(result.means, vec![total / 200]);
    }

    #[test]
    fn test_duckdb_backend_averages_bucket() {
        let temp_dir = TempDir::new().unwrap();
        let store =
            Store::open(StoreOptions::new(Backend::DuckDb, "metrics", "host", temp_dir.path()))
                .unwrap();
        assert!(temp_dir.path().join("metrics.duckdb").exists());

        store.submit(100, "cpu", 50).unwrap();
        store.submit(100, "cpu", 30).unwrap();
        store.submit(200, "cpu", 7).unwrap();
        store.add_field("cpu").unwrap();

        let result = store.query("host", "cpu", ALL_TIME).unwrap();
        assert_eq!(result.timestamps, vec![100, 200]);
        assert_eq!(result.means, vec![40, 7]);
        assert!(store.query("host", "mem", ALL_TIME).unwrap().is_empty());
    }

    #[test]
    fn test_open_reports_schema_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics.sqlite");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE other (x INTEGER); CREATE INDEX host ON other (x);")
                .unwrap();
        }

        let result = Store::open(StoreOptions::new(
            Backend::Sqlite,
            "metrics",
            "host",
            temp_dir.path(),
        ));
        match result {
            Err(StoreError::Schema { statement, .. }) => {
                assert!(statement.starts_with("CREATE TABLE"));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_add_field_soft_fails_on_schema_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        // Columns cannot be added to a view.
        let side = rusqlite::Connection::open(store.path()).unwrap();
        side.execute_batch(
            "DROP TABLE host; \
             CREATE TABLE host_data (time INTEGER PRIMARY KEY); \
             CREATE VIEW host AS SELECT time FROM host_data;",
        )
        .unwrap();

        assert!(store.add_field("cpu").is_ok());
        assert!(!store.has_field("cpu"));

        let err = store.submit(100, "cpu", 1).unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));

        let rows: i64 = side
            .query_row("SELECT COUNT(*) FROM host_data", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn test_failed_update_rolls_back_bucket_insert() {
        crate::observability::metrics::init_metrics();
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        store.submit(100, "cpu", 5).unwrap();

        let side = rusqlite::Connection::open(store.path()).unwrap();
        side.execute_batch(
            "CREATE TRIGGER reject_update BEFORE UPDATE ON host \
             BEGIN SELECT RAISE(ABORT, 'update rejected'); END;",
        )
        .unwrap();

        let err = store.submit(300, "cpu", 1).unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));

        let rows: i64 = side
            .query_row("SELECT COUNT(*) FROM host WHERE time = 300", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0, "bucket insert should have rolled back");

        let result = store.query("host", "cpu", ALL_TIME).unwrap();
        assert_eq!(result.timestamps, vec![100]);
        assert_eq!(result.means, vec![5]);
    }

    #[test]
    fn test_sum_overflow_is_rejected() {
        for backend in [Backend::Sqlite, Backend::DuckDb] {
            let temp_dir = TempDir::new().unwrap();
            let store =
                Store::open(StoreOptions::new(backend, "metrics", "host", temp_dir.path())).unwrap();

            store.submit(1, "cpu", i64::MAX).unwrap();
            let err = store.submit(1, "cpu", i64::MAX).unwrap_err();
            assert!(
                matches!(err, StoreError::Query(EngineError::Overflow { time: 1 })),
                "{backend}: {err:?}"
            );

            store.submit(2, "cpu", i64::MIN).unwrap();
            assert!(store.submit(2, "cpu", -1).is_err(), "{backend}");

            let result = store.query("host", "cpu", ALL_TIME).unwrap();
            assert_eq!(result.timestamps, vec![1, 2], "{backend}");
            assert_eq!(result.means, vec![i64::MAX, i64::MIN], "{backend}");
        }
    }

    #[test]
    fn test_open_in_directory_with_uri_characters() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("50%?#data");

        let store =
            Store::open(StoreOptions::new(Backend::Sqlite, "metrics", "host", &base)).unwrap();
        store.submit(100, "cpu", 3).unwrap();
        assert!(base.join("metrics.sqlite").exists());
        assert_eq!(store.query("host", "cpu", ALL_TIME).unwrap().means, vec![3]);
    }

    #[test]
    fn test_mean_of_empty_bucket_is_zero() {
        assert_eq!(mean(0, 0), 0);
        assert_eq!(mean(42, 0), 0);
        assert_eq!(mean(81, 2), 40);
        assert_eq!(mean(-9, 2), -4);
    }

    #[test]
    fn test_known_fields_requires_both_columns() {
        let columns: HashSet<String> = ["time", "V_cpu", "M_cpu", "V_mem"]
            .into_iter()
            .map(String::from)
            .collect();
        let fields = known_fields(&columns, false);
        assert!(fields.contains("cpu"));
        assert!(!fields.contains("mem"));
    }
}
