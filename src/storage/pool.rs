//! Connection pools over the embedded engines.
//!
//! Uses r2d2 with r2d2_sqlite for SQLite and duckdb's own r2d2 manager for
//! DuckDB. Both engines expose near-identical statement APIs, so every
//! helper here is written once per arm with the same shape.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use duckdb::DuckdbConnectionManager;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use thiserror::Error;

use super::driver::{AccessMode, Backend, DUCKDB_MEMORY_LIMIT, DUCKDB_THREADS};
use super::schema::{apply_reader_pragmas, apply_writer_pragmas};

/// Error raised by an engine or its pool.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("duckdb: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("sum of bucket {time} would overflow")]
    Overflow { time: i64 },
}

/// Statements merging one sample into a bucket.
#[derive(Debug, Clone)]
pub struct MergeStatements {
    /// Create the bucket row if missing; binds `time`
    pub insert: String,
    /// Read the running sum; binds `time`
    pub select_sum: String,
    /// Add the sample; binds `value`, then `time`
    pub update: String,
}

/// Row of a bucket query: `(time, sum, count)`.
pub type BucketRow = (i64, i64, i64);

/// A pool of connections to one database file.
#[derive(Clone)]
pub enum ConnectionPool {
    Sqlite(Pool<SqliteConnectionManager>),
    DuckDb(Pool<DuckdbConnectionManager>),
}

impl ConnectionPool {
    /// Open a pool sized for `mode`.
    ///
    /// Blocks until the pool's idle connections are established or
    /// `connection_timeout` expires.
    pub fn open(
        backend: Backend,
        path: &Path,
        mode: AccessMode,
        connection_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let sizing = backend.pool_sizing(mode);
        let dsn = backend.connection_string(path, mode);

        match backend {
            Backend::Sqlite => {
                let access = match mode {
                    AccessMode::ReadWrite => {
                        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
                    }
                    AccessMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
                };
                let manager = SqliteConnectionManager::file(dsn).with_flags(
                    access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                );
                let pool = Pool::builder()
                    .max_size(sizing.max_size)
                    .min_idle(Some(sizing.min_idle))
                    .connection_timeout(connection_timeout)
                    .connection_customizer(Box::new(SqliteConnectionCustomizer { mode }))
                    .build(manager)?;
                Ok(Self::Sqlite(pool))
            }
            Backend::DuckDb => {
                let access = match mode {
                    AccessMode::ReadWrite => duckdb::AccessMode::ReadWrite,
                    AccessMode::ReadOnly => duckdb::AccessMode::ReadOnly,
                };
                let config = duckdb::Config::default()
                    .access_mode(access)?
                    .threads(DUCKDB_THREADS)?
                    .max_memory(DUCKDB_MEMORY_LIMIT)?;
                let manager = DuckdbConnectionManager::file_with_flags(dsn, config)?;
                let pool = Pool::builder()
                    .max_size(sizing.max_size)
                    .min_idle(Some(sizing.min_idle))
                    .connection_timeout(connection_timeout)
                    .build(manager)?;
                Ok(Self::DuckDb(pool))
            }
        }
    }

    /// Maximum number of connections in the pool.
    pub fn max_size(&self) -> u32 {
        match self {
            Self::Sqlite(pool) => pool.max_size(),
            Self::DuckDb(pool) => pool.max_size(),
        }
    }

    /// Liveness check.
    pub fn ping(&self) -> Result<(), EngineError> {
        match self {
            Self::Sqlite(pool) => {
                let conn = pool.get()?;
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            }
            Self::DuckDb(pool) => {
                let conn = pool.get()?;
                conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))?;
            }
        }
        Ok(())
    }

    /// Execute one parameterless statement.
    pub fn execute(&self, sql: &str) -> Result<(), EngineError> {
        match self {
            Self::Sqlite(pool) => {
                pool.get()?.execute(sql, [])?;
            }
            Self::DuckDb(pool) => {
                pool.get()?.execute(sql, [])?;
            }
        }
        Ok(())
    }

    /// Column names of `table`. Empty when the table does not exist.
    pub fn column_names(&self, columns_query: &str, table: &str) -> Result<HashSet<String>, EngineError> {
        match self {
            Self::Sqlite(pool) => {
                let conn = pool.get()?;
                let mut stmt = conn.prepare(columns_query)?;
                let names = stmt
                    .query_map(rusqlite::params![table], |row| row.get::<_, String>(0))?
                    .collect::<Result<HashSet<_>, _>>()?;
                Ok(names)
            }
            Self::DuckDb(pool) => {
                let conn = pool.get()?;
                let mut stmt = conn.prepare(columns_query)?;
                let names = stmt
                    .query_map(duckdb::params![table], |row| row.get::<_, String>(0))?
                    .collect::<Result<HashSet<_>, _>>()?;
                Ok(names)
            }
        }
    }

    /// Insert the bucket row if missing, then merge `value` into it, as one
    /// transaction.
    ///
    /// The running sum is checked before the update, so a sample that would
    /// overflow `i64` fails with [`EngineError::Overflow`]. The transaction
    /// rolls back when dropped, so an error from any statement leaves the
    /// row untouched.
    pub fn merge_sample(
        &self,
        statements: &MergeStatements,
        time: i64,
        value: i64,
    ) -> Result<(), EngineError> {
        match self {
            Self::Sqlite(pool) => {
                let mut conn = pool.get()?;
                let tx = conn.transaction()?;
                tx.execute(&statements.insert, rusqlite::params![time])?;
                let sum: i64 =
                    tx.query_row(&statements.select_sum, rusqlite::params![time], |row| row.get(0))?;
                sum.checked_add(value).ok_or(EngineError::Overflow { time })?;
                tx.execute(&statements.update, rusqlite::params![value, time])?;
                tx.commit()?;
            }
            Self::DuckDb(pool) => {
                let mut conn = pool.get()?;
                let tx = conn.transaction()?;
                tx.execute(&statements.insert, duckdb::params![time])?;
                let sum: i64 =
                    tx.query_row(&statements.select_sum, duckdb::params![time], |row| row.get(0))?;
                sum.checked_add(value).ok_or(EngineError::Overflow { time })?;
                tx.execute(&statements.update, duckdb::params![value, time])?;
                tx.commit()?;
            }
        }
        Ok(())
    }

    /// Run a bucket query binding the time cutoff.
    pub fn select_buckets(&self, sql: &str, cutoff: i64) -> Result<Vec<BucketRow>, EngineError> {
        match self {
            Self::Sqlite(pool) => {
                let conn = pool.get()?;
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt
                    .query_map(rusqlite::params![cutoff], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<Result<Vec<BucketRow>, _>>()?;
                Ok(rows)
            }
            Self::DuckDb(pool) => {
                let conn = pool.get()?;
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt
                    .query_map(duckdb::params![cutoff], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<Result<Vec<BucketRow>, _>>()?;
                Ok(rows)
            }
        }
    }
}

/// Connection customizer that applies SQLite pragmas per access mode.
#[derive(Debug)]
struct SqliteConnectionCustomizer {
    mode: AccessMode,
}

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error>
    for SqliteConnectionCustomizer
{
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        match self.mode {
            AccessMode::ReadWrite => apply_writer_pragmas(conn),
            AccessMode::ReadOnly => apply_reader_pragmas(conn),
        }
    }
}
