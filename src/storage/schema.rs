//! Table layout and SQL statement builders.
//!
//! One table per series, keyed by `time`. Each field owns a pair of
//! columns, `V_<key>` holding the running sum and `M_<key>` holding the
//! number of merged samples, unless the store shares a single `merges`
//! column across all fields.

use std::time::Duration;

use super::driver::Backend;

/// Prefix of running-sum columns.
pub const PREFIX_VALUE: &str = "V_";

/// Prefix of per-field merge-count columns.
pub const PREFIX_MERGE: &str = "M_";

/// Shared merge-count column used in master-merges mode.
pub const MASTER_MERGES_COLUMN: &str = "merges";

/// Name of the bucket key column.
pub const TIME_COLUMN: &str = "time";

/// Quote an identifier for use in SQL, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn value_column(key: &str) -> String {
    format!("{PREFIX_VALUE}{key}")
}

/// Merge column counting samples for `key`.
pub fn merge_column(key: &str, master_merges: bool) -> String {
    if master_merges {
        MASTER_MERGES_COLUMN.to_string()
    } else {
        format!("{PREFIX_MERGE}{key}")
    }
}

pub fn create_table_sql(backend: Backend, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({} {}, PRIMARY KEY ({}))",
        quote_ident(table),
        quote_ident(TIME_COLUMN),
        backend.time_column_type(),
        quote_ident(TIME_COLUMN),
    )
}

/// Add a zero-defaulted counter column.
pub fn add_column_sql(table: &str, column: &str, column_type: &str) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {} DEFAULT 0",
        quote_ident(table),
        quote_ident(column),
        column_type,
    )
}

/// Create the bucket row if missing. Binds `time`.
pub fn insert_bucket_sql(table: &str) -> String {
    let time = quote_ident(TIME_COLUMN);
    format!(
        "INSERT INTO {} ({time}) VALUES (?) ON CONFLICT ({time}) DO NOTHING",
        quote_ident(table),
    )
}

/// Current running sum of a bucket. Binds `time`.
pub fn select_sum_sql(table: &str, key: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ?",
        quote_ident(&value_column(key)),
        quote_ident(table),
        quote_ident(TIME_COLUMN),
    )
}

/// Merge one sample into a bucket. Binds `value`, then `time`.
pub fn update_bucket_sql(table: &str, key: &str, master_merges: bool) -> String {
    let value = quote_ident(&value_column(key));
    let merge = quote_ident(&merge_column(key, master_merges));
    format!(
        "UPDATE {} SET {value} = {value} + ?, {merge} = {merge} + 1 WHERE {} = ?",
        quote_ident(table),
        quote_ident(TIME_COLUMN),
    )
}

/// Select `(time, sum, count)` rows newer than the bound cutoff, oldest first.
pub fn select_buckets_sql(table: &str, value_column: &str, merge_column: &str) -> String {
    let time = quote_ident(TIME_COLUMN);
    format!(
        "SELECT CAST({time} AS BIGINT), \
         COALESCE(CAST({} AS BIGINT), 0), \
         COALESCE(CAST({} AS BIGINT), 0) \
         FROM {} WHERE {time} > ? ORDER BY {time} ASC",
        quote_ident(value_column),
        quote_ident(merge_column),
        quote_ident(table),
    )
}

/// Busy timeout for SQLite connections.
pub const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Apply pragmas for a read-write SQLite connection.
///
/// The journal is kept in memory and syncs are relaxed; every bucket update
/// is still a single transaction.
pub fn apply_writer_pragmas(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(SQLITE_BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "MEMORY")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// Apply pragmas for a read-only SQLite connection.
pub fn apply_reader_pragmas(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(SQLITE_BUSY_TIMEOUT)?;
    conn.pragma_update(None, "query_only", true)?;
    Ok(())
}
