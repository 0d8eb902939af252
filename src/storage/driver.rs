//! Backend selection for the two embedded SQL engines.
//!
//! Everything that differs between SQLite and DuckDB lives here: file
//! naming, connection strings, column type names, pool sizing and the
//! wording of "column already exists" errors.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::StoreError;

/// Embedded SQL engine backing a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Sqlite,
    DuckDb,
}

/// Whether a store may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

impl AccessMode {
    pub fn is_read_only(self) -> bool {
        matches!(self, AccessMode::ReadOnly)
    }
}

/// Connection pool limits for one access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizing {
    pub max_size: u32,
    pub min_idle: u32,
}

/// DuckDB worker threads per database.
pub const DUCKDB_THREADS: i64 = 2;

/// DuckDB memory limit per database.
pub const DUCKDB_MEMORY_LIMIT: &str = "1GB";

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::DuckDb => "duckdb",
        }
    }

    /// Extension of the database file, `<database>.<extension>`.
    pub fn file_extension(self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::DuckDb => "duckdb",
        }
    }

    /// Engine-specific connection string.
    ///
    /// SQLite takes a `file:` URI with the open mode in the query string;
    /// characters that would end the path early are percent-encoded.
    /// DuckDB takes the plain path; its access mode travels in the engine
    /// `Config` built by the pool.
    pub fn connection_string(self, path: &Path, mode: AccessMode) -> String {
        match self {
            Backend::Sqlite => {
                let mode = match mode {
                    AccessMode::ReadWrite => "rwc",
                    AccessMode::ReadOnly => "ro",
                };
                format!("file:{}?mode={mode}", escape_uri_path(path))
            }
            Backend::DuckDb => path.display().to_string(),
        }
    }

    /// Type of the `time` primary key column.
    pub fn time_column_type(self) -> &'static str {
        match self {
            Backend::Sqlite => "INTEGER NOT NULL",
            Backend::DuckDb => "BIGINT",
        }
    }

    /// Type of a running-sum column.
    pub fn value_column_type(self) -> &'static str {
        match self {
            Backend::Sqlite => "INTEGER NOT NULL",
            Backend::DuckDb => "BIGINT",
        }
    }

    /// Type of a running-count column.
    pub fn merge_column_type(self) -> &'static str {
        match self {
            Backend::Sqlite => "INTEGER NOT NULL",
            Backend::DuckDb => "INTEGER",
        }
    }

    pub fn pool_sizing(self, mode: AccessMode) -> PoolSizing {
        match mode {
            AccessMode::ReadWrite => PoolSizing {
                max_size: 1,
                min_idle: 1,
            },
            AccessMode::ReadOnly => PoolSizing {
                max_size: 10,
                min_idle: 5,
            },
        }
    }

    /// Query returning one row per column name of the table bound to the single parameter.
    pub fn columns_query(self) -> &'static str {
        match self {
            Backend::Sqlite => "SELECT name FROM pragma_table_info(?)",
            Backend::DuckDb => {
                "SELECT column_name FROM information_schema.columns WHERE table_name = ?"
            }
        }
    }

    /// Whether an engine error message reports an already existing column.
    pub fn is_duplicate_column(self, message: &str) -> bool {
        let message = message.to_ascii_lowercase();
        match self {
            // "duplicate column name: V_cpu"
            Backend::Sqlite => message.contains("duplicate column"),
            // "Catalog Error: Column with name V_cpu already exists!"
            Backend::DuckDb => message.contains("column with name") && message.contains("already exists"),
        }
    }
}

impl FromStr for Backend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "libsql" => Ok(Backend::Sqlite),
            "duckdb" => Ok(Backend::DuckDb),
            other => Err(StoreError::Configuration(format!(
                "unknown backend: {other:?} (expected sqlite or duckdb)"
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Percent-encode the characters SQLite's URI parser treats specially.
fn escape_uri_path(path: &Path) -> String {
    let raw = path.display().to_string();
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '?' => escaped.push_str("%3F"),
            '#' => escaped.push_str("%23"),
            c => escaped.push(c),
        }
    }
    escaped
}
