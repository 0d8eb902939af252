//! Configuration parsing for the TamDB server.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Database registrations as `<driver>:<name>:<table>[:ro][:master]`

use clap::Parser;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tamdb_proto::BindAddress;

use crate::observability::tracing::LogFormat;
use crate::storage::{AccessMode, Backend, StoreError, StoreOptions};

/// Default TCP listen address.
pub const DEFAULT_TCP_ADDR: &str = "127.0.0.1:9999";

/// Default lookback window of `Query`, in seconds.
pub const DEFAULT_QUERY_WINDOW_SECS: i64 = 3600;

/// TamDB: a time-bucketed aggregation store.
#[derive(Parser, Debug, Clone)]
#[command(name = "tamdb")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address to listen on (tcp://host:port or unix:///path)
    #[arg(short, long, env = "TAMDB_BIND", default_value_t = default_bind())]
    pub bind: BindAddress,

    /// Directory holding the database files
    #[arg(short, long, env = "TAMDB_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Database to serve, as <driver>:<name>:<table>[:ro][:master] (repeatable)
    #[arg(
        long = "database",
        env = "TAMDB_DATABASES",
        value_delimiter = ',',
        value_parser = parse_database
    )]
    pub databases: Vec<DatabaseConfig>,

    /// Lookback window of queries, in seconds
    #[arg(long, env = "TAMDB_QUERY_WINDOW_SECS", default_value_t = DEFAULT_QUERY_WINDOW_SECS)]
    pub query_window_secs: i64,

    /// Seconds to wait for a pooled database connection
    #[arg(long, env = "TAMDB_CONNECTION_TIMEOUT_SECS", default_value_t = 30)]
    pub connection_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TAMDB_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a configuration for tests: ephemeral TCP port, no databases.
    pub fn test_config(data_dir: PathBuf) -> Self {
        Self {
            bind: BindAddress::Tcp("127.0.0.1:0".into()),
            data_dir,
            databases: Vec::new(),
            query_window_secs: DEFAULT_QUERY_WINDOW_SECS,
            connection_timeout_secs: 5,
            log_level: "debug".into(),
            log_format: LogFormat::Text,
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Store options for every configured database.
    pub fn store_options(&self) -> Vec<(String, StoreOptions)> {
        self.databases
            .iter()
            .map(|db| {
                (
                    db.name.clone(),
                    db.store_options(&self.data_dir)
                        .connection_timeout(self.connection_timeout()),
                )
            })
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            data_dir: PathBuf::from("./data"),
            databases: Vec::new(),
            query_window_secs: DEFAULT_QUERY_WINDOW_SECS,
            connection_timeout_secs: 30,
            log_level: "info".into(),
            log_format: LogFormat::Text,
        }
    }
}

/// `tcp://` + [`DEFAULT_TCP_ADDR`].
pub fn default_bind() -> BindAddress {
    BindAddress::Tcp(DEFAULT_TCP_ADDR.into())
}

/// One database registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub backend: Backend,
    /// Name clients use, and the file stem on disk
    pub name: String,
    /// Table the store writes
    pub table: String,
    pub mode: AccessMode,
    pub master_merges: bool,
}

impl DatabaseConfig {
    pub fn store_options(&self, data_dir: &Path) -> StoreOptions {
        StoreOptions::new(self.backend, &self.name, &self.table, data_dir)
            .mode(self.mode)
            .master_merges(self.master_merges)
    }
}

impl FromStr for DatabaseConfig {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            StoreError::Configuration(format!(
                "invalid database {s:?}: {reason} (expected <driver>:<name>:<table>[:ro][:master])"
            ))
        };

        let mut parts = s.trim().split(':');
        let backend: Backend = parts.next().unwrap_or_default().parse()?;
        let name = parts.next().filter(|p| !p.is_empty()).ok_or_else(|| invalid("missing name"))?;
        let table = parts.next().filter(|p| !p.is_empty()).ok_or_else(|| invalid("missing table"))?;

        let mut mode = AccessMode::ReadWrite;
        let mut master_merges = false;
        for flag in parts {
            match flag.to_ascii_lowercase().as_str() {
                "ro" => mode = AccessMode::ReadOnly,
                "rw" => mode = AccessMode::ReadWrite,
                "master" => master_merges = true,
                other => return Err(invalid(&format!("unknown flag {other:?}"))),
            }
        }

        Ok(Self {
            backend,
            name: name.to_string(),
            table: table.to_string(),
            mode,
            master_merges,
        })
    }
}

fn parse_database(s: &str) -> Result<DatabaseConfig, String> {
    s.parse().map_err(|e: StoreError| e.to_string())
}

impl fmt::Display for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.backend, self.name, self.table)?;
        if self.mode.is_read_only() {
            f.write_str(":ro")?;
        }
        if self.master_merges {
            f.write_str(":master")?;
        }
        Ok(())
    }
}
