//! Test utilities and server harness for TamDB tests.
//!
//! Provides:
//! - In-process test server over a temporary data directory
//! - Client helpers
//! - Polling helper for asynchronous conditions

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tamdb::config::DatabaseConfig;
use tamdb::observability::metrics::init_metrics;
use tamdb::observability::tracing::init_test_tracing;
use tamdb::server::TamServer;
use tamdb::storage::{Backend, Store, StoreOptions};
use tamdb_client::TamClient;
use tamdb_proto::BindAddress;
use tempfile::TempDir;
use tokio::sync::watch;

/// Lookback window used by test servers.
pub const TEST_WINDOW_SECS: i64 = 3600;

/// An in-process server whose databases live in a temporary directory.
///
/// The directory is removed when the harness is dropped.
pub struct TestServer {
    pub temp_dir: TempDir,
    pub server: TamServer,
    pub address: BindAddress,
    shutdown_tx: watch::Sender<bool>,
}

impl TestServer {
    /// Start a TCP server serving `databases` (`<driver>:<name>:<table>[:ro][:master]`).
    pub async fn start(databases: &[&str]) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        Self::start_in(temp_dir, databases, BindAddress::Tcp("127.0.0.1:0".into())).await
    }

    /// Start a server on a Unix socket inside the data directory.
    #[cfg(unix)]
    pub async fn start_unix(databases: &[&str]) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket = BindAddress::Unix(temp_dir.path().join("tamdb.socket"));
        Self::start_in(temp_dir, databases, socket).await
    }

    /// Start a server over an existing data directory.
    pub async fn start_in(temp_dir: TempDir, databases: &[&str], bind: BindAddress) -> Self {
        init_test_tracing();
        init_metrics();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = TamServer::new(TEST_WINDOW_SECS, shutdown_rx);

        for registration in databases {
            let db: DatabaseConfig = registration.parse().expect("invalid database registration");
            let store = Store::open(db.store_options(temp_dir.path())).expect("failed to open store");
            server
                .register(db.name.clone(), Arc::new(store))
                .expect("failed to register store");
        }

        let address = server.listen(&bind).await.expect("failed to listen");
        Self {
            temp_dir,
            server,
            address,
            shutdown_tx,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// The registered store for `name`.
    pub fn store(&self, name: &str) -> Arc<Store> {
        self.server
            .registry()
            .get(name)
            .unwrap_or_else(|| panic!("database {name} not registered"))
    }

    pub async fn client(&self) -> TamClient {
        TamClient::connect_to(self.address.clone())
            .await
            .expect("failed to connect")
    }

    /// Send the stop signal without waiting.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Send the stop signal and wait for every task to finish.
    pub async fn stop(&self) {
        self.signal_shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.server.shutdown())
            .await
            .expect("server did not shut down");
    }
}

/// Write samples into a fresh SQLite database file, then close it.
pub fn seed_sqlite(dir: &std::path::Path, database: &str, table: &str, samples: &[(i64, &str, i64)]) {
    let store = Store::open(StoreOptions::new(Backend::Sqlite, database, table, dir))
        .expect("failed to open seed store");
    for &(time, key, value) in samples {
        store.submit(time, key, value).expect("failed to seed sample");
    }
    store.close();
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
