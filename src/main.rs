//! TamDB: a time-bucketed aggregation store with a call-based query service.
//!
//! # Usage
//!
//! ```bash
//! tamdb --bind tcp://127.0.0.1:9999 --data-dir ./data \
//!     --database sqlite:metrics:host --database duckdb:archive:host:ro
//! ```
//!
//! Environment variables can also be used:
//! - `TAMDB_BIND`: Address to listen on
//! - `TAMDB_DATA_DIR`: Directory holding the database files
//! - `TAMDB_DATABASES`: Comma-separated database registrations
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use tamdb::config::Config;
use tamdb::observability::metrics::init_metrics;
use tamdb::observability::tracing::init_tracing;
use tamdb::server::run_server;
use tokio::sync::watch;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let databases = if config.databases.is_empty() {
        "(none)".to_string()
    } else {
        config
            .databases
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    eprintln!(
        r#"
   _____              ____  ____
  |_   _|_ _ _ __ ___|  _ \| __ )
    | |/ _` | '_ ` _ \ | | |  _ \
    | | (_| | | | | | | |_| | |_) |
    |_|\__,_|_| |_| |_|____/|____/

  TamDB v{} - Time-Bucketed Aggregation Store

  Configuration:
    Address:    {}
    Data Dir:   {}
    Databases:  {}
    Window:     {}s
    Log Level:  {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.bind,
        config.data_dir.display(),
        databases,
        config.query_window_secs,
        config.log_level
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    // Initialize tracing/logging
    init_tracing(&config.log_level, config.log_format);

    // Initialize metrics
    init_metrics();

    // Print startup banner
    print_banner(&config);

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn signal handler task
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating shutdown...");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }

        // Signal shutdown
        let _ = shutdown_tx_clone.send(true);
    });

    // Run the server
    run_server(config, shutdown_rx).await?;

    tracing::info!("TamDB shutdown complete");
    Ok(())
}
