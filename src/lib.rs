//! TamDB: a time-bucketed aggregation store with a call-based query service.
//!
//! Clients submit `(time, key, value)` samples; the store keeps a running sum
//! and a sample count per key per time bucket, and queries return the mean of
//! each bucket.
//!
//! # Architecture
//!
//! - **Dual backend**: SQLite (rusqlite) or DuckDB, chosen per database
//! - **Lazy schema**: field columns are added on first submit
//! - **Single writer**: read-write stores hold one pooled connection
//! - **Cooperative shutdown**: the accept loop polls a stop signal
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`observability`]: Tracing setup
//! - [`server`]: Listener, accept loop and process lifecycle
//! - [`service`]: Database registry and call handlers
//! - [`storage`]: Backends, connection pools and the aggregation store

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::store::StoreError is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::similar_names,              // time/times/timestamps are fine
    clippy::cast_possible_wrap          // Epoch seconds fit in i64
)]

pub mod config;
pub mod observability;
pub mod server;
pub mod service;
pub mod storage;

pub use tamdb_proto::split_name_key;

/// Get the current Unix timestamp in seconds.
#[must_use]
pub fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
