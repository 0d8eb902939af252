//! Aggregation storage layer for TamDB.
//!
//! Provides:
//! - Backend selection over SQLite and DuckDB
//! - Connection pools sized per access mode
//! - Table and column layout with lazy field creation
//! - The aggregation store (submit, merge, query means)

pub mod driver;
pub mod pool;
pub mod schema;
pub mod store;

pub use driver::{AccessMode, Backend};
pub use pool::EngineError;
pub use store::{QueryResult, Store, StoreError, StoreOptions};
