//! Call handlers for the TamDB service.

pub mod query;
pub mod registry;

pub use registry::DatabaseRegistry;

use std::sync::Arc;

use tamdb_proto::{Call, Reply};
use thiserror::Error;

use crate::storage::StoreError;

/// Error type for service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("service is already listening")]
    AlreadyListening,

    #[error("database already registered: {0}")]
    Duplicate(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handler task failed: {0}")]
    Task(#[source] tokio::task::JoinError),
}

/// State shared by every connection task.
#[derive(Debug)]
pub struct ServiceState {
    pub registry: DatabaseRegistry,
    /// Lookback window of `Query`, in seconds
    pub query_window_secs: i64,
}

impl ServiceState {
    pub fn new(registry: DatabaseRegistry, query_window_secs: i64) -> Self {
        Self {
            registry,
            query_window_secs,
        }
    }
}

/// Run one call and turn the outcome into a reply.
pub async fn dispatch(state: &Arc<ServiceState>, call: Call) -> Reply {
    let method = call.method();
    let result = match call {
        Call::Query(request) => query::handle_query(state, request).await.map(Reply::Query),
    };

    result.unwrap_or_else(|e| {
        tracing::debug!(method, error = %e, "Call failed");
        Reply::Error {
            message: e.to_string(),
        }
    })
}
