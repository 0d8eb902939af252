//! Query call handler.
//!
//! Validates the request, resolves the database and runs the store query on
//! a blocking thread.

use std::sync::Arc;
use std::time::Instant;

use tamdb_proto::{QueryReply, QueryRequest};

use super::{ServiceError, ServiceState};
use crate::observability::metrics::{record_query, Outcome};

/// Reply to a query with no database name.
pub const INVALID_DATABASE: &str = "Invalid database name";

/// Reply to a query with no table name.
pub const INVALID_TABLE: &str = "Invalid table name";

/// Handle a `Query` call.
pub async fn handle_query(
    state: &Arc<ServiceState>,
    request: QueryRequest,
) -> Result<QueryReply, ServiceError> {
    let start = Instant::now();
    let database = request.database.clone();
    let result = run_query(state, request).await;

    let outcome = match &result {
        Ok(_) => Outcome::Ok,
        Err(ServiceError::Validation(_) | ServiceError::NotFound(_)) => Outcome::Rejected,
        Err(_) => Outcome::Error,
    };
    record_query(&database, outcome, start.elapsed().as_secs_f64());
    result
}

async fn run_query(
    state: &Arc<ServiceState>,
    request: QueryRequest,
) -> Result<QueryReply, ServiceError> {
    let QueryRequest {
        database,
        table,
        field,
    } = request;

    if database.is_empty() {
        return Err(ServiceError::Validation(INVALID_DATABASE.into()));
    }
    if table.is_empty() {
        return Err(ServiceError::Validation(INVALID_TABLE.into()));
    }

    let store = state
        .registry
        .get(&database)
        .ok_or_else(|| ServiceError::NotFound(format!("{INVALID_DATABASE}: {database}")))?;

    let window = state.query_window_secs;
    let result = tokio::task::spawn_blocking(move || store.query(&table, &field, window))
        .await
        .map_err(ServiceError::Task)??;

    tracing::debug!(database = %database, points = result.len(), "Query served");

    Ok(QueryReply {
        timestamps: result.timestamps,
        means: result.means,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_secs;
    use crate::observability::metrics::{init_metrics, metrics};
    use crate::service::DatabaseRegistry;
    use crate::storage::{Backend, Store, StoreError, StoreOptions};
    use tempfile::TempDir;

    fn state_with_store(dir: &TempDir) -> (Arc<ServiceState>, Arc<Store>) {
        init_metrics();
        let store = Arc::new(
            Store::open(StoreOptions::new(Backend::Sqlite, "metrics", "host", dir.path())).unwrap(),
        );
        let registry = DatabaseRegistry::new();
        registry.insert("metrics".into(), Arc::clone(&store)).unwrap();
        (Arc::new(ServiceState::new(registry, 3600)), store)
    }

    #[tokio::test]
    async fn test_query_returns_means() {
        let temp_dir = TempDir::new().unwrap();
        let (state, store) = state_with_store(&temp_dir);
        let now = now_secs();
        store.submit(now - 5, "cpu", 50).unwrap();
        store.submit(now - 5, "cpu", 30).unwrap();

        let reply = handle_query(&state, QueryRequest::new("metrics", "host", "cpu"))
            .await
            .unwrap();
        assert_eq!(reply.timestamps, vec![now - 5]);
        assert_eq!(reply.means, vec![40]);
    }

    #[tokio::test]
    async fn test_query_is_recorded_for_every_outcome() {
        let temp_dir = TempDir::new().unwrap();
        let (state, _store) = state_with_store(&temp_dir);
        assert!(metrics().is_some());

        assert!(handle_query(&state, QueryRequest::new("metrics", "host", "cpu")).await.is_ok());
        assert!(handle_query(&state, QueryRequest::new("", "host", "cpu")).await.is_err());
        assert!(handle_query(&state, QueryRequest::new("nope", "host", "cpu")).await.is_err());
    }

    #[tokio::test]
    async fn test_query_validation() {
        let temp_dir = TempDir::new().unwrap();
        let (state, _store) = state_with_store(&temp_dir);

        let err = handle_query(&state, QueryRequest::new("", "host", "cpu"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), INVALID_DATABASE);

        let err = handle_query(&state, QueryRequest::new("metrics", "", "cpu"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), INVALID_TABLE);
    }

    #[tokio::test]
    async fn test_query_unknown_database() {
        let temp_dir = TempDir::new().unwrap();
        let (state, _store) = state_with_store(&temp_dir);

        let err = handle_query(&state, QueryRequest::new("nope", "host", "cpu"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_store_errors_surface_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let (state, store) = state_with_store(&temp_dir);
        store.close();

        let err = handle_query(&state, QueryRequest::new("metrics", "host", "cpu"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Closed)));
        assert_eq!(err.to_string(), StoreError::Closed.to_string());
    }
}
