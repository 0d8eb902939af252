//! Registry of served databases.
//!
//! Maps the database name a client sends to the open store. Filled before
//! the service starts listening, then only read.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::ServiceError;
use crate::storage::{Store, StoreError};

/// Name to store mapping shared by every connection task.
#[derive(Debug, Default)]
pub struct DatabaseRegistry {
    databases: RwLock<HashMap<String, Arc<Store>>>,
}

impl DatabaseRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a store under `name`.
    ///
    /// Rejects duplicate names and stores that are already closed.
    pub fn insert(&self, name: String, store: Arc<Store>) -> Result<(), ServiceError> {
        if store.is_closed() {
            return Err(ServiceError::Store(StoreError::Closed));
        }

        let mut databases = self
            .databases
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if databases.contains_key(&name) {
            return Err(ServiceError::Duplicate(name));
        }

        tracing::info!(
            database = %name,
            table = %store.table(),
            backend = %store.backend(),
            read_only = store.is_read_only(),
            "Registered database"
        );
        databases.insert(name, store);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Store>> {
        self.databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every registered store.
    pub fn close_all(&self) {
        let databases = self
            .databases
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for store in databases.values() {
            store.close();
        }
    }
}
