//! Recording document store for integration tests
//!
//! Wraps `MemoryStore`, records every call made through it and can fail
//! selected queries, so tests can check how many remote calls an operation
//! issued and how it reacts to a failing sub-query.

use async_trait::async_trait;
use community_service::store::{
    CollectionPath, Document, DocumentPath, DocumentStore, Fields, Filter, MemoryStore, Query,
    StoreError, StoreResult, TransactionFn, Value, WriteMode,
};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Recorded {
    adds: usize,
    gets: usize,
    sets: usize,
    deletes: usize,
    transactions: usize,
    queries: Vec<Query>,
}

/// MemoryStore wrapper with call recording and query failure injection
#[derive(Clone)]
pub struct RecordingStore {
    inner: Arc<MemoryStore>,
    recorded: Arc<Mutex<Recorded>>,
    /// Queries whose array-contains-any values include this id fail
    poisoned_category: Arc<Mutex<Option<String>>>,
}

impl Default for RecordingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::wrap(MemoryStore::new())
    }

    pub fn wrap(inner: MemoryStore) -> Self {
        Self {
            inner: Arc::new(inner),
            recorded: Arc::new(Mutex::new(Recorded::default())),
            poisoned_category: Arc::new(Mutex::new(None)),
        }
    }

    /// Make every query filtering on `category_id` fail as unavailable
    pub fn fail_queries_for_category(&self, category_id: &str) {
        *self.poisoned_category.lock().unwrap() = Some(category_id.to_string());
    }

    /// Total number of calls of any kind
    pub fn call_count(&self) -> usize {
        let recorded = self.recorded.lock().unwrap();
        recorded.adds
            + recorded.gets
            + recorded.sets
            + recorded.deletes
            + recorded.transactions
            + recorded.queries.len()
    }

    pub fn add_count(&self) -> usize {
        self.recorded.lock().unwrap().adds
    }

    pub fn get_count(&self) -> usize {
        self.recorded.lock().unwrap().gets
    }

    pub fn transaction_count(&self) -> usize {
        self.recorded.lock().unwrap().transactions
    }

    /// Queries issued so far, in issue order
    pub fn queries(&self) -> Vec<Query> {
        self.recorded.lock().unwrap().queries.clone()
    }

    /// Category ids of each array-contains-any query, in issue order
    pub fn category_batches(&self) -> Vec<Vec<String>> {
        self.queries()
            .iter()
            .filter_map(|query| {
                query.filters.iter().find_map(|filter| match filter {
                    Filter::ArrayContainsAny { values, .. } => Some(
                        values
                            .iter()
                            .filter_map(|v| match v {
                                Value::String(s) => Some(s.clone()),
                                _ => None,
                            })
                            .collect(),
                    ),
                    _ => None,
                })
            })
            .collect()
    }

    pub fn reset_calls(&self) {
        *self.recorded.lock().unwrap() = Recorded::default();
    }

    fn is_poisoned(&self, query: &Query) -> bool {
        let poisoned = self.poisoned_category.lock().unwrap();
        let Some(category_id) = poisoned.as_deref() else {
            return false;
        };
        query.filters.iter().any(|filter| match filter {
            Filter::ArrayContainsAny { values, .. } => values
                .iter()
                .any(|v| matches!(v, Value::String(s) if s == category_id)),
            _ => false,
        })
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn add(&self, collection: &CollectionPath, fields: Fields) -> StoreResult<String> {
        self.recorded.lock().unwrap().adds += 1;
        self.inner.add(collection, fields).await
    }

    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        self.recorded.lock().unwrap().gets += 1;
        self.inner.get(path).await
    }

    async fn set(&self, path: &DocumentPath, fields: Fields, mode: WriteMode) -> StoreResult<()> {
        self.recorded.lock().unwrap().sets += 1;
        self.inner.set(path, fields, mode).await
    }

    async fn delete(&self, path: &DocumentPath) -> StoreResult<()> {
        self.recorded.lock().unwrap().deletes += 1;
        self.inner.delete(path).await
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        self.recorded.lock().unwrap().queries.push(query.clone());
        if self.is_poisoned(query) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        self.inner.query(query).await
    }

    async fn run_transaction(
        &self,
        path: &DocumentPath,
        mutation: &TransactionFn,
    ) -> StoreResult<Fields> {
        self.recorded.lock().unwrap().transactions += 1;
        self.inner.run_transaction(path, mutation).await
    }
}
