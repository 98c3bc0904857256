/// Document store seam
///
/// This module provides:
/// - Collection / document path types for the nested document layout
/// - The query model used by the repositories (equality, null and
///   array-contains-any filters plus a single ordering)
/// - The `DocumentStore` trait implemented by every backend
/// - `MemoryStore` (local, used by tests and the `memory` backend)
/// - `FirestoreStore` (Cloud Firestore REST backend)
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod firestore;
pub mod memory;
pub mod value;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;
pub use value::{Fields, FieldsExt, Value};

use crate::config::{StoreBackend, StoreConfig};

/// Errors raised by a document store backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction aborted after {0} attempts")]
    Aborted(u32),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Failure worth retrying for idempotent calls
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<resilience::TimeoutError> for StoreError {
    fn from(err: resilience::TimeoutError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Slash-separated path of a collection, e.g. `Community/c1/Post`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

/// Slash-separated path of a document, e.g. `Community/c1/Post/p1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(String);

impl CollectionPath {
    /// Top-level collection
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn doc(&self, id: &str) -> DocumentPath {
        DocumentPath(format!("{}/{}", self.0, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Collection id, the last path segment
    pub fn collection_id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Path of the owning document, empty for root collections
    pub fn parent_path(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }
}

impl DocumentPath {
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}", self.0, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Document id, the last path segment
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn parent(&self) -> CollectionPath {
        match self.0.rfind('/') {
            Some(idx) => CollectionPath(self.0[..idx].to_string()),
            None => CollectionPath(String::new()),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document: its id within the collection plus its fields
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

/// How `set` treats fields that already exist remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the whole document
    Overwrite,
    /// Write only the given fields, nested maps merge
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    EqualTo { field: String, value: Value },
    /// Field is present and null
    IsNull { field: String },
    /// Field is an array sharing at least one element with `values`
    ArrayContainsAny { field: String, values: Vec<Value> },
}

/// Query over a single collection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_equal_to(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::EqualTo {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_null(mut self, field: &str) -> Self {
        self.filters.push(Filter::IsNull {
            field: field.to_string(),
        });
        self
    }

    pub fn where_array_contains_any(mut self, field: &str, values: Vec<Value>) -> Self {
        self.filters.push(Filter::ArrayContainsAny {
            field: field.to_string(),
            values,
        });
        self
    }

    /// Set the ordering, replacing any previous one
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }
}

/// Mutation applied inside a single-document transaction
///
/// Receives the current document and returns the fields to merge into it.
/// It may run several times when the store retries a conflicting commit.
pub type TransactionFn = dyn Fn(&Document) -> StoreResult<Fields> + Send + Sync;

/// Remote document database as seen by the repositories
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Append a document with a generated id, returning the id
    async fn add(&self, collection: &CollectionPath, fields: Fields) -> StoreResult<String>;

    /// Fetch one document, `None` when missing
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Document>>;

    /// Write a document (created when missing)
    async fn set(&self, path: &DocumentPath, fields: Fields, mode: WriteMode) -> StoreResult<()>;

    /// Delete one document; sub-collections are left untouched
    async fn delete(&self, path: &DocumentPath) -> StoreResult<()>;

    /// Run a query, documents come back in query order
    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

    /// Optimistic read-modify-write of one existing document
    ///
    /// Conflicting concurrent commits are retried inside the store; the
    /// caller sees either the merged fields of the winning attempt or an error.
    async fn run_transaction(
        &self,
        path: &DocumentPath,
        mutation: &TransactionFn,
    ) -> StoreResult<Fields>;
}

/// Build the configured backend
pub fn connect(config: &StoreConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match config.backend {
        StoreBackend::Memory => Arc::new(
            MemoryStore::new().with_max_transaction_attempts(config.transaction_max_attempts),
        ),
        StoreBackend::Firestore => Arc::new(FirestoreStore::from_config(config)?),
    };

    tracing::info!(backend = ?config.backend, "document store ready");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_paths() {
        let posts = CollectionPath::root("Community").doc("c1").collection("Post");
        assert_eq!(posts.as_str(), "Community/c1/Post");
        assert_eq!(posts.collection_id(), "Post");
        assert_eq!(posts.parent_path(), "Community/c1");

        let comment = posts.doc("p1").collection("Comment").doc("k1");
        assert_eq!(comment.as_str(), "Community/c1/Post/p1/Comment/k1");
        assert_eq!(comment.id(), "k1");
        assert_eq!(comment.parent().as_str(), "Community/c1/Post/p1/Comment");
    }

    #[test]
    fn test_root_collection_has_empty_parent() {
        let bookmarks = CollectionPath::root("Bookmark");
        assert_eq!(bookmarks.parent_path(), "");
        assert_eq!(bookmarks.collection_id(), "Bookmark");
    }

    #[test]
    fn test_last_order_by_wins() {
        let query = Query::new(CollectionPath::root("Post"))
            .order_by("totalComment", Direction::Descending)
            .order_by("timeCreated", Direction::Ascending);

        assert_eq!(
            query.order_by,
            Some(OrderBy {
                field: "timeCreated".to_string(),
                direction: Direction::Ascending,
            })
        );
    }

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(StoreError::Unavailable("timeout".into()).is_transient());
        assert!(!StoreError::Aborted(5).is_transient());
        assert!(!StoreError::PermissionDenied("rules".into()).is_transient());
    }
}
