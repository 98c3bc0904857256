use async_trait::async_trait;
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use super::value::{merge_into, resolve_path};
use super::{
    CollectionPath, Direction, Document, DocumentPath, DocumentStore, Fields, Filter, Query,
    StoreError, StoreResult, TransactionFn, Value, WriteMode,
};

/// Length of generated document ids (same shape as Firestore auto ids)
const AUTO_ID_LEN: usize = 20;

/// Firestore retries a contended transaction five times by default
pub const DEFAULT_MAX_TRANSACTION_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
struct StoredDocument {
    fields: Fields,
    version: u64,
}

/// In-process document store
///
/// Keeps collections keyed by their full path. Every write bumps a per-document
/// version; transactions read a version, run the mutation without holding the
/// lock and commit only if the version is unchanged, retrying otherwise.
pub struct MemoryStore {
    collections: RwLock<HashMap<CollectionPath, BTreeMap<String, StoredDocument>>>,
    max_transaction_attempts: u32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            max_transaction_attempts: DEFAULT_MAX_TRANSACTION_ATTEMPTS,
        }
    }

    pub fn with_max_transaction_attempts(mut self, attempts: u32) -> Self {
        self.max_transaction_attempts = attempts.max(1);
        self
    }

    /// Number of documents directly inside `collection`
    pub fn len(&self, collection: &CollectionPath) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &CollectionPath) -> bool {
        self.len(collection) == 0
    }

    fn read_versioned(&self, path: &DocumentPath) -> Option<(Document, u64)> {
        let collections = self.collections.read();
        let stored = collections.get(&path.parent())?.get(path.id())?;
        Some((
            Document {
                id: path.id().to_string(),
                fields: stored.fields.clone(),
            },
            stored.version,
        ))
    }
}

fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTO_ID_LEN)
        .map(char::from)
        .collect()
}

fn matches_filter(fields: &Fields, filter: &Filter) -> bool {
    match filter {
        Filter::EqualTo { field, value } => resolve_path(fields, field)
            .map(|found| found.query_eq(value))
            .unwrap_or(false),
        Filter::IsNull { field } => matches!(resolve_path(fields, field), Some(Value::Null)),
        Filter::ArrayContainsAny { field, values } => match resolve_path(fields, field) {
            Some(Value::Array(items)) => items
                .iter()
                .any(|item| values.iter().any(|wanted| item.query_eq(wanted))),
            _ => false,
        },
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn add(&self, collection: &CollectionPath, fields: Fields) -> StoreResult<String> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.clone()).or_default();

        let mut id = generate_id();
        while docs.contains_key(&id) {
            id = generate_id();
        }

        docs.insert(id.clone(), StoredDocument { fields, version: 1 });
        Ok(id)
    }

    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        Ok(self.read_versioned(path).map(|(doc, _)| doc))
    }

    async fn set(&self, path: &DocumentPath, fields: Fields, mode: WriteMode) -> StoreResult<()> {
        let mut collections = self.collections.write();
        let docs = collections.entry(path.parent()).or_default();

        match docs.get_mut(path.id()) {
            Some(stored) => {
                match mode {
                    WriteMode::Overwrite => stored.fields = fields,
                    WriteMode::Merge => merge_into(&mut stored.fields, fields),
                }
                stored.version += 1;
            }
            None => {
                docs.insert(path.id().to_string(), StoredDocument { fields, version: 1 });
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> StoreResult<()> {
        let mut collections = self.collections.write();
        if let Some(docs) = collections.get_mut(&path.parent()) {
            docs.remove(path.id());
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read();
        let Some(docs) = collections.get(&query.collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<(Option<Value>, Document)> = docs
            .iter()
            .filter(|(_, stored)| {
                query
                    .filters
                    .iter()
                    .all(|filter| matches_filter(&stored.fields, filter))
            })
            .map(|(id, stored)| {
                let sort_key = query
                    .order_by
                    .as_ref()
                    .and_then(|order| resolve_path(&stored.fields, &order.field));
                (
                    sort_key,
                    Document {
                        id: id.clone(),
                        fields: stored.fields.clone(),
                    },
                )
            })
            .collect();

        if let Some(order) = &query.order_by {
            // Ordering on a field drops documents that lack it
            matched.retain(|(key, _)| key.is_some());
            matched.sort_by(|(ka, da), (kb, db)| {
                let ord = match (ka, kb) {
                    (Some(a), Some(b)) => a.total_cmp(b),
                    _ => Ordering::Equal,
                }
                .then_with(|| da.id.cmp(&db.id));
                match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }

        Ok(matched.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn run_transaction(
        &self,
        path: &DocumentPath,
        mutation: &TransactionFn,
    ) -> StoreResult<Fields> {
        for attempt in 1..=self.max_transaction_attempts {
            let (snapshot, version) = self
                .read_versioned(path)
                .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

            let update = mutation(&snapshot)?;

            // Let concurrent transactions interleave between read and commit
            tokio::task::yield_now().await;

            let mut collections = self.collections.write();
            let stored = collections
                .get_mut(&path.parent())
                .and_then(|docs| docs.get_mut(path.id()))
                .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

            if stored.version != version {
                tracing::debug!(%path, attempt, "transaction conflict, retrying");
                continue;
            }

            merge_into(&mut stored.fields, update.clone());
            stored.version += 1;
            return Ok(update);
        }

        Err(StoreError::Aborted(self.max_transaction_attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn posts() -> CollectionPath {
        CollectionPath::root("Community").doc("c1").collection("Post")
    }

    fn post_fields(votes: i64, created_secs: Option<i64>) -> Fields {
        let mut fields = Fields::from([("votes".to_string(), Value::Integer(votes))]);
        if let Some(secs) = created_secs {
            fields.insert(
                "timeCreated".to_string(),
                Value::Timestamp(chrono::DateTime::from_timestamp(secs, 0).unwrap()),
            );
        }
        fields
    }

    fn increment(delta: i64) -> impl Fn(&Document) -> StoreResult<Fields> + Send + Sync {
        move |doc: &Document| {
            let current = match doc.fields.get("votes") {
                Some(Value::Integer(n)) => *n,
                _ => 0,
            };
            Ok(Fields::from([(
                "votes".to_string(),
                Value::Integer(current + delta),
            )]))
        }
    }

    #[tokio::test]
    async fn test_add_generates_distinct_ids() {
        let store = MemoryStore::new();
        let a = store.add(&posts(), Fields::new()).await.unwrap();
        let b = store.add(&posts(), Fields::new()).await.unwrap();

        assert_eq!(a.len(), AUTO_ID_LEN);
        assert_ne!(a, b);
        assert_eq!(store.len(&posts()), 2);
    }

    #[tokio::test]
    async fn test_order_by_drops_documents_missing_field() {
        let store = MemoryStore::new();
        let seeded = [("old", 1, Some(100)), ("new", 2, Some(200)), ("undated", 3, None)];
        for (id, votes, secs) in seeded {
            store
                .set(&posts().doc(id), post_fields(votes, secs), WriteMode::Overwrite)
                .await
                .unwrap();
        }

        let docs = store
            .query(&Query::new(posts()).order_by("timeCreated", Direction::Descending))
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let all = store.query(&Query::new(posts())).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_is_null_requires_present_null() {
        let store = MemoryStore::new();
        let comments = posts().doc("p1").collection("Comment");
        store
            .set(
                &comments.doc("explicit"),
                Fields::from([("replyCommentID".to_string(), Value::Null)]),
                WriteMode::Overwrite,
            )
            .await
            .unwrap();
        store
            .set(&comments.doc("absent"), Fields::new(), WriteMode::Overwrite)
            .await
            .unwrap();

        let docs = store
            .query(&Query::new(comments).where_null("replyCommentID"))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "explicit");
    }

    #[tokio::test]
    async fn test_delete_leaves_subcollections() {
        let store = MemoryStore::new();
        let post = posts().doc("p1");
        let comments = post.collection("Comment");
        store.set(&post, Fields::new(), WriteMode::Overwrite).await.unwrap();
        store.add(&comments, Fields::new()).await.unwrap();

        store.delete(&post).await.unwrap();

        assert!(store.get(&post).await.unwrap().is_none());
        assert_eq!(store.len(&comments), 1);
    }

    #[tokio::test]
    async fn test_transaction_on_missing_document() {
        let store = MemoryStore::new();
        let result = store
            .run_transaction(&posts().doc("ghost"), &increment(1))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_transactions_serialize() {
        let store = Arc::new(MemoryStore::new().with_max_transaction_attempts(64));
        let path = posts().doc("p1");
        store.set(&path, post_fields(0, None), WriteMode::Overwrite).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                store.run_transaction(&path, &increment(1)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let doc = store.get(&path).await.unwrap().unwrap();
        assert_eq!(doc.fields.get("votes"), Some(&Value::Integer(20)));
    }

    #[tokio::test]
    async fn test_transaction_gives_up_after_max_attempts() {
        let store = Arc::new(MemoryStore::new().with_max_transaction_attempts(1));
        let path = posts().doc("p1");
        store.set(&path, post_fields(0, None), WriteMode::Overwrite).await.unwrap();

        // A mutation that sneaks a competing write in before every commit
        let competitor = store.clone();
        let competing_path = path.clone();
        let mutation = move |doc: &Document| {
            let mut collections = competitor.collections.write();
            if let Some(stored) = collections
                .get_mut(&competing_path.parent())
                .and_then(|docs| docs.get_mut(competing_path.id()))
            {
                stored.version += 1;
            }
            increment(1)(doc)
        };

        let result = store.run_transaction(&path, &mutation).await;
        assert_eq!(result, Err(StoreError::Aborted(1)));
    }
}
