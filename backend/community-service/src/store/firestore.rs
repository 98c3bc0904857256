/// Cloud Firestore backend
///
/// Translates the store seam into Firestore REST calls. Reads are retried on
/// transient failures; writes are not, since a create retried after a lost
/// response would duplicate the document. Transactions follow the Firestore
/// client libraries: begin, read inside the transaction, commit with an
/// `exists` precondition, and start over when the commit is `ABORTED`.
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use firestore_client::models as wire;
use firestore_client::{FirestoreClient, FirestoreError};
use resilience::{with_deadline, with_retry_if, RetryConfig};
use std::collections::HashMap;
use std::time::Duration;

use super::value::merge_field_paths;
use super::{
    CollectionPath, Direction, Document, DocumentPath, DocumentStore, Fields, Filter, Query,
    StoreError, StoreResult, TransactionFn, Value, WriteMode,
};
use crate::config::StoreConfig;

pub struct FirestoreStore {
    client: FirestoreClient,
    read_timeout: Duration,
    write_timeout: Duration,
    read_retry: RetryConfig,
    max_transaction_attempts: u32,
}

impl FirestoreStore {
    pub fn new(client: FirestoreClient) -> Self {
        let read = resilience::document_read_config();
        let write = resilience::document_write_config();
        Self {
            client,
            read_timeout: read.timeout.duration,
            write_timeout: write.timeout.duration,
            read_retry: read.retry.unwrap_or_else(RetryConfig::disabled),
            max_transaction_attempts: super::memory::DEFAULT_MAX_TRANSACTION_ATTEMPTS,
        }
    }

    /// Build a client from configuration (emulator or service account)
    pub fn from_config(config: &StoreConfig) -> anyhow::Result<Self> {
        let project_id = config
            .project_id
            .clone()
            .context("FIRESTORE_PROJECT_ID must be set for the firestore backend")?;

        let client = match (&config.emulator_host, &config.credentials_path) {
            (Some(host), _) => FirestoreClient::emulator(host, project_id, &config.database_id),
            (None, Some(path)) => FirestoreClient::from_key_file(path, &config.database_id)
                .context("failed to load Firestore service account key")?
                .with_project(project_id),
            (None, None) => anyhow::bail!(
                "GOOGLE_APPLICATION_CREDENTIALS or FIRESTORE_EMULATOR_HOST must be set \
                 for the firestore backend"
            ),
        };

        Ok(Self::new(client)
            .with_request_timeout(Duration::from_secs(config.request_timeout_secs))
            .with_read_retries(config.max_retries)
            .with_max_transaction_attempts(config.transaction_max_attempts))
    }

    /// Deadline applied to every request, reads and writes alike
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self.write_timeout = timeout;
        self
    }

    pub fn with_read_retries(mut self, max_retries: u32) -> Self {
        self.read_retry.max_retries = max_retries;
        self
    }

    pub fn with_max_transaction_attempts(mut self, attempts: u32) -> Self {
        self.max_transaction_attempts = attempts.max(1);
        self
    }

    async fn read<T, F, Fut>(&self, call: F) -> StoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = StoreResult<T>>,
    {
        with_retry_if(&self.read_retry, StoreError::is_transient, || {
            with_deadline(self.read_timeout, call())
        })
        .await
        .map_err(|e| e.into_inner())
    }

    async fn write<T, Fut>(&self, call: Fut) -> StoreResult<T>
    where
        Fut: std::future::Future<Output = StoreResult<T>>,
    {
        with_deadline(self.write_timeout, call).await
    }

    /// One begin/read/commit round; `Ok(None)` means Firestore aborted it
    async fn transaction_attempt(
        &self,
        path: &DocumentPath,
        mutation: &TransactionFn,
    ) -> StoreResult<Option<Fields>> {
        let begun = with_deadline(self.write_timeout, async {
            self.client
                .begin_transaction()
                .await
                .map_err(TxFailure::from)
        })
        .await;
        let transaction = match begun {
            Ok(transaction) => transaction,
            Err(TxFailure::Aborted) => return Ok(None),
            Err(TxFailure::Failed(e)) => return Err(e),
        };

        let outcome = self.transaction_body(path, mutation, &transaction).await;

        match outcome {
            Ok(fields) => Ok(Some(fields)),
            Err(TxFailure::Aborted) => Ok(None),
            Err(TxFailure::Failed(e)) => {
                // Release the locks held by the transaction; the commit never happened
                if let Err(rollback_err) = self.client.rollback(&transaction).await {
                    tracing::debug!(%path, error = %rollback_err, "transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn transaction_body(
        &self,
        path: &DocumentPath,
        mutation: &TransactionFn,
        transaction: &str,
    ) -> Result<Fields, TxFailure> {
        let read = with_deadline(self.write_timeout, async {
            Ok::<_, TxFailure>(
                self.client
                    .get_document(path.as_str(), Some(transaction))
                    .await,
            )
        })
        .await?;
        let current = transactional_read(path, read)?;

        let snapshot = Document {
            id: path.id().to_string(),
            fields: fields_from_wire(current.fields)?,
        };

        let update = mutation(&snapshot)?;

        let write = wire::Write {
            update: wire::Document {
                name: self.client.document_name(path.as_str()),
                fields: fields_to_wire(&update),
                ..Default::default()
            },
            update_mask: Some(wire::DocumentMask {
                field_paths: merge_field_paths(&update),
            }),
            current_document: Some(wire::Precondition { exists: true }),
        };

        let committed = with_deadline(self.write_timeout, async {
            self.client
                .commit(std::slice::from_ref(&write), Some(transaction))
                .await
                .map_err(TxFailure::from)
        })
        .await;

        committed.map(|_| update)
    }
}

/// Resolve the read made inside a transaction
///
/// Firestore answers a contended transactional read with `ABORTED`; the
/// attempt is then started over like an aborted commit.
fn transactional_read(
    path: &DocumentPath,
    read: Result<Option<wire::Document>, FirestoreError>,
) -> Result<wire::Document, TxFailure> {
    read?.ok_or_else(|| TxFailure::Failed(StoreError::NotFound(path.to_string())))
}

/// Outcome of a failed transaction attempt
#[derive(Debug)]
enum TxFailure {
    Aborted,
    Failed(StoreError),
}

impl From<StoreError> for TxFailure {
    fn from(err: StoreError) -> Self {
        TxFailure::Failed(err)
    }
}

impl From<FirestoreError> for TxFailure {
    fn from(err: FirestoreError) -> Self {
        if err.is_aborted() {
            TxFailure::Aborted
        } else {
            TxFailure::Failed(map_error(err))
        }
    }
}

impl From<resilience::TimeoutError> for TxFailure {
    fn from(err: resilience::TimeoutError) -> Self {
        TxFailure::Failed(err.into())
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn add(&self, collection: &CollectionPath, fields: Fields) -> StoreResult<String> {
        let document = self
            .write(async {
                self.client
                    .create_document(collection.as_str(), fields_to_wire(&fields))
                    .await
                    .map_err(map_error)
            })
            .await?;

        Ok(document.id().to_string())
    }

    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        let document = self
            .read(|| async {
                self.client
                    .get_document(path.as_str(), None)
                    .await
                    .map_err(map_error)
            })
            .await?;

        document.map(document_from_wire).transpose()
    }

    async fn set(&self, path: &DocumentPath, fields: Fields, mode: WriteMode) -> StoreResult<()> {
        let mask = match mode {
            WriteMode::Overwrite => None,
            WriteMode::Merge => Some(merge_field_paths(&fields)),
        };

        self.write(async {
            self.client
                .patch_document(path.as_str(), fields_to_wire(&fields), mask.as_deref())
                .await
                .map_err(map_error)
        })
        .await?;

        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> StoreResult<()> {
        self.write(async {
            self.client
                .delete_document(path.as_str())
                .await
                .map_err(map_error)
        })
        .await
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let structured = structured_query(query);
        let parent = query.collection.parent_path();

        let documents = self
            .read(|| async {
                self.client
                    .run_query(parent, &structured, None)
                    .await
                    .map_err(map_error)
            })
            .await?;

        documents.into_iter().map(document_from_wire).collect()
    }

    async fn run_transaction(
        &self,
        path: &DocumentPath,
        mutation: &TransactionFn,
    ) -> StoreResult<Fields> {
        for attempt in 1..=self.max_transaction_attempts {
            if let Some(fields) = self.transaction_attempt(path, mutation).await? {
                return Ok(fields);
            }
            tracing::debug!(%path, attempt, "Firestore transaction aborted, retrying");
        }

        Err(StoreError::Aborted(self.max_transaction_attempts))
    }
}

fn map_error(err: FirestoreError) -> StoreError {
    let message = err.to_string();
    match err.status() {
        Some("NOT_FOUND") => StoreError::NotFound(message),
        Some("PERMISSION_DENIED") | Some("UNAUTHENTICATED") => {
            StoreError::PermissionDenied(message)
        }
        _ if err.is_transient() => StoreError::Unavailable(message),
        _ if matches!(err, FirestoreError::ResponseParseError(_)) => {
            StoreError::InvalidDocument(message)
        }
        _ => StoreError::Backend(message),
    }
}

fn structured_query(query: &Query) -> wire::StructuredQuery {
    let mut filters: Vec<wire::Filter> = query.filters.iter().map(filter_to_wire).collect();

    let filter = match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(wire::Filter::CompositeFilter {
            op: wire::CompositeOperator::And,
            filters,
        }),
    };

    let order_by = query
        .order_by
        .iter()
        .map(|order| wire::Order {
            field: wire::FieldReference::new(order.field.clone()),
            direction: match order.direction {
                Direction::Ascending => wire::Direction::Ascending,
                Direction::Descending => wire::Direction::Descending,
            },
        })
        .collect();

    wire::StructuredQuery {
        from: vec![wire::CollectionSelector {
            collection_id: query.collection.collection_id().to_string(),
        }],
        filter,
        order_by,
    }
}

fn filter_to_wire(filter: &Filter) -> wire::Filter {
    match filter {
        Filter::EqualTo { field, value } => wire::Filter::FieldFilter {
            field: wire::FieldReference::new(field.clone()),
            op: wire::FieldOperator::Equal,
            value: value_to_wire(value),
        },
        Filter::IsNull { field } => wire::Filter::UnaryFilter {
            op: wire::UnaryOperator::IsNull,
            field: wire::FieldReference::new(field.clone()),
        },
        Filter::ArrayContainsAny { field, values } => wire::Filter::FieldFilter {
            field: wire::FieldReference::new(field.clone()),
            op: wire::FieldOperator::ArrayContainsAny,
            value: wire::Value::ArrayValue(wire::ArrayValue {
                values: values.iter().map(value_to_wire).collect(),
            }),
        },
    }
}

fn fields_to_wire(fields: &Fields) -> HashMap<String, wire::Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), value_to_wire(value)))
        .collect()
}

fn value_to_wire(value: &Value) -> wire::Value {
    match value {
        Value::Null => wire::Value::NullValue(()),
        Value::Boolean(b) => wire::Value::BooleanValue(*b),
        Value::Integer(n) => wire::Value::IntegerValue(n.to_string()),
        Value::Double(d) => wire::Value::DoubleValue(*d),
        Value::Timestamp(ts) => {
            wire::Value::TimestampValue(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        Value::String(s) => wire::Value::StringValue(s.clone()),
        Value::Array(items) => wire::Value::ArrayValue(wire::ArrayValue {
            values: items.iter().map(value_to_wire).collect(),
        }),
        Value::Map(fields) => wire::Value::MapValue(wire::MapValue {
            fields: fields_to_wire(fields),
        }),
    }
}

fn document_from_wire(document: wire::Document) -> StoreResult<Document> {
    Ok(Document {
        id: document.id().to_string(),
        fields: fields_from_wire(document.fields)?,
    })
}

fn fields_from_wire(fields: HashMap<String, wire::Value>) -> StoreResult<Fields> {
    fields
        .into_iter()
        .map(|(key, value)| Ok((key, value_from_wire(value)?)))
        .collect()
}

fn value_from_wire(value: wire::Value) -> StoreResult<Value> {
    Ok(match value {
        wire::Value::NullValue(()) => Value::Null,
        wire::Value::BooleanValue(b) => Value::Boolean(b),
        wire::Value::IntegerValue(raw) => Value::Integer(raw.parse().map_err(|_| {
            StoreError::InvalidDocument(format!("invalid integer value `{}`", raw))
        })?),
        wire::Value::DoubleValue(d) => Value::Double(d),
        wire::Value::TimestampValue(raw) => Value::Timestamp(
            DateTime::parse_from_rfc3339(&raw)
                .map_err(|e| {
                    StoreError::InvalidDocument(format!("invalid timestamp `{}`: {}", raw, e))
                })?
                .with_timezone(&Utc),
        ),
        wire::Value::StringValue(s) => Value::String(s),
        // Carried as opaque strings; the models never read them
        wire::Value::BytesValue(s) | wire::Value::ReferenceValue(s) => Value::String(s),
        wire::Value::GeoPointValue(point) => Value::Map(Fields::from([
            ("latitude".to_string(), Value::Double(point.latitude)),
            ("longitude".to_string(), Value::Double(point.longitude)),
        ])),
        wire::Value::ArrayValue(array) => Value::Array(
            array
                .values
                .into_iter()
                .map(value_from_wire)
                .collect::<StoreResult<Vec<_>>>()?,
        ),
        wire::Value::MapValue(map) => Value::Map(fields_from_wire(map.fields)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_conversion_round_trip() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T10:15:30.250Z")
            .unwrap()
            .with_timezone(&Utc);
        let fields = Fields::from([
            ("votes".to_string(), Value::Integer(-3)),
            ("timeCreated".to_string(), Value::Timestamp(ts)),
            ("replyCommentID".to_string(), Value::Null),
            (
                "categories".to_string(),
                Value::Array(vec![Value::Map(Fields::from([(
                    "categoryID".to_string(),
                    Value::from("math"),
                )]))]),
            ),
        ]);

        let back = fields_from_wire(fields_to_wire(&fields)).unwrap();
        assert_eq!(back, fields);
    }

    #[test]
    fn test_integer_values_travel_as_strings() {
        let json = serde_json::to_value(value_to_wire(&Value::Integer(42))).unwrap();
        assert_eq!(json, json!({"integerValue": "42"}));
    }

    #[test]
    fn test_bad_integer_is_invalid_document() {
        let result = value_from_wire(wire::Value::IntegerValue("forty".into()));
        assert!(matches!(result, Err(StoreError::InvalidDocument(_))));
    }

    #[test]
    fn test_category_fan_out_query_shape() {
        let query = Query::new(CollectionPath::root("Community").doc("c1").collection("Post"))
            .where_array_contains_any(
                "categories.categoryID",
                vec![Value::from("a"), Value::from("b")],
            )
            .order_by("voteDifference", Direction::Descending);

        let json = serde_json::to_value(structured_query(&query)).unwrap();
        assert_eq!(
            json,
            json!({
                "from": [{"collectionId": "Post"}],
                "where": {"fieldFilter": {
                    "field": {"fieldPath": "categories.categoryID"},
                    "op": "ARRAY_CONTAINS_ANY",
                    "value": {"arrayValue": {"values": [
                        {"stringValue": "a"},
                        {"stringValue": "b"}
                    ]}}
                }},
                "orderBy": [{"field": {"fieldPath": "voteDifference"}, "direction": "DESCENDING"}]
            })
        );
    }

    #[test]
    fn test_multiple_filters_become_composite() {
        let query = Query::new(CollectionPath::root("Subscription"))
            .where_equal_to("userID", "u1")
            .where_equal_to("postID", "p1");

        match structured_query(&query).filter {
            Some(wire::Filter::CompositeFilter { filters, .. }) => assert_eq!(filters.len(), 2),
            other => panic!("expected composite filter, got {:?}", other),
        }
    }

    #[test]
    fn test_error_mapping() {
        let denied = FirestoreError::ApiError {
            code: 403,
            status: "PERMISSION_DENIED".into(),
            message: "rules".into(),
        };
        assert!(matches!(map_error(denied), StoreError::PermissionDenied(_)));

        let unavailable = FirestoreError::RequestError("connection refused".into());
        assert!(map_error(unavailable).is_transient());
    }

    fn aborted() -> FirestoreError {
        FirestoreError::ApiError {
            code: 409,
            status: "ABORTED".into(),
            message: "Transaction lock timeout".into(),
        }
    }

    #[test]
    fn test_aborted_transactional_read_restarts_attempt() {
        let path = CollectionPath::root("Community").doc("c1");
        let result = transactional_read(&path, Err(aborted()));
        assert!(matches!(result, Err(TxFailure::Aborted)));
    }

    #[test]
    fn test_transactional_read_of_missing_document() {
        let path = CollectionPath::root("Community").doc("c1");
        match transactional_read(&path, Ok(None)) {
            Err(TxFailure::Failed(StoreError::NotFound(name))) => {
                assert_eq!(name, path.to_string())
            }
            other => panic!("expected not found, got {:?}", other),
        }
    }

    #[test]
    fn test_transactional_read_failures_roll_back() {
        let path = CollectionPath::root("Community").doc("c1");
        let denied = FirestoreError::ApiError {
            code: 403,
            status: "PERMISSION_DENIED".into(),
            message: "rules".into(),
        };
        let result = transactional_read(&path, Err(denied));
        assert!(matches!(
            result,
            Err(TxFailure::Failed(StoreError::PermissionDenied(_)))
        ));
    }

    #[test]
    fn test_from_config_requires_project() {
        let config = StoreConfig {
            backend: crate::config::StoreBackend::Firestore,
            project_id: None,
            ..StoreConfig::default()
        };
        assert!(FirestoreStore::from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_with_emulator() {
        let config = StoreConfig {
            backend: crate::config::StoreBackend::Firestore,
            project_id: Some("demo".into()),
            emulator_host: Some("localhost:8080".into()),
            ..StoreConfig::default()
        };
        let store = FirestoreStore::from_config(&config).unwrap();
        assert_eq!(store.client.project_id, "demo");
        assert_eq!(store.max_transaction_attempts, 5);
    }
}
