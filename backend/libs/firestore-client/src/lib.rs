/// Firestore REST client library
///
/// This library provides a small Cloud Firestore client over the documents REST API (v1)
/// used by the community data-access layer.
///
/// It handles:
/// - OAuth2 token generation using Google service accounts
/// - Token caching with automatic refresh
/// - Emulator targeting without authentication
/// - Document create / get / patch / delete
/// - Structured queries (`runQuery`)
/// - Read-write transactions (begin, read, commit, rollback)

pub mod client;
pub mod errors;
pub mod models;

pub use client::FirestoreClient;
pub use errors::FirestoreError;
pub use models::{Document, ServiceAccountKey, StructuredQuery, Value, Write};
