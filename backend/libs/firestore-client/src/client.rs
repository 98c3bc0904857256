use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::errors::FirestoreError;
use crate::models::*;

const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// The emulator accepts this fixed bearer token
const EMULATOR_TOKEN: &str = "owner";

type Result<T> = std::result::Result<T, FirestoreError>;

/// How requests are authorized
#[derive(Clone)]
enum Auth {
    ServiceAccount(Arc<ServiceAccountKey>),
    Emulator,
}

/// Cloud Firestore REST Client
///
/// Talks to the Firestore documents API (v1). Manages OAuth2 token generation
/// and caching for service accounts, or targets a local emulator without auth.
/// Document and collection paths are relative to the database root, for
/// example `Community/c1/Post/p1`.
#[derive(Clone)]
pub struct FirestoreClient {
    pub project_id: String,
    pub database_id: String,
    base_url: String,
    auth: Auth,
    token_cache: Arc<Mutex<Option<TokenCache>>>,
    http_client: reqwest::Client,
}

impl FirestoreClient {
    /// Create new Firestore client for the project of the service account
    ///
    /// # Arguments
    /// * `credentials` - Service account key with OAuth2 credentials
    /// * `database_id` - Firestore database id, usually `(default)`
    pub fn new(credentials: ServiceAccountKey, database_id: impl Into<String>) -> Self {
        Self {
            project_id: credentials.project_id.clone(),
            database_id: database_id.into(),
            base_url: FIRESTORE_BASE_URL.to_string(),
            auth: Auth::ServiceAccount(Arc::new(credentials)),
            token_cache: Arc::new(Mutex::new(None)),
            http_client: reqwest::Client::new(),
        }
    }

    /// Load the service account key from a JSON key file
    pub fn from_key_file(path: impl AsRef<Path>, database_id: impl Into<String>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            FirestoreError::CredentialsError(format!("{}: {}", path.as_ref().display(), e))
        })?;
        let credentials: ServiceAccountKey = serde_json::from_str(&raw)
            .map_err(|e| FirestoreError::CredentialsError(e.to_string()))?;
        Ok(Self::new(credentials, database_id))
    }

    /// Target a local emulator (`host:port`)
    pub fn emulator(
        host: &str,
        project_id: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: database_id.into(),
            base_url: format!("http://{}/v1", host.trim_end_matches('/')),
            auth: Auth::Emulator,
            token_cache: Arc::new(Mutex::new(None)),
            http_client: reqwest::Client::new(),
        }
    }

    /// Override the project (service accounts may serve several projects)
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// `projects/{project}/databases/{database}/documents`
    pub fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database_id
        )
    }

    /// Fully qualified resource name of a relative document path
    pub fn document_name(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            self.documents_root()
        } else {
            format!("{}/{}", self.documents_root(), path)
        }
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource)
    }

    /// Create a document with an auto-generated id in `collection_path`
    pub async fn create_document(
        &self,
        collection_path: &str,
        fields: HashMap<String, Value>,
    ) -> Result<Document> {
        let url = self.url(&self.document_name(collection_path));
        let body = Document {
            fields,
            ..Default::default()
        };

        let request = self.http_client.post(&url).json(&body);
        self.send_json(request).await
    }

    /// Fetch a document, `None` when it does not exist
    pub async fn get_document(
        &self,
        path: &str,
        transaction: Option<&str>,
    ) -> Result<Option<Document>> {
        let url = self.url(&self.document_name(path));
        let mut request = self.http_client.get(&url);
        if let Some(transaction) = transaction {
            request = request.query(&[("transaction", transaction)]);
        }

        match self.send_json::<Document>(request).await {
            Ok(document) => Ok(Some(document)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write a document
    ///
    /// Without a mask the document is replaced (created when missing). With a
    /// mask only the listed field paths are written, which gives merge semantics.
    pub async fn patch_document(
        &self,
        path: &str,
        fields: HashMap<String, Value>,
        update_mask: Option<&[String]>,
    ) -> Result<Document> {
        let url = self.url(&self.document_name(path));
        let mut request = self.http_client.request(Method::PATCH, &url);
        if let Some(mask) = update_mask {
            let params: Vec<(&str, &str)> = mask
                .iter()
                .map(|field_path| ("updateMask.fieldPaths", field_path.as_str()))
                .collect();
            request = request.query(&params);
        }

        let body = Document {
            fields,
            ..Default::default()
        };
        self.send_json(request.json(&body)).await
    }

    /// Delete a document; deleting a missing document succeeds
    pub async fn delete_document(&self, path: &str) -> Result<()> {
        let url = self.url(&self.document_name(path));
        self.execute(self.http_client.delete(&url)).await?;
        Ok(())
    }

    /// Run a structured query against the collections under `parent_path`
    ///
    /// `parent_path` is the document owning the collection, or empty for root
    /// collections.
    pub async fn run_query(
        &self,
        parent_path: &str,
        query: &StructuredQuery,
        transaction: Option<&str>,
    ) -> Result<Vec<Document>> {
        let url = self.url(&format!("{}:runQuery", self.document_name(parent_path)));
        let body = RunQueryRequest {
            structured_query: query,
            transaction,
        };

        let items: Vec<RunQueryResponseItem> =
            self.send_json(self.http_client.post(&url).json(&body)).await?;

        Ok(items.into_iter().filter_map(|item| item.document).collect())
    }

    /// Start a read-write transaction
    pub async fn begin_transaction(&self) -> Result<String> {
        let url = self.url(&format!("{}:beginTransaction", self.documents_root()));
        let response: BeginTransactionResponse = self
            .send_json(self.http_client.post(&url).json(&serde_json::json!({})))
            .await?;
        Ok(response.transaction)
    }

    /// Commit writes, optionally as the end of a transaction
    pub async fn commit(&self, writes: &[Write], transaction: Option<&str>) -> Result<()> {
        let url = self.url(&format!("{}:commit", self.documents_root()));
        let body = CommitRequest {
            writes,
            transaction,
        };
        self.execute(self.http_client.post(&url).json(&body)).await?;
        Ok(())
    }

    pub async fn rollback(&self, transaction: &str) -> Result<()> {
        let url = self.url(&format!("{}:rollback", self.documents_root()));
        let body = RollbackRequest { transaction };
        self.execute(self.http_client.post(&url).json(&body)).await?;
        Ok(())
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.execute(request).await?;
        response
            .json()
            .await
            .map_err(|e| FirestoreError::ResponseParseError(e.to_string()))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let access_token = self.get_access_token().await?;

        let response = request
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| FirestoreError::RequestError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(api_error(status, &error_text))
    }

    /// Get access token from service account (with caching)
    pub async fn get_access_token(&self) -> Result<String> {
        let credentials = match &self.auth {
            Auth::Emulator => return Ok(EMULATOR_TOKEN.to_string()),
            Auth::ServiceAccount(credentials) => credentials.clone(),
        };

        {
            let cache = self
                .token_cache
                .lock()
                .map_err(|_| FirestoreError::TokenError("token cache lock poisoned".into()))?;
            if let Some(cached) = cache.as_ref() {
                let now = Utc::now().timestamp();
                if cached.expires_at > now + 60 {
                    // Token is still valid for at least 60 more seconds
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let now = Utc::now();
        let claims = JwtClaims {
            iss: credentials.client_email.clone(),
            sub: credentials.client_email.clone(),
            scope: DATASTORE_SCOPE.to_string(),
            aud: credentials.token_uri.clone(),
            exp: (now + Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
        };

        let encoding_key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())
            .map_err(|e| FirestoreError::KeyParseError(e.to_string()))?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(credentials.private_key_id.clone());

        let assertion = encode(&header, &claims, &encoding_key)
            .map_err(|e| FirestoreError::JwtEncodeError(e.to_string()))?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];

        let response = self
            .http_client
            .post(&credentials.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| FirestoreError::TokenError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FirestoreError::TokenError(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token_response: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| FirestoreError::TokenError(e.to_string()))?;

        let expires_at = Utc::now().timestamp() + token_response.expires_in;
        {
            let mut cache = self
                .token_cache
                .lock()
                .map_err(|_| FirestoreError::TokenError("token cache lock poisoned".into()))?;
            *cache = Some(TokenCache {
                access_token: token_response.access_token.clone(),
                expires_at,
            });
        }

        tracing::debug!(project_id = %self.project_id, "refreshed Firestore access token");

        Ok(token_response.access_token)
    }
}

/// Build an API error from a non-success response body
fn api_error(status: StatusCode, body: &str) -> FirestoreError {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => FirestoreError::ApiError {
            code: if envelope.error.code == 0 {
                status.as_u16()
            } else {
                envelope.error.code
            },
            status: if envelope.error.status.is_empty() {
                canonical_status(status).to_string()
            } else {
                envelope.error.status
            },
            message: envelope.error.message,
        },
        Err(_) => FirestoreError::ApiError {
            code: status.as_u16(),
            status: canonical_status(status).to_string(),
            message: body.to_string(),
        },
    }
}

fn canonical_status(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        409 => "ABORTED",
        412 => "FAILED_PRECONDITION",
        429 => "RESOURCE_EXHAUSTED",
        503 => "UNAVAILABLE",
        504 => "DEADLINE_EXCEEDED",
        _ => "UNKNOWN",
    }
}
