/// Configuration management for Community Service
///
/// Loads configuration from environment variables.
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Document store configuration
    pub store: StoreConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
}

/// Which document store backs the repositories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Firestore,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "firestore" => Ok(StoreBackend::Firestore),
            other => bail!("unknown STORE_BACKEND `{}` (expected memory or firestore)", other),
        }
    }
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Google Cloud project owning the Firestore database
    pub project_id: Option<String>,
    #[serde(default = "default_database_id")]
    pub database_id: String,
    /// Service account key file
    pub credentials_path: Option<String>,
    /// `host:port` of a local emulator, bypasses OAuth
    pub emulator_host: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries of idempotent reads on transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_transaction_max_attempts")]
    pub transaction_max_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            project_id: None,
            database_id: default_database_id(),
            credentials_path: None,
            emulator_host: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            transaction_max_attempts: default_transaction_max_attempts(),
        }
    }
}

// Default values
fn default_database_id() -> String {
    "(default)".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_transaction_max_attempts() -> u32 {
    5
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app = AppConfig {
            env: lookup("APP_ENV").unwrap_or_else(|| "development".to_string()),
        };

        let backend = match lookup("STORE_BACKEND") {
            Some(raw) => raw.parse().context("invalid STORE_BACKEND")?,
            None => StoreBackend::Memory,
        };

        let store = StoreConfig {
            backend,
            project_id: lookup("FIRESTORE_PROJECT_ID"),
            database_id: lookup("FIRESTORE_DATABASE_ID").unwrap_or_else(default_database_id),
            credentials_path: lookup("GOOGLE_APPLICATION_CREDENTIALS"),
            emulator_host: lookup("FIRESTORE_EMULATOR_HOST"),
            request_timeout_secs: lookup("STORE_REQUEST_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_request_timeout_secs),
            max_retries: lookup("STORE_MAX_RETRIES")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_max_retries),
            transaction_max_attempts: lookup("STORE_TRANSACTION_MAX_ATTEMPTS")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_transaction_max_attempts),
        };

        if store.backend == StoreBackend::Firestore && store.project_id.is_none() {
            bail!("FIRESTORE_PROJECT_ID environment variable not set");
        }

        Ok(Config { app, store })
    }
}
