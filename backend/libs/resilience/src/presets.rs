/// Preset configurations for remote store calls
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Configuration bundle for a call class
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub timeout: TimeoutConfig,
    pub retry: Option<RetryConfig>,
}

/// Idempotent document reads and queries
///
/// - Timeout: 10s
/// - Retry: 2 attempts with exponential backoff
pub fn document_read_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(10),
        },
        retry: Some(RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }),
    }
}

/// Document writes (create, patch, delete, commit)
///
/// - Timeout: 10s
/// - No retry (a create retried after a lost response duplicates the document)
pub fn document_write_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(10),
        },
        retry: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_are_never_retried() {
        assert!(document_write_config().retry.is_none());
    }

    #[test]
    fn test_read_backoff_is_bounded() {
        let retry = document_read_config().retry.unwrap();
        assert!(retry.initial_backoff <= retry.max_backoff);
        assert!(retry.max_retries > 0);
    }
}
