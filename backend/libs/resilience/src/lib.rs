/// Resilience helpers for remote store calls
///
/// This library provides:
/// - **Timeout**: Enforces time limits on every remote call
/// - **Retry**: Exponential backoff with jitter for transient failures
/// - **Preset Configurations**: Pre-tuned settings for document reads and writes
///
/// # Example: Document read with timeout and retry
///
/// ```rust,no_run
/// use resilience::{presets, timeout::with_deadline, retry::with_retry, TimeoutError};
///
/// #[derive(Debug)]
/// struct ReadError(String);
///
/// impl std::fmt::Display for ReadError {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str(&self.0)
///     }
/// }
///
/// impl From<TimeoutError> for ReadError {
///     fn from(e: TimeoutError) -> Self {
///         ReadError(e.to_string())
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::document_read_config();
///     let retry = config.retry.unwrap_or_default();
///
///     let result = with_retry(&retry, || {
///         with_deadline(config.timeout.duration, async {
///             // Your document read here
///             Ok::<_, ReadError>(())
///         })
///     })
///     .await;
/// }
/// ```

pub mod presets;
pub mod retry;
pub mod timeout;

pub use presets::{document_read_config, document_write_config, ServiceConfig};
pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_deadline, TimeoutConfig, TimeoutError};
