/// Timeout wrapper for remote calls
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub duration: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Operation timed out after {0:?}")]
pub struct TimeoutError(pub Duration);

/// Execute a fallible future with timeout, folding the elapsed case into the caller's error type
pub async fn with_deadline<F, T, E>(duration: Duration, future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<TimeoutError>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(E::from(TimeoutError(duration))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum CallError {
        Remote(&'static str),
        TimedOut,
    }

    impl From<TimeoutError> for CallError {
        fn from(_: TimeoutError) -> Self {
            CallError::TimedOut
        }
    }

    #[tokio::test]
    async fn test_deadline_success() {
        let result: Result<i32, CallError> =
            with_deadline(Duration::from_secs(1), async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_deadline_passes_through_inner_error() {
        let result: Result<i32, CallError> = with_deadline(Duration::from_secs(1), async {
            Err(CallError::Remote("unavailable"))
        })
        .await;

        assert_eq!(result, Err(CallError::Remote("unavailable")));
    }

    #[tokio::test]
    async fn test_deadline_maps_elapsed() {
        let result: Result<i32, CallError> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(1)
        })
        .await;

        assert_eq!(result, Err(CallError::TimedOut));
    }
}
