use thiserror::Error;

/// Firestore Client Error Types
#[derive(Error, Debug)]
pub enum FirestoreError {
    #[error("Failed to read service account key: {0}")]
    CredentialsError(String),

    #[error("Failed to parse private key: {0}")]
    KeyParseError(String),

    #[error("Failed to encode JWT: {0}")]
    JwtEncodeError(String),

    #[error("Token request failed: {0}")]
    TokenError(String),

    #[error("Firestore request failed: {0}")]
    RequestError(String),

    #[error("Failed to parse Firestore response: {0}")]
    ResponseParseError(String),

    #[error("Firestore API error: {status} ({code}) - {message}")]
    ApiError {
        code: u16,
        status: String,
        message: String,
    },
}

impl FirestoreError {
    /// Canonical gRPC status name reported by the API, if any
    pub fn status(&self) -> Option<&str> {
        match self {
            FirestoreError::ApiError { status, .. } => Some(status.as_str()),
            _ => None,
        }
    }

    /// The commit lost an optimistic concurrency race
    pub fn is_aborted(&self) -> bool {
        matches!(self.status(), Some("ABORTED"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FirestoreError::ApiError { code: 404, .. })
            || matches!(self.status(), Some("NOT_FOUND"))
    }

    /// Failure worth retrying for idempotent calls
    pub fn is_transient(&self) -> bool {
        match self {
            FirestoreError::RequestError(_) => true,
            FirestoreError::ApiError { code, status, .. } => {
                matches!(
                    status.as_str(),
                    "UNAVAILABLE" | "DEADLINE_EXCEEDED" | "RESOURCE_EXHAUSTED"
                ) || *code == 503
                    || *code == 429
            }
            _ => false,
        }
    }
}

impl From<FirestoreError> for String {
    fn from(err: FirestoreError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, status: &str) -> FirestoreError {
        FirestoreError::ApiError {
            code,
            status: status.to_string(),
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_classification() {
        assert!(api_error(409, "ABORTED").is_aborted());
        assert!(!api_error(409, "ABORTED").is_transient());
        assert!(api_error(503, "UNAVAILABLE").is_transient());
        assert!(api_error(404, "NOT_FOUND").is_not_found());
        assert!(!api_error(403, "PERMISSION_DENIED").is_transient());
        assert!(FirestoreError::RequestError("connection reset".into()).is_transient());
    }
}
