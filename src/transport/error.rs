//! Transport error taxonomy
//!
//! Structured errors shared by all backend adapters. The coordinator's
//! retry policy keys off `is_retryable()`: only transient network
//! failures are retried, everything else terminates the job immediately.

/// Errors surfaced by backend transports
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transient connectivity failure; retryable with bounded backoff
    #[error("Network error: {0}")]
    Network(String),

    /// The attachment no longer exists remotely; not retryable
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication or ACL failure; requires re-auth upstream
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Remote version changed since it was last observed; the caller must
    /// re-classify before retrying a push
    #[error("Version conflict: expected {expected}, remote has {actual}")]
    Conflict { expected: String, actual: String },

    /// The caller cancelled the transfer cooperatively
    #[error("Transfer cancelled")]
    Cancelled,

    /// Local disk failure while streaming
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }

    /// Map an HTTP status and response body to a transport error
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => TransportError::Permission(format!("HTTP {}: {}", status, body)),
            404 | 410 => TransportError::NotFound(body.to_string()),
            412 => TransportError::Conflict {
                expected: "<unknown>".to_string(),
                actual: body.to_string(),
            },
            408 | 429 | 500..=599 => {
                TransportError::Network(format!("HTTP {}: {}", status, body))
            }
            _ => TransportError::Network(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Wrap a reqwest error, folding timeouts and connect failures into
    /// the retryable network variant
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}
