//! Error types for the Cloudnet processing engine.

use thiserror::Error;

/// Result type alias using CloudnetError.
pub type CloudnetResult<T> = Result<T, CloudnetError>;

/// Primary error type for processing operations.
///
/// The variants follow the outcome they imply at the worker boundary:
/// `SkipTask` marks the task complete without an artifact, everything else
/// fails the task. `RawDataMissing` and `Misc` are produced inside handlers
/// and converted to `SkipTask` with a human-readable reason before they reach
/// the worker loop.
#[derive(Debug, Error)]
pub enum CloudnetError {
    // === Skippable conditions ===
    #[error("Raw data missing: {0}")]
    RawDataMissing(String),

    #[error("{0}")]
    Misc(String),

    #[error("{0}")]
    SkipTask(String),

    // === Infrastructure errors ===
    #[error("HTTP error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Http {
        status: Option<u16>,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid NetCDF data: {0}")]
    NetCdf(String),

    #[error("Science stack failed: {0}")]
    Science(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CloudnetError {
    /// Shorthand for a skip with a formatted reason.
    pub fn skip(reason: impl Into<String>) -> Self {
        CloudnetError::SkipTask(reason.into())
    }

    /// Whether the worker should report `complete` instead of `fail`.
    pub fn is_skip(&self) -> bool {
        matches!(self, CloudnetError::SkipTask(_))
    }

    /// Convert a handler-level condition into a skip, keeping the message.
    ///
    /// Infrastructure errors pass through unchanged so they still fail the
    /// task.
    pub fn into_skip(self) -> Self {
        match self {
            CloudnetError::RawDataMissing(msg)
            | CloudnetError::Misc(msg)
            | CloudnetError::SkipTask(msg) => CloudnetError::SkipTask(msg),
            other => other,
        }
    }

    /// HTTP status code, when this error originated from an HTTP response.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            CloudnetError::Http { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_classification() {
        assert!(CloudnetError::skip("no data").is_skip());
        assert!(!CloudnetError::Storage("boom".into()).is_skip());
    }

    #[test]
    fn into_skip_converts_domain_errors() {
        let err = CloudnetError::RawDataMissing("no raw files".into()).into_skip();
        assert!(err.is_skip());
        assert_eq!(err.to_string(), "no raw files");

        let err = CloudnetError::Misc("Incomplete model file".into()).into_skip();
        assert!(err.is_skip());
    }

    #[test]
    fn into_skip_keeps_infrastructure_errors() {
        let err = CloudnetError::Http {
            status: Some(500),
            message: "server error".into(),
        }
        .into_skip();
        assert!(!err.is_skip());
        assert_eq!(err.http_status(), Some(500));
    }
}
