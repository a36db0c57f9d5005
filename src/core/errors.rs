//! Engine error type
//!
//! One error enum shared by every component. Storage-level failures are the
//! only fatal class: the caller must abort the block instead of absorbing them.

use thiserror::Error;

/// Errors produced by the metrics, scoring and alerting engine
#[derive(Debug, Error)]
pub enum SentinelError {
    /// A query or hook received a missing or malformed request
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration write (alert config, rule, weights) was rejected
    #[error("Validation error: {0}")]
    Validation(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backing store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// A point read returned bytes that do not decode
    #[error("Corrupted record at {key}: {reason}")]
    Corruption { key: String, reason: String },

    /// Encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A hook that needs a block context was called outside a block
    #[error("No active block: begin_block must be called first")]
    NoActiveBlock,

    /// Alert status change not permitted by the lifecycle
    #[error("Invalid alert status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Engine configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Prometheus exposition could not be rendered
    #[error("Metrics export error: {0}")]
    Export(#[from] prometheus::Error),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, SentinelError>;

impl SentinelError {
    /// Errors that must halt block processing to keep replicas in agreement
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Corruption { .. })
    }

    /// Errors a caller can surface to the submitter and carry on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::Validation(_)
                | Self::NotFound(_)
                | Self::InvalidTransition { .. }
        )
    }

    pub(crate) fn corruption(key: &[u8], reason: impl ToString) -> Self {
        Self::Corruption {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SentinelError::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "Storage error: disk full");

        let err = SentinelError::InvalidTransition {
            from: "resolved".to_string(),
            to: "pending".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid alert status transition: resolved -> pending");
    }

    #[test]
    fn test_error_classification() {
        assert!(SentinelError::Storage("x".into()).is_fatal());
        assert!(SentinelError::corruption(b"counter/x", "bad json").is_fatal());
        assert!(!SentinelError::Validation("x".into()).is_fatal());

        assert!(SentinelError::InvalidArgument("empty request".into()).is_recoverable());
        assert!(SentinelError::NotFound("module".into()).is_recoverable());
        assert!(!SentinelError::NoActiveBlock.is_recoverable());
    }

    #[test]
    fn test_corruption_context() {
        let err = SentinelError::corruption(b"block/stats", "EOF while parsing");
        assert!(err.to_string().contains("block/stats"));
        assert!(err.to_string().contains("EOF"));
    }
}
