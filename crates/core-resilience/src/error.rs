//! Error types for the resilience primitives

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the resilience primitives themselves.
///
/// Failures of the wrapped external call are never represented here; they
/// are classified into an [`ErrorClass`](crate::ErrorClass) and absorbed by
/// the orchestrator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// No pooled resource became available within the acquire timeout
    #[error("Resource pool exhausted: no resource available within {0:?}")]
    PoolTimeout(Duration),

    /// The pool was closed while (or before) waiting for a resource
    #[error("Resource pool is closed")]
    PoolClosed,

    /// The resource factory failed to create a resource
    #[error("Failed to create resource: {0}")]
    ResourceCreation(String),

    /// A configuration value was rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ResilienceError {
    /// True when the error reflects resource exhaustion rather than a fault
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, ResilienceError::PoolTimeout(_))
    }

    /// True when retrying the same operation later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::PoolTimeout(_) | ResilienceError::ResourceCreation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let timeout = ResilienceError::PoolTimeout(Duration::from_secs(1));
        assert!(timeout.is_exhaustion());
        assert!(timeout.is_transient());

        let closed = ResilienceError::PoolClosed;
        assert!(!closed.is_exhaustion());
        assert!(!closed.is_transient());

        let config = ResilienceError::InvalidConfig("max_size".to_string());
        assert!(!config.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = ResilienceError::ResourceCreation("refused".to_string());
        assert_eq!(err.to_string(), "Failed to create resource: refused");
    }
}
