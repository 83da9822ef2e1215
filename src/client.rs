/*!
 * External analyzer seam
 *
 * The analyzer is a single blocking capability: given the prepared text and
 * the request parameters, produce a result within a time box or fail.
 * Failures are expressed as [`ClientError`] and mapped onto the retry
 * taxonomy by [`classify_client_error`].
 */

use quill_core_resilience::ErrorClass;
use std::time::Duration;
use thiserror::Error;

use crate::analysis::{AnalysisRequest, AnalysisResult};

/// Failure of a single analyzer call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("analyzer did not answer within {0:?}")]
    Timeout(Duration),

    #[error("could not reach analyzer: {0}")]
    Connection(String),

    #[error("analyzer rejected credentials: {0}")]
    Unauthorized(String),

    #[error("analyzer rejected request: {0}")]
    BadRequest(String),

    #[error("unexpected analyzer failure: {0}")]
    Other(String),
}

impl ClientError {
    /// Map an HTTP status from an analyzer backend onto a client error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => ClientError::RateLimited(message),
            401 | 403 => ClientError::Unauthorized(message),
            400 | 404 | 413 | 422 => ClientError::BadRequest(message),
            408 | 504 => ClientError::Timeout(Duration::ZERO),
            502 | 503 => ClientError::Connection(message),
            _ => ClientError::Other(format!("HTTP {}: {}", status, message)),
        }
    }
}

/// Classifier handed to the retry orchestrator
pub fn classify_client_error(error: &ClientError) -> ErrorClass {
    match error {
        ClientError::RateLimited(_) => ErrorClass::RateLimit,
        ClientError::Timeout(_) => ErrorClass::Timeout,
        ClientError::Connection(_) => ErrorClass::Connection,
        ClientError::Unauthorized(_) => ErrorClass::Auth,
        ClientError::BadRequest(_) => ErrorClass::BadRequest,
        ClientError::Other(_) => ErrorClass::Unknown,
    }
}

/// A blocking essay analyzer
pub trait AnalysisClient: Send + Sync {
    /// Analyze `text` (the possibly truncated request text) within `timeout`
    fn analyze(
        &self,
        text: &str,
        request: &AnalysisRequest,
        timeout: Duration,
    ) -> Result<AnalysisResult, ClientError>;

    /// Short name for logs
    fn name(&self) -> &str {
        "analyzer"
    }
}

/// Placeholder used when no analyzer backend is configured
///
/// Every call fails with an authentication error, so requests are always
/// served by the fallback generator without retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredClient;

impl AnalysisClient for UnconfiguredClient {
    fn analyze(
        &self,
        _text: &str,
        _request: &AnalysisRequest,
        _timeout: Duration,
    ) -> Result<AnalysisResult, ClientError> {
        Err(ClientError::Unauthorized(
            "no analyzer backend configured".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "unconfigured"
    }
}
