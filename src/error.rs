/*!
 * Error types for Quill
 */

use quill_core_resilience::ResilienceError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuillError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_DEGRADED: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Error)]
pub enum QuillError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding or decoding a record failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A resilience primitive refused the operation
    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    /// Persisting a result failed
    #[error("Result store error: {0}")]
    Store(String),
}

impl QuillError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            QuillError::Config(_) => EXIT_FATAL,
            QuillError::Resilience(ResilienceError::InvalidConfig(_)) => EXIT_FATAL,
            _ => EXIT_DEGRADED,
        }
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            QuillError::Resilience(err) => err.is_transient(),
            QuillError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for QuillError {
    fn from(err: serde_json::Error) -> Self {
        QuillError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for QuillError {
    fn from(err: toml::de::Error) -> Self {
        QuillError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for QuillError {
    fn from(err: toml::ser::Error) -> Self {
        QuillError::Serialization(format!("TOML encode error: {}", err))
    }
}
