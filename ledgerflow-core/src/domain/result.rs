//! Result and error types for the core library

use thiserror::Error;

/// Core library error type
///
/// Variants map onto how a caller should react: validation errors are the
/// caller's fault and are never retried, everything else fails the run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Transform failed: {message}")]
    Transform { message: String, output: String },

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an upstream (warehouse / file store) error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Create an internal error: a broken invariant, never the caller's fault
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a transform error with the job's captured output
    pub fn transform(msg: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Transform {
            message: msg.into(),
            output: output.into(),
        }
    }

    /// Whether the error was caused by the request itself (400-equivalent)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Self::Upstream(format!("warehouse: {}", err))
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;
