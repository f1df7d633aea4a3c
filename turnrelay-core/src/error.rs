//! Error types for turnrelay-core

use thiserror::Error;

/// Main error type for the turnrelay-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Sink/transport error (HTTP failure, nonzero exit code, ...)
    #[error("sink error: {0}")]
    Sink(String),

    /// Durable queue error
    #[error("queue error: {0}")]
    Queue(String),
}

/// Result type alias for turnrelay-core
pub type Result<T> = std::result::Result<T, Error>;
