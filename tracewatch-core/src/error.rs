//! Error types for tracewatch-core

use thiserror::Error;

/// Main error type for the tracewatch-core library
#[derive(Error, Debug)]
pub enum Error {
    /// A sampling session is already running
    #[error("sampling session already active")]
    AlreadyActive,

    /// Operation requires an idle session
    #[error("sampling session is not idle")]
    NotIdle,

    /// Transport-level failure (connect refused, socket error)
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for tracewatch-core
pub type Result<T> = std::result::Result<T, Error>;
