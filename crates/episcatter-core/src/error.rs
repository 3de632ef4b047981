//! Error types for episcatter.

use thiserror::Error;

/// The main error type for episcatter core operations.
#[derive(Error, Debug)]
pub enum ScatterError {
    /// A configuration value lies outside its documented range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Data size mismatch.
    #[error("data size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for episcatter core operations.
pub type Result<T> = std::result::Result<T, ScatterError>;
