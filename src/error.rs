//! Error types for stratus.

use thiserror::Error;

/// Result type alias using stratus's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for stratus operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A required stage property is missing or properties conflict.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialized stream or container file could not be decoded.
    #[error("format error: {0}")]
    Format(String),

    /// The request or data violates the pipeline contract
    /// (absent variable, out-of-domain bounds, dimension mismatch,
    /// inconsistent calendars across files).
    #[error("semantic error: {0}")]
    Semantic(String),

    /// A thread-pool task failed and its result is missing.
    #[error("resource error: {0}")]
    Resource(String),

    /// A calendar conversion failed for the current index.
    #[error("calendar error: {0}")]
    Calendar(String),

    /// Invalid file-matching regular expression.
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Construct a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Construct a format error.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Construct a semantic error.
    pub fn semantic(msg: impl Into<String>) -> Self {
        Self::Semantic(msg.into())
    }

    /// Construct a resource error.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Construct a calendar error.
    pub fn calendar(msg: impl Into<String>) -> Self {
        Self::Calendar(msg.into())
    }
}
