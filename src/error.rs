//! Error types for the Quotagate service.
//!
//! Admission decisions never fail; these errors only come out of loading
//! configuration, compiling custom rules and running the server.

use thiserror::Error;

/// Main error type for Quotagate operations.
#[derive(Error, Debug)]
pub enum QuotagateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A custom rule carried a pattern that does not compile
    #[error("Invalid pattern for rule '{rule}': {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for QuotagateError {
    fn from(err: config::ConfigError) -> Self {
        QuotagateError::Config(err.to_string())
    }
}

/// Result type alias for Quotagate operations.
pub type Result<T> = std::result::Result<T, QuotagateError>;
