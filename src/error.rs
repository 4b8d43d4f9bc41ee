//! Error types for Keythrottle.
//!
//! The throttling core never fails; these errors come from the layers around
//! it (configuration, address parsing, the admission gate).

use thiserror::Error;

/// Main error type for Keythrottle operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A textual network address could not be parsed into a key
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Keythrottle operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
