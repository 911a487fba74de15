//! Error types for the conversion pipeline

use thiserror::Error;

/// Result type alias for conversion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while validating, rendering, or delivering an image
#[derive(Error, Debug)]
pub enum Error {
    /// The conversion request was rejected before any rendering happened
    #[error("{0}")]
    Validation(String),

    /// Failed to launch or attach to the rendering engine
    #[error("Engine initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load the markup into the page
    #[error("Failed to load content: {0}")]
    LoadError(String),

    /// Failed to capture the rendered page
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Failed to encode or hand the image over to the caller
    #[error("Delivery failed: {0}")]
    DeliveryError(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The request body is larger than the configured limit
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Coarse classification used to pick a response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; never retried
    Validation,
    /// Input larger than the service accepts
    PayloadTooLarge,
    /// Anything that went wrong inside the rendering engine
    Render,
    /// Encoding or download handoff failed
    Delivery,
    /// The render did not finish within its budget
    Timeout,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            Error::DeliveryError(_) => ErrorKind::Delivery,
            Error::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Render,
        }
    }

    /// Message that is safe to show to an end user.
    ///
    /// Validation messages are returned verbatim; engine failures collapse into
    /// a generic message and the details stay in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::PayloadTooLarge => self.to_string(),
            ErrorKind::Timeout => "Rendering timed out".to_string(),
            ErrorKind::Render | ErrorKind::Delivery => "An error occurred during conversion".to_string(),
        }
    }
}
