//! Error types for the batch executor.
//!
//! Failed transfers are not errors: they are recorded on the request and inspected afterwards.
//! This type only covers failures that must surface immediately at the call site.

use thiserror::Error;

use crate::batch::RequestKey;

/// Result type alias using the barrage error type.
pub type Result<T> = std::result::Result<T, BarrageError>;

/// Main error type for the batch executor.
#[derive(Error, Debug)]
pub enum BarrageError {
    /// A scratch sink for header or verbose capture could not be allocated
    #[error("Failed to allocate capture sink: {0}")]
    ResourceExhausted(#[source] std::io::Error),

    /// A request was added under a name that is already registered
    #[error("Request key already registered: {0}")]
    DuplicateKey(RequestKey),

    /// The transport refused an option a capture needs
    #[error("Transfer option rejected: {0}")]
    OptionRejected(&'static str),

    /// Reading back a capture sink failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP client backing a transport could not be constructed
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}
