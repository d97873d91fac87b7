//! Inspection error types

use thiserror::Error;

/// The main error type for guest inspection operations
#[derive(Error, Debug)]
pub enum Error {
    /// The guest access session could not be opened, attached, or launched
    #[error("Guest access error: {0}")]
    Access(String),

    /// No operating system was detected, or a requested path is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Read or download failure on an otherwise healthy session
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unrecognized content format or directive argument
    #[error("Format error: {0}")]
    Format(String),

    /// Invalid guest or host path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Block size or block range outside what the image can serve
    #[error("Invalid block range: {0}")]
    InvalidBlockRange(String),

    /// Operation not supported by this provider
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Invalid operation or session state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type alias for guest inspection operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a guest access error
    pub fn access(msg: impl Into<String>) -> Self {
        Error::Access(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create an I/O error from a message
    pub fn io(msg: impl Into<String>) -> Self {
        Error::Io(std::io::Error::other(msg.into()))
    }

    /// Create a format error
    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    /// Create an invalid path error
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Error::InvalidPath(msg.into())
    }

    /// Create an invalid block range error
    pub fn invalid_block_range(msg: impl Into<String>) -> Self {
        Error::InvalidBlockRange(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }

    /// Map a host I/O error, keeping "not found" distinct from other failures
    pub fn from_host_io(err: std::io::Error, context: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::not_found(context.to_string()),
            _ => Error::Io(std::io::Error::new(err.kind(), format!("{}: {}", context, err))),
        }
    }

    /// True for errors that mean "the thing asked for is not there"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
