//! Error types for squall-core

use thiserror::Error;

/// Result type alias for squall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the squall HTTP engine
#[derive(Debug, Error)]
pub enum Error {
    /// Structurally invalid request message
    #[error("Parse error: {0}")]
    Parse(String),

    /// Cookie attribute rejected by the builder
    #[error("Invalid cookie: {0}")]
    InvalidCookie(String),

    /// Rejected server configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Session requested after the manager was shut down
    #[error("Session manager has been shut down")]
    SessionsClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a parse error from anything displayable
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }

    /// Check if this is a request parse failure
    pub fn is_parse(&self) -> bool {
        matches!(self, Error::Parse(_) | Error::InvalidCookie(_))
    }
}
