//! Error types for account persistence

/// Errors from account store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("account file parse error: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
