//! Error types for pool coordination

/// Errors from pool coordination operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("account not found: {0}")]
    NotFound(String),

    #[error("account unavailable: {message}")]
    Unavailable {
        message: String,
        /// Remaining cooldown when the rejection is a rate limit
        retry_after_secs: Option<u64>,
    },

    #[error("activation conflict: account is {state}")]
    StateConflict { state: String },

    #[error("account store error: {0}")]
    Store(String),
}

impl From<account_store::Error> for Error {
    fn from(e: account_store::Error) -> Self {
        match e {
            account_store::Error::NotFound(msg) => Error::NotFound(msg),
            other => Error::Store(other.to_string()),
        }
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
