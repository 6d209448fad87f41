//! Common types for the pool coordinator workspace

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
