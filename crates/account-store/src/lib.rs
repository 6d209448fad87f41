//! Durable account records for the credential pool
//!
//! A pooled account is a shared upstream credential plus its tracked state:
//! enabled flag, lifecycle state, rate-limit reset deadline, and usage
//! bookkeeping. This crate owns the record model and its file-backed store.
//! The store is the single source of truth: the coordination engine reads
//! and writes through it and keeps no separate authoritative copy.

pub mod account;
pub mod error;
pub mod store;

pub use account::{Account, LifecycleState, NewAccount};
pub use error::{Error, Result};
pub use store::{AccountStore, ActivateOutcome, RateLimitOutcome};
