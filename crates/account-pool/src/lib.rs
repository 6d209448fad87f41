//! Account pool coordination engine
//!
//! Tracks the availability of pooled upstream credentials. Rate-limit
//! signals from the external monitor put accounts into a busy cooldown, a
//! periodic reconciler returns them to idle as deadlines pass and usage
//! windows lapse, and the selection policy picks the account a request
//! should use. The durable account store is the single source of truth;
//! this crate keeps no authoritative state of its own.
//!
//! Account lifecycle:
//! 1. Admin adds an account via the admin API → record stored, state `idle`
//! 2. Open or targeted selection returns an eligible account (point-in-time
//!    read, no reservation)
//! 3. Client activates the chosen account → `idle` becomes `available`,
//!    usage recorded; a non-idle account rejects with a state conflict
//! 4. Rate-limit signal arrives → cooldown deadline recorded, state `busy`
//! 5. Reconciler sweep: expired cooldown → `idle`; lapsed availability
//!    window → `idle`
//!
//! All timing decisions go through an injected [`Clock`] so tests advance
//! time explicitly instead of sleeping.

pub mod clock;
pub mod engine;
pub mod error;
pub mod orgref;
pub mod reconciler;
pub mod signal;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{PoolEngine, PoolSettings, SignalOutcome, SignalReceipt};
pub use error::{Error, Result};
pub use orgref::extract_org_ref;
pub use reconciler::{SweepSummary, reconcile_once, spawn_reconciler};
pub use signal::{RateLimitSignal, ResolvedCooldown, resolve_cooldown};
