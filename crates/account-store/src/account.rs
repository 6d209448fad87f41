//! Pooled account record model

use common::Secret;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a pooled account.
///
/// `Idle` accounts are waiting to be handed out. `Available` accounts have
/// been claimed by a client and are inside their usage window. `Busy`
/// accounts sit out a rate-limit cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Available,
    Busy,
}

impl LifecycleState {
    /// Human-readable state for logs, health output, and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Available => "available",
            LifecycleState::Busy => "busy",
        }
    }
}

/// A single pooled account.
///
/// Timestamps (`rate_limit_reset_at`, `last_used_at`) are unix seconds,
/// matching the units the rate-limit monitor reports in. `credential` is
/// the raw bearer secret; it is persisted to the (0600) store file but must
/// never appear in API responses or logs. Clients address accounts by
/// `public_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Store-assigned numeric id, immutable for the record's lifetime
    pub id: u64,
    /// Opaque external identifier clients use instead of the secret
    pub public_id: String,
    /// Bearer secret for the upstream service
    pub credential: Secret<String>,
    /// Upstream organization identifier, recorded once observed; rate-limit
    /// signals are correlated against this
    #[serde(default)]
    pub organization_ref: Option<String>,
    /// Disabled accounts are never selectable
    pub enabled: bool,
    pub lifecycle_state: LifecycleState,
    /// Unix seconds when the current cooldown ends; set and in the future
    /// means throttled
    #[serde(default)]
    pub rate_limit_reset_at: Option<u64>,
    /// Unix seconds of the last successful activation
    #[serde(default)]
    pub last_used_at: Option<u64>,
    #[serde(default)]
    pub usage_count: u64,
}

impl Account {
    /// Whether the account is inside a rate-limit cooldown at `now`.
    ///
    /// A reset deadline in the past does not count: the record merely
    /// hasn't been swept yet.
    pub fn is_throttled(&self, now: u64) -> bool {
        self.rate_limit_reset_at.is_some_and(|reset| reset > now)
    }

    /// Seconds of cooldown remaining at `now`; zero when not throttled.
    pub fn cooldown_remaining(&self, now: u64) -> u64 {
        self.rate_limit_reset_at
            .map(|reset| reset.saturating_sub(now))
            .unwrap_or(0)
    }
}

/// Parameters for inserting a new account.
///
/// The store assigns `id` and `public_id`; new accounts start `Idle` with
/// no cooldown and no usage history.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub credential: Secret<String>,
    pub organization_ref: Option<String>,
    pub enabled: bool,
}
