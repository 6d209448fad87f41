//! Pool engine: signal ingestion, selection, and activation
//!
//! The engine owns no state of its own. Every operation reads or writes
//! the shared account store, takes its notion of "now" from the injected
//! clock, and returns a typed result the HTTP layer maps onto responses.
//!
//! Selection is a point-in-time read with no reservation: two concurrent
//! callers can be handed the same idle account. The activation gate turns
//! that race into a visible state conflict, because its precondition check
//! and state write happen as one compare-and-swap inside the store.

use std::sync::Arc;

use account_store::{Account, AccountStore, ActivateOutcome, LifecycleState, RateLimitOutcome};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::orgref::extract_org_ref;
use crate::signal::{RateLimitSignal, resolve_cooldown};

/// Tuning knobs for the engine, sourced from the service config.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    /// Cooldown applied when a signal carries no reset hint (seconds)
    pub default_cooldown_secs: u64,
    /// How long a claimed account stays `available` without further use
    /// before the reconciler returns it to `idle` (seconds)
    pub availability_window_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            default_cooldown_secs: crate::signal::DEFAULT_COOLDOWN_SECS,
            availability_window_secs: 300,
        }
    }
}

/// What the engine did with an ingested signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Cooldown recorded on the matched account
    Applied,
    /// Matched an account, but an equal or later deadline was already set
    AlreadyCovered,
    /// The signal URL carried no organization reference
    NoOrgRef,
    /// No pooled account has the referenced organization recorded
    NoMatch,
}

impl SignalOutcome {
    /// Outcome label for logs and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            SignalOutcome::Applied => "applied",
            SignalOutcome::AlreadyCovered => "already_covered",
            SignalOutcome::NoOrgRef => "no_org_ref",
            SignalOutcome::NoMatch => "no_match",
        }
    }
}

/// The engine's answer to an ingested signal.
#[derive(Debug, Clone)]
pub struct SignalReceipt {
    pub cooldown_seconds: u64,
    pub reset_at: u64,
    pub account_found: bool,
    pub outcome: SignalOutcome,
}

/// Per-state tallies over a snapshot of the pool.
///
/// Buckets are disjoint: disabled first, then busy (throttled or still
/// marked busy), then available, then idle.
#[derive(Debug, Default, Clone, Copy)]
struct PoolCounts {
    total: usize,
    enabled: usize,
    idle: usize,
    available: usize,
    busy: usize,
    disabled: usize,
}

impl PoolCounts {
    fn tally(accounts: &[Account], now: u64) -> Self {
        let mut counts = Self {
            total: accounts.len(),
            ..Self::default()
        };
        for account in accounts {
            if !account.enabled {
                counts.disabled += 1;
                continue;
            }
            counts.enabled += 1;
            if account.is_throttled(now) || account.lifecycle_state == LifecycleState::Busy {
                counts.busy += 1;
            } else if account.lifecycle_state == LifecycleState::Available {
                counts.available += 1;
            } else {
                counts.idle += 1;
            }
        }
        counts
    }

    fn selectable(&self) -> usize {
        self.idle + self.available
    }
}

/// Coordination engine over the shared account store.
pub struct PoolEngine {
    store: Arc<AccountStore>,
    clock: Arc<dyn Clock>,
    settings: PoolSettings,
}

impl PoolEngine {
    pub fn new(store: Arc<AccountStore>, clock: Arc<dyn Clock>, settings: PoolSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    /// The backing store (admin CRUD goes through this directly).
    pub fn store(&self) -> &Arc<AccountStore> {
        &self.store
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }

    /// Current unix time from the injected clock.
    pub fn now_unix(&self) -> u64 {
        self.clock.now_unix()
    }

    /// Ingest a throttle signal from the rate-limit monitor.
    ///
    /// Validates the payload, resolves the cooldown deadline, extracts the
    /// organization reference from the signal URL, and records the
    /// cooldown on the matching account (deadline and busy state land in
    /// one durable write). Signals that match no account are logged and
    /// dropped without touching the store.
    ///
    /// Out-of-order delivery guard: the later deadline wins. A signal
    /// whose deadline is earlier than (or equal to) the one already
    /// recorded leaves the account untouched, which also makes repeated
    /// identical signals a no-op. The store compares and writes under one
    /// lock hold, so concurrent signals for the same account cannot land a
    /// stale deadline over a fresher one.
    pub async fn ingest_signal(&self, signal: RateLimitSignal) -> Result<SignalReceipt> {
        let signal_type = signal
            .signal_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::InvalidSignal("missing required field: type".into()))?;
        let timestamp = signal
            .timestamp
            .ok_or_else(|| Error::InvalidSignal("missing required field: timestamp".into()))?;

        let resolved = resolve_cooldown(&signal, timestamp, self.settings.default_cooldown_secs);

        let url = signal.url.as_deref().unwrap_or("");
        let Some(org_ref) = extract_org_ref(url) else {
            debug!(
                signal_type,
                url, "signal url carries no organization ref, dropping"
            );
            return Ok(SignalReceipt {
                cooldown_seconds: resolved.cooldown_seconds,
                reset_at: resolved.reset_at,
                account_found: false,
                outcome: SignalOutcome::NoOrgRef,
            });
        };

        let Some(account) = self.store.get_by_org_ref(org_ref).await else {
            debug!(
                signal_type,
                org_ref, "no pooled account matches organization ref, dropping signal"
            );
            return Ok(SignalReceipt {
                cooldown_seconds: resolved.cooldown_seconds,
                reset_at: resolved.reset_at,
                account_found: false,
                outcome: SignalOutcome::NoMatch,
            });
        };

        match self
            .store
            .set_rate_limit_if_later(account.id, resolved.reset_at)
            .await?
        {
            RateLimitOutcome::AlreadyCovered(current) => {
                debug!(
                    account = %account.public_id,
                    current_reset = current,
                    incoming_reset = resolved.reset_at,
                    "keeping later reset deadline"
                );
                Ok(SignalReceipt {
                    cooldown_seconds: resolved.cooldown_seconds,
                    reset_at: resolved.reset_at,
                    account_found: true,
                    outcome: SignalOutcome::AlreadyCovered,
                })
            }
            RateLimitOutcome::Applied => {
                info!(
                    account = %account.public_id,
                    signal_type,
                    limit_type = signal.limit_type.as_deref().unwrap_or("unknown"),
                    cooldown_secs = resolved.cooldown_seconds,
                    reset_at = resolved.reset_at,
                    "account throttled"
                );
                Ok(SignalReceipt {
                    cooldown_seconds: resolved.cooldown_seconds,
                    reset_at: resolved.reset_at,
                    account_found: true,
                    outcome: SignalOutcome::Applied,
                })
            }
        }
    }

    /// Open selection: pick the account a request should use.
    ///
    /// Filters to enabled accounts that are idle or available and not
    /// throttled, then orders `available` before `idle`, least recently
    /// used first (never used counts as earliest), account id as the final
    /// tie-break. Pure read; the caller claims the account via
    /// [`activate`](PoolEngine::activate).
    pub async fn select(&self) -> Result<Account> {
        let now = self.clock.now_unix();
        let accounts = self.store.all().await;

        let mut candidates: Vec<&Account> = accounts
            .iter()
            .filter(|a| {
                a.enabled
                    && matches!(
                        a.lifecycle_state,
                        LifecycleState::Idle | LifecycleState::Available
                    )
                    && !a.is_throttled(now)
            })
            .collect();

        candidates.sort_by_key(|a| {
            let state_rank = match a.lifecycle_state {
                LifecycleState::Available => 0u8,
                _ => 1,
            };
            (state_rank, a.last_used_at.unwrap_or(0), a.id)
        });

        match candidates.first() {
            Some(account) => {
                debug!(account = %account.public_id, state = account.lifecycle_state.label(), "selected account");
                Ok((*account).clone())
            }
            None => {
                let counts = PoolCounts::tally(&accounts, now);
                Err(Error::PoolExhausted(exhausted_message(&counts)))
            }
        }
    }

    /// Targeted selection: resolve a specific account by public id.
    ///
    /// Fails with not-found for an unknown id, and with unavailable when
    /// the account is disabled or throttled (reporting the remaining
    /// cooldown). Lifecycle state is not checked here; a busy-marked
    /// account whose cooldown has lapsed is still returnable.
    pub async fn select_target(&self, public_id: &str) -> Result<Account> {
        let now = self.clock.now_unix();
        let account = self
            .store
            .get_by_public_id(public_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("account {public_id} not found")))?;

        if !account.enabled {
            return Err(Error::Unavailable {
                message: format!("account {public_id} is disabled"),
                retry_after_secs: None,
            });
        }
        if account.is_throttled(now) {
            return Err(Error::Unavailable {
                message: format!("account {public_id} is rate limited"),
                retry_after_secs: Some(account.cooldown_remaining(now)),
            });
        }
        Ok(account)
    }

    /// Activation gate: claim an idle account for use.
    ///
    /// Delegates to the store's compare-and-swap, then classifies a
    /// rejection: disabled and throttled map to unavailable, any other
    /// non-idle state is a conflict the caller resolves by selecting a
    /// different account.
    pub async fn activate(&self, public_id: &str) -> Result<Account> {
        let now = self.clock.now_unix();
        match self.store.activate_if_idle(public_id, now).await? {
            ActivateOutcome::Activated(account) => {
                info!(
                    account = %account.public_id,
                    usage = account.usage_count,
                    "account activated"
                );
                Ok(account)
            }
            ActivateOutcome::Rejected(account) => {
                if !account.enabled {
                    Err(Error::Unavailable {
                        message: format!("account {public_id} is disabled"),
                        retry_after_secs: None,
                    })
                } else if account.is_throttled(now) {
                    Err(Error::Unavailable {
                        message: format!("account {public_id} is rate limited"),
                        retry_after_secs: Some(account.cooldown_remaining(now)),
                    })
                } else {
                    Err(Error::StateConflict {
                        state: account.lifecycle_state.label().into(),
                    })
                }
            }
        }
    }

    /// Force a cooldown deadline on a named account (admin path).
    pub async fn force_rate_limit(&self, public_id: &str, reset_at: u64) -> Result<()> {
        let account = self
            .store
            .get_by_public_id(public_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("account {public_id} not found")))?;
        self.store.set_rate_limit(account.id, reset_at).await?;
        info!(account = %public_id, reset_at, "rate limit force-set");
        Ok(())
    }

    /// Force a lifecycle state on a named account (admin path).
    ///
    /// Touches only the state field; cooldown bookkeeping is left alone.
    pub async fn force_state(&self, public_id: &str, state: LifecycleState) -> Result<()> {
        let account = self
            .store
            .get_by_public_id(public_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("account {public_id} not found")))?;
        self.store.set_lifecycle_state(account.id, state).await?;
        info!(account = %public_id, state = state.label(), "lifecycle state force-set");
        Ok(())
    }

    /// Pool health summary for the health endpoint.
    ///
    /// `healthy` when every enabled account is selectable, `degraded` when
    /// some are, `unhealthy` when none are (or the pool is empty).
    /// Disabled accounts are deliberate removals and don't degrade health.
    pub async fn health(&self) -> serde_json::Value {
        let now = self.clock.now_unix();
        let accounts = self.store.all().await;
        let counts = PoolCounts::tally(&accounts, now);

        let status = if counts.enabled > 0 && counts.selectable() == counts.enabled {
            "healthy"
        } else if counts.selectable() > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "accounts_total": counts.total,
            "accounts_selectable": counts.selectable(),
            "accounts_idle": counts.idle,
            "accounts_available": counts.available,
            "accounts_busy": counts.busy,
            "accounts_disabled": counts.disabled,
        })
    }

    /// Per-account status listing for dashboards.
    ///
    /// Accounts are identified by public id only; the credential never
    /// appears. Throttled accounts report their remaining cooldown.
    pub async fn statuses(&self) -> serde_json::Value {
        let now = self.clock.now_unix();
        let accounts = self.store.all().await;
        let counts = PoolCounts::tally(&accounts, now);

        let mut entries = Vec::with_capacity(accounts.len());
        for account in &accounts {
            let entry = if account.is_throttled(now) {
                serde_json::json!({
                    "public_id": account.public_id,
                    "state": account.lifecycle_state.label(),
                    "enabled": account.enabled,
                    "usage_count": account.usage_count,
                    "last_used_at": account.last_used_at,
                    "cooldown_remaining_secs": account.cooldown_remaining(now),
                })
            } else {
                serde_json::json!({
                    "public_id": account.public_id,
                    "state": account.lifecycle_state.label(),
                    "enabled": account.enabled,
                    "usage_count": account.usage_count,
                    "last_used_at": account.last_used_at,
                })
            };
            entries.push(entry);
        }

        serde_json::json!({
            "accounts": entries,
            "accounts_total": counts.total,
            "accounts_selectable": counts.selectable(),
        })
    }
}

/// Build the exhausted error body with pool counts.
fn exhausted_message(counts: &PoolCounts) -> String {
    serde_json::json!({
        "error": {
            "type": "pool_exhausted",
            "message": "No eligible accounts available",
            "pool": {
                "accounts_total": counts.total,
                "accounts_idle": counts.idle,
                "accounts_available": counts.available,
                "accounts_busy": counts.busy,
                "accounts_disabled": counts.disabled,
            }
        }
    })
    .to_string()
}
