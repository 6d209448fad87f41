//! File-backed storage for pooled accounts
//!
//! Manages a JSON file holding every account record. All writes use atomic
//! temp-file + rename to prevent corruption on crash, and every mutation is
//! persisted before the call returns. A tokio Mutex serializes concurrent
//! writers from the HTTP handlers and the reconciler sweep.
//!
//! Status transitions that must hold together land in a single durable
//! write: `set_rate_limit` records the deadline and marks the account busy
//! in one update, `clear_rate_limit` nulls the deadline and returns the
//! account to idle in one update, and the conditional writes
//! (`activate_if_idle`, `set_rate_limit_if_later`) check their
//! preconditions and apply under the same lock hold.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::account::{Account, LifecycleState, NewAccount};
use crate::error::{Error, Result};

/// On-disk layout: a monotonic id counter plus the account records.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreState {
    next_id: u64,
    accounts: BTreeMap<u64, Account>,
}

/// Result of an activation attempt.
///
/// `Rejected` carries the record as it looked when the decision was made,
/// so the caller can tell a disabled account from a throttled one from a
/// plain state conflict.
#[derive(Debug, Clone)]
pub enum ActivateOutcome {
    Activated(Account),
    Rejected(Account),
}

/// Result of a conditional rate-limit write.
///
/// `AlreadyCovered` carries the deadline that was kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Applied,
    AlreadyCovered(u64),
}

/// Thread-safe account file manager.
///
/// The Mutex serializes all writes. Reads acquire the lock briefly to clone
/// the matching records, so request-time reads don't block on sweep writes.
pub struct AccountStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl AccountStore {
    /// Load accounts from the given file path.
    ///
    /// If the file doesn't exist, creates it with zero accounts (cold
    /// start). The pool will report `unhealthy` until accounts are added
    /// via the admin API.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading account file: {e}")))?;
            let state: StoreState = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing account file: {e}")))?;
            info!(path = %path.display(), accounts = state.accounts.len(), "loaded account store");
            state
        } else {
            info!(path = %path.display(), "account file not found, starting with empty store");
            let state = StoreState::default();
            // Create the empty file so future loads don't need the cold-start path
            write_atomic(&path, &state).await?;
            state
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Insert a new account and persist to disk.
    ///
    /// Assigns the numeric id and the `acct_`-prefixed public id. New
    /// accounts start idle with no cooldown and no usage history.
    pub async fn add(&self, params: NewAccount) -> Result<Account> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        let account = Account {
            id,
            public_id: format!("acct_{}", Uuid::new_v4().simple()),
            credential: params.credential,
            organization_ref: params.organization_ref,
            enabled: params.enabled,
            lifecycle_state: LifecycleState::Idle,
            rate_limit_reset_at: None,
            last_used_at: None,
            usage_count: 0,
        };
        state.accounts.insert(id, account.clone());
        debug!(account = %account.public_id, id, "added account");
        write_atomic(&self.path, &state).await?;
        Ok(account)
    }

    /// Remove an account by public id and persist to disk.
    ///
    /// Returns the removed record if it existed.
    pub async fn remove(&self, public_id: &str) -> Result<Option<Account>> {
        let mut state = self.state.lock().await;
        let id = state
            .accounts
            .values()
            .find(|a| a.public_id == public_id)
            .map(|a| a.id);
        let removed = id.and_then(|id| state.accounts.remove(&id));
        if let Some(ref account) = removed {
            debug!(account = %account.public_id, "removed account");
            write_atomic(&self.path, &state).await?;
        }
        Ok(removed)
    }

    /// Snapshot of every account, ordered by id.
    pub async fn all(&self) -> Vec<Account> {
        let state = self.state.lock().await;
        state.accounts.values().cloned().collect()
    }

    /// Get a clone of a specific account by numeric id.
    pub async fn get(&self, id: u64) -> Option<Account> {
        let state = self.state.lock().await;
        state.accounts.get(&id).cloned()
    }

    /// Get a clone of a specific account by public id.
    pub async fn get_by_public_id(&self, public_id: &str) -> Option<Account> {
        let state = self.state.lock().await;
        state
            .accounts
            .values()
            .find(|a| a.public_id == public_id)
            .cloned()
    }

    /// Find the account correlated with an upstream organization reference.
    pub async fn get_by_org_ref(&self, org_ref: &str) -> Option<Account> {
        let state = self.state.lock().await;
        state
            .accounts
            .values()
            .find(|a| a.organization_ref.as_deref() == Some(org_ref))
            .cloned()
    }

    /// Record a cooldown deadline and mark the account busy.
    ///
    /// Single durable write, so a crash can never leave a throttled record
    /// that doesn't show as busy.
    pub async fn set_rate_limit(&self, id: u64, reset_at: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let account = account_mut(&mut state, id)?;
        account.rate_limit_reset_at = Some(reset_at);
        account.lifecycle_state = LifecycleState::Busy;
        debug!(account = %account.public_id, reset_at, "set rate limit");
        write_atomic(&self.path, &state).await
    }

    /// Record a cooldown deadline only if it extends the one on record:
    /// the later deadline wins.
    ///
    /// The comparison and the write happen under the same lock hold, so
    /// concurrent signals for one account cannot interleave a stale
    /// earlier deadline over a fresher one. An equal deadline is a no-op,
    /// reported as `AlreadyCovered`.
    pub async fn set_rate_limit_if_later(
        &self,
        id: u64,
        reset_at: u64,
    ) -> Result<RateLimitOutcome> {
        let mut state = self.state.lock().await;
        let account = account_mut(&mut state, id)?;
        if let Some(current) = account.rate_limit_reset_at {
            if current >= reset_at {
                return Ok(RateLimitOutcome::AlreadyCovered(current));
            }
        }
        account.rate_limit_reset_at = Some(reset_at);
        account.lifecycle_state = LifecycleState::Busy;
        debug!(account = %account.public_id, reset_at, "set rate limit");
        write_atomic(&self.path, &state).await?;
        Ok(RateLimitOutcome::Applied)
    }

    /// Null the cooldown deadline and return the account to idle.
    ///
    /// Single durable write, the counterpart of [`set_rate_limit`].
    ///
    /// [`set_rate_limit`]: AccountStore::set_rate_limit
    pub async fn clear_rate_limit(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let account = account_mut(&mut state, id)?;
        account.rate_limit_reset_at = None;
        account.lifecycle_state = LifecycleState::Idle;
        debug!(account = %account.public_id, "cleared rate limit");
        write_atomic(&self.path, &state).await
    }

    /// Force a lifecycle state without touching the cooldown fields.
    pub async fn set_lifecycle_state(&self, id: u64, lifecycle: LifecycleState) -> Result<()> {
        let mut state = self.state.lock().await;
        let account = account_mut(&mut state, id)?;
        account.lifecycle_state = lifecycle;
        debug!(account = %account.public_id, state = lifecycle.label(), "set lifecycle state");
        write_atomic(&self.path, &state).await
    }

    /// Record a use: bump the counter and stamp `last_used_at`.
    pub async fn touch_usage(&self, id: u64, now: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let account = account_mut(&mut state, id)?;
        account.usage_count += 1;
        account.last_used_at = Some(now);
        debug!(account = %account.public_id, usage = account.usage_count, "touched usage");
        write_atomic(&self.path, &state).await
    }

    /// Enable or disable an account. Returns the updated record.
    pub async fn set_enabled(&self, public_id: &str, enabled: bool) -> Result<Account> {
        let mut state = self.state.lock().await;
        let account = account_mut_by_public_id(&mut state, public_id)?;
        account.enabled = enabled;
        let snapshot = account.clone();
        debug!(account = %snapshot.public_id, enabled, "set enabled");
        write_atomic(&self.path, &state).await?;
        Ok(snapshot)
    }

    /// Record the upstream organization reference for an account.
    ///
    /// Returns the updated record. Rate-limit signals can only be matched
    /// to accounts whose reference has been recorded.
    pub async fn set_org_ref(&self, public_id: &str, org_ref: String) -> Result<Account> {
        let mut state = self.state.lock().await;
        let account = account_mut_by_public_id(&mut state, public_id)?;
        account.organization_ref = Some(org_ref);
        let snapshot = account.clone();
        debug!(account = %snapshot.public_id, "set organization ref");
        write_atomic(&self.path, &state).await?;
        Ok(snapshot)
    }

    /// Claim an idle account: the activation compare-and-swap.
    ///
    /// Preconditions (checked under the lock, applied in the same durable
    /// write): enabled, not throttled at `now`, lifecycle state idle. On
    /// success the account becomes `available`, its usage counter is bumped
    /// and `last_used_at` is stamped. On a failed precondition the current
    /// record is returned unchanged for the caller to classify.
    ///
    /// A cooldown deadline that has already passed is dropped as part of
    /// this read-modify-write (with a busy account returned to idle), so an
    /// expired throttle never blocks a claim just because the sweep hasn't
    /// run yet.
    pub async fn activate_if_idle(&self, public_id: &str, now: u64) -> Result<ActivateOutcome> {
        let mut state = self.state.lock().await;
        let account = account_mut_by_public_id(&mut state, public_id)?;

        let mut cleared_stale = false;
        if account.rate_limit_reset_at.is_some_and(|reset| reset <= now) {
            account.rate_limit_reset_at = None;
            if account.lifecycle_state == LifecycleState::Busy {
                account.lifecycle_state = LifecycleState::Idle;
            }
            cleared_stale = true;
        }

        if !account.enabled
            || account.is_throttled(now)
            || account.lifecycle_state != LifecycleState::Idle
        {
            let snapshot = account.clone();
            if cleared_stale {
                write_atomic(&self.path, &state).await?;
            }
            return Ok(ActivateOutcome::Rejected(snapshot));
        }

        account.lifecycle_state = LifecycleState::Available;
        account.usage_count += 1;
        account.last_used_at = Some(now);
        let snapshot = account.clone();
        debug!(account = %snapshot.public_id, usage = snapshot.usage_count, "activated account");
        write_atomic(&self.path, &state).await?;
        Ok(ActivateOutcome::Activated(snapshot))
    }

    /// Number of stored accounts.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.accounts.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn account_mut(state: &mut StoreState, id: u64) -> Result<&mut Account> {
    state
        .accounts
        .get_mut(&id)
        .ok_or_else(|| Error::NotFound(format!("account id {id} not in store")))
}

fn account_mut_by_public_id<'a>(
    state: &'a mut StoreState,
    public_id: &str,
) -> Result<&'a mut Account> {
    state
        .accounts
        .values_mut()
        .find(|a| a.public_id == public_id)
        .ok_or_else(|| Error::NotFound(format!("account {public_id} not in store")))
}

/// Write the account file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. This prevents corruption if the process crashes mid-write.
/// Sets file permissions to 0600 (owner read/write only) since the file
/// contains bearer secrets.
async fn write_atomic(path: &Path, data: &StoreState) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing accounts: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("account path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".accounts.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp account file: {e}")))?;

    // Set 0600 permissions (unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting account file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp account file: {e}")))?;

    debug!(path = %path.display(), "persisted accounts");
    Ok(())
}
