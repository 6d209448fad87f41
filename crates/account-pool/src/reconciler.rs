//! Background status reconciliation
//!
//! A periodic sweep walks every enabled account and applies the
//! lifecycle rules that depend on the passage of time: expired cooldowns
//! are cleared, throttled accounts that drifted out of busy are
//! corrected, and claimed accounts that sat unused past the availability
//! window return to idle. Each account is handled in isolation so one
//! store failure cannot stall the sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use account_store::{Account, LifecycleState};
use metrics::{counter, gauge, histogram};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::PoolEngine;

/// What a single sweep changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub cooldowns_cleared: u64,
    pub busy_corrected: u64,
    pub windows_lapsed: u64,
    pub errors: u64,
}

impl SweepSummary {
    pub fn transitions(&self) -> u64 {
        self.cooldowns_cleared + self.busy_corrected + self.windows_lapsed
    }
}

/// Spawn the periodic reconcile task.
pub fn spawn_reconciler(engine: Arc<PoolEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; skip it so startup
        // doesn't double-sweep
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let summary = reconcile_once(&engine).await;
            if summary.transitions() > 0 || summary.errors > 0 {
                info!(
                    cooldowns_cleared = summary.cooldowns_cleared,
                    busy_corrected = summary.busy_corrected,
                    windows_lapsed = summary.windows_lapsed,
                    errors = summary.errors,
                    "reconcile sweep applied transitions"
                );
            }
        }
    })
}

/// Run one reconcile sweep over the pool.
///
/// Rules per enabled account, first match wins:
/// 1. cooldown deadline reached: clear it and return the account to idle
/// 2. still throttled but not marked busy: correct the state to busy
/// 3. available with no cooldown, unused past the availability window:
///    return to idle
pub async fn reconcile_once(engine: &PoolEngine) -> SweepSummary {
    let start = Instant::now();
    let now = engine.now_unix();
    let window = engine.settings().availability_window_secs;
    let store = engine.store();
    let mut summary = SweepSummary::default();

    for account in store.all().await {
        if !account.enabled {
            continue;
        }
        match account.rate_limit_reset_at {
            Some(reset) if now >= reset => match store.clear_rate_limit(account.id).await {
                Ok(()) => {
                    summary.cooldowns_cleared += 1;
                    counter!("pool_reconcile_transitions_total", "transition" => "cooldown_expired")
                        .increment(1);
                    info!(
                        account = %account.public_id,
                        reset_at = reset,
                        "cooldown expired, account idle again"
                    );
                }
                Err(e) => {
                    summary.errors += 1;
                    warn!(
                        account = %account.public_id,
                        error = %e,
                        "failed to clear expired cooldown"
                    );
                }
            },
            Some(_) if account.lifecycle_state != LifecycleState::Busy => {
                match store
                    .set_lifecycle_state(account.id, LifecycleState::Busy)
                    .await
                {
                    Ok(()) => {
                        summary.busy_corrected += 1;
                        counter!("pool_reconcile_transitions_total", "transition" => "busy_corrected")
                            .increment(1);
                        info!(
                            account = %account.public_id,
                            state = account.lifecycle_state.label(),
                            "throttled account corrected to busy"
                        );
                    }
                    Err(e) => {
                        summary.errors += 1;
                        warn!(
                            account = %account.public_id,
                            error = %e,
                            "failed to correct throttled account"
                        );
                    }
                }
            }
            None if account.lifecycle_state == LifecycleState::Available
                && account
                    .last_used_at
                    .is_some_and(|used| now.saturating_sub(used) > window) =>
            {
                match store
                    .set_lifecycle_state(account.id, LifecycleState::Idle)
                    .await
                {
                    Ok(()) => {
                        summary.windows_lapsed += 1;
                        counter!("pool_reconcile_transitions_total", "transition" => "window_lapsed")
                            .increment(1);
                        debug!(
                            account = %account.public_id,
                            "availability window lapsed, account idle again"
                        );
                    }
                    Err(e) => {
                        summary.errors += 1;
                        warn!(
                            account = %account.public_id,
                            error = %e,
                            "failed to lapse availability window"
                        );
                    }
                }
            }
            _ => {}
        }
    }

    histogram!("pool_reconcile_duration_seconds").record(start.elapsed().as_secs_f64());
    record_state_gauges(&store.all().await);
    summary
}

/// Publish per-state account gauges from a post-sweep snapshot.
fn record_state_gauges(accounts: &[Account]) {
    let mut idle = 0u64;
    let mut available = 0u64;
    let mut busy = 0u64;
    let mut disabled = 0u64;
    for account in accounts {
        if !account.enabled {
            disabled += 1;
            continue;
        }
        match account.lifecycle_state {
            LifecycleState::Idle => idle += 1,
            LifecycleState::Available => available += 1,
            LifecycleState::Busy => busy += 1,
        }
    }
    gauge!("pool_accounts", "state" => "idle").set(idle as f64);
    gauge!("pool_accounts", "state" => "available").set(available as f64);
    gauge!("pool_accounts", "state" => "busy").set(busy as f64);
    gauge!("pool_accounts", "state" => "disabled").set(disabled as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::PoolSettings;
    use account_store::{AccountStore, NewAccount};
    use common::Secret;

    const T0: u64 = 1_700_000_000;

    async fn test_engine(
        dir: &tempfile::TempDir,
    ) -> (Arc<PoolEngine>, Arc<AccountStore>, Arc<ManualClock>) {
        let store = Arc::new(
            AccountStore::load(dir.path().join("accounts.json"))
                .await
                .unwrap(),
        );
        let clock = Arc::new(ManualClock::new(T0));
        let engine = Arc::new(PoolEngine::new(
            store.clone(),
            clock.clone(),
            PoolSettings::default(),
        ));
        (engine, store, clock)
    }

    async fn add_account(store: &AccountStore, org: &str) -> Account {
        store
            .add(NewAccount {
                credential: Secret::new(format!("sess-{org}")),
                organization_ref: Some(org.to_string()),
                enabled: true,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sweep_clears_expired_cooldowns() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, store, clock) = test_engine(&dir).await;
        let added = add_account(&store, "org-1").await;
        store.set_rate_limit(added.id, T0 + 100).await.unwrap();

        clock.advance(100);
        let summary = reconcile_once(&engine).await;

        assert_eq!(summary.cooldowns_cleared, 1);
        assert_eq!(summary.transitions(), 1);
        let account = store.get(added.id).await.unwrap();
        assert_eq!(account.lifecycle_state, LifecycleState::Idle);
        assert_eq!(account.rate_limit_reset_at, None);
    }

    #[tokio::test]
    async fn sweep_leaves_active_cooldowns_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, store, _) = test_engine(&dir).await;
        let added = add_account(&store, "org-1").await;
        store.set_rate_limit(added.id, T0 + 600).await.unwrap();

        let summary = reconcile_once(&engine).await;

        assert_eq!(summary.transitions(), 0);
        let account = store.get(added.id).await.unwrap();
        assert_eq!(account.lifecycle_state, LifecycleState::Busy);
        assert_eq!(account.rate_limit_reset_at, Some(T0 + 600));
    }

    #[tokio::test]
    async fn sweep_corrects_throttled_accounts_to_busy() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, store, _) = test_engine(&dir).await;
        let added = add_account(&store, "org-1").await;
        store.set_rate_limit(added.id, T0 + 600).await.unwrap();
        // Simulate state drift while the cooldown is still running
        store
            .set_lifecycle_state(added.id, LifecycleState::Idle)
            .await
            .unwrap();

        let summary = reconcile_once(&engine).await;

        assert_eq!(summary.busy_corrected, 1);
        let account = store.get(added.id).await.unwrap();
        assert_eq!(account.lifecycle_state, LifecycleState::Busy);
        assert_eq!(account.rate_limit_reset_at, Some(T0 + 600));
    }

    #[tokio::test]
    async fn sweep_returns_lapsed_available_accounts_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, store, clock) = test_engine(&dir).await;
        let added = add_account(&store, "org-1").await;
        engine.activate(&added.public_id).await.unwrap();

        clock.advance(301);
        let summary = reconcile_once(&engine).await;

        assert_eq!(summary.windows_lapsed, 1);
        let account = store.get(added.id).await.unwrap();
        assert_eq!(account.lifecycle_state, LifecycleState::Idle);
        // Usage history survives the transition
        assert_eq!(account.usage_count, 1);
        assert_eq!(account.last_used_at, Some(T0));
    }

    #[tokio::test]
    async fn sweep_keeps_recently_used_available_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, store, clock) = test_engine(&dir).await;
        let added = add_account(&store, "org-1").await;
        engine.activate(&added.public_id).await.unwrap();

        // Exactly at the window boundary: not yet lapsed
        clock.advance(300);
        let summary = reconcile_once(&engine).await;

        assert_eq!(summary.transitions(), 0);
        let account = store.get(added.id).await.unwrap();
        assert_eq!(account.lifecycle_state, LifecycleState::Available);
    }

    #[tokio::test]
    async fn sweep_skips_disabled_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, store, clock) = test_engine(&dir).await;
        let added = add_account(&store, "org-1").await;
        store.set_rate_limit(added.id, T0 + 100).await.unwrap();
        store.set_enabled(&added.public_id, false).await.unwrap();

        clock.advance(200);
        let summary = reconcile_once(&engine).await;

        assert_eq!(summary.transitions(), 0);
        let account = store.get(added.id).await.unwrap();
        assert_eq!(account.rate_limit_reset_at, Some(T0 + 100));
    }

    #[tokio::test]
    async fn sweep_applies_every_rule_in_one_pass() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, store, clock) = test_engine(&dir).await;

        let expired = add_account(&store, "org-1").await;
        store.set_rate_limit(expired.id, T0 + 50).await.unwrap();

        let drifted = add_account(&store, "org-2").await;
        store.set_rate_limit(drifted.id, T0 + 9000).await.unwrap();
        store
            .set_lifecycle_state(drifted.id, LifecycleState::Available)
            .await
            .unwrap();

        let lapsed = add_account(&store, "org-3").await;
        engine.activate(&lapsed.public_id).await.unwrap();

        let untouched = add_account(&store, "org-4").await;

        clock.advance(400);
        let summary = reconcile_once(&engine).await;

        assert_eq!(
            summary,
            SweepSummary {
                cooldowns_cleared: 1,
                busy_corrected: 1,
                windows_lapsed: 1,
                errors: 0,
            }
        );
        assert_eq!(summary.transitions(), 3);
        assert_eq!(
            store.get(expired.id).await.unwrap().lifecycle_state,
            LifecycleState::Idle
        );
        assert_eq!(
            store.get(drifted.id).await.unwrap().lifecycle_state,
            LifecycleState::Busy
        );
        assert_eq!(
            store.get(lapsed.id).await.unwrap().lifecycle_state,
            LifecycleState::Idle
        );
        assert_eq!(
            store.get(untouched.id).await.unwrap().lifecycle_state,
            LifecycleState::Idle
        );
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_reconciler_sweeps_on_its_interval() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, store, clock) = test_engine(&dir).await;
        let added = add_account(&store, "org-1").await;
        store.set_rate_limit(added.id, T0 + 100).await.unwrap();
        clock.advance(200);

        let handle = spawn_reconciler(engine.clone(), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(31)).await;

        let account = store.get(added.id).await.unwrap();
        assert_eq!(account.lifecycle_state, LifecycleState::Idle);
        assert_eq!(account.rate_limit_reset_at, None);
        handle.abort();
    }
}
