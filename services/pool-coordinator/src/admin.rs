//! Admin API for operating the account pool.
//!
//! Serves on a separate listener from the public API:
//! - `GET /admin/accounts` - list accounts with operational detail
//! - `POST /admin/accounts` - register an account credential
//! - `DELETE /admin/accounts/{public_id}` - remove an account
//! - `PUT /admin/accounts/{public_id}/rate-limit` - force a cooldown
//! - `PUT /admin/accounts/{public_id}/state` - force a lifecycle state
//! - `PUT /admin/accounts/{public_id}/enabled` - enable or disable
//! - `PUT /admin/accounts/{public_id}/organization-ref` - set the org ref
//!
//! Admin authentication is handled at the network layer, not here. Even
//! so, listings never echo the stored credential back.

use std::sync::Arc;

use account_pool::PoolEngine;
use account_store::{LifecycleState, NewAccount};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{delete, get, put};
use common::Secret;
use serde::Deserialize;
use tracing::info;

use crate::error::{json_response, pool_error_response};

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub engine: Arc<PoolEngine>,
}

impl AdminState {
    pub fn new(engine: Arc<PoolEngine>) -> Self {
        Self { engine }
    }
}

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/accounts", get(list_accounts).post(add_account))
        .route("/admin/accounts/{public_id}", delete(remove_account))
        .route(
            "/admin/accounts/{public_id}/rate-limit",
            put(force_rate_limit),
        )
        .route("/admin/accounts/{public_id}/state", put(force_state))
        .route("/admin/accounts/{public_id}/enabled", put(set_enabled))
        .route(
            "/admin/accounts/{public_id}/organization-ref",
            put(set_organization_ref),
        )
        .with_state(state)
}

/// GET /admin/accounts — operational listing, one entry per account.
async fn list_accounts(State(state): State<AdminState>) -> Response {
    let accounts = state.engine.store().all().await;
    let entries: Vec<serde_json::Value> = accounts
        .iter()
        .map(|account| {
            serde_json::json!({
                "public_id": account.public_id,
                "enabled": account.enabled,
                "state": account.lifecycle_state.label(),
                "organization_ref": account.organization_ref,
                "rate_limit_reset_at": account.rate_limit_reset_at,
                "last_used_at": account.last_used_at,
                "usage_count": account.usage_count,
            })
        })
        .collect();
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "accounts": entries,
            "accounts_total": accounts.len(),
        }),
    )
}

#[derive(Deserialize)]
struct AddAccountRequest {
    credential: Secret<String>,
    #[serde(default)]
    organization_ref: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// POST /admin/accounts — register a new account.
async fn add_account(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<AddAccountRequest>,
) -> Response {
    if body.credential.expose().is_empty() {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": {
                    "type": "validation_error",
                    "message": "credential must not be empty",
                }
            }),
        );
    }

    match state
        .engine
        .store()
        .add(NewAccount {
            credential: body.credential,
            organization_ref: body.organization_ref,
            enabled: body.enabled,
        })
        .await
    {
        Ok(account) => {
            info!(
                account = %account.public_id,
                organization_ref = ?account.organization_ref,
                enabled = account.enabled,
                "account registered"
            );
            json_response(
                StatusCode::CREATED,
                serde_json::json!({
                    "public_id": account.public_id,
                    "state": account.lifecycle_state.label(),
                    "enabled": account.enabled,
                }),
            )
        }
        Err(e) => pool_error_response(&account_pool::Error::from(e)),
    }
}

/// DELETE /admin/accounts/{public_id} — remove an account.
///
/// Idempotent: deleting an unknown account still answers 200.
async fn remove_account(
    State(state): State<AdminState>,
    Path(public_id): Path<String>,
) -> Response {
    match state.engine.store().remove(&public_id).await {
        Ok(removed) => {
            if removed.is_some() {
                info!(account = %public_id, "account removed");
            }
            json_response(
                StatusCode::OK,
                serde_json::json!({
                    "public_id": public_id,
                    "status": "removed",
                }),
            )
        }
        Err(e) => pool_error_response(&account_pool::Error::from(e)),
    }
}

/// Body for forcing a cooldown. Exactly one of the two fields must be
/// set; `retry_after_secs` counts from the coordinator's current time,
/// and the resulting deadline must be in the future.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForceRateLimitRequest {
    resets_at: Option<u64>,
    retry_after_secs: Option<u64>,
}

/// PUT /admin/accounts/{public_id}/rate-limit — force a cooldown.
async fn force_rate_limit(
    State(state): State<AdminState>,
    Path(public_id): Path<String>,
    axum::Json(body): axum::Json<ForceRateLimitRequest>,
) -> Response {
    let now = state.engine.now_unix();
    let reset_at = match (body.resets_at, body.retry_after_secs) {
        (Some(resets_at), None) => resets_at,
        (None, Some(secs)) => now.saturating_add(secs),
        _ => {
            return json_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": {
                        "type": "validation_error",
                        "message": "exactly one of resets_at or retry_after_secs required",
                    }
                }),
            );
        }
    };

    if reset_at <= now {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": {
                    "type": "validation_error",
                    "message": "reset deadline must be in the future",
                }
            }),
        );
    }

    match state.engine.force_rate_limit(&public_id, reset_at).await {
        Ok(()) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "public_id": public_id,
                "reset_at": reset_at,
            }),
        ),
        Err(e) => pool_error_response(&e),
    }
}

#[derive(Deserialize)]
struct ForceStateRequest {
    state: LifecycleState,
}

/// PUT /admin/accounts/{public_id}/state — force a lifecycle state.
async fn force_state(
    State(state): State<AdminState>,
    Path(public_id): Path<String>,
    axum::Json(body): axum::Json<ForceStateRequest>,
) -> Response {
    match state.engine.force_state(&public_id, body.state).await {
        Ok(()) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "public_id": public_id,
                "state": body.state.label(),
            }),
        ),
        Err(e) => pool_error_response(&e),
    }
}

#[derive(Deserialize)]
struct SetEnabledRequest {
    enabled: bool,
}

/// PUT /admin/accounts/{public_id}/enabled — enable or disable an account.
async fn set_enabled(
    State(state): State<AdminState>,
    Path(public_id): Path<String>,
    axum::Json(body): axum::Json<SetEnabledRequest>,
) -> Response {
    match state.engine.store().set_enabled(&public_id, body.enabled).await {
        Ok(account) => {
            info!(account = %account.public_id, enabled = account.enabled, "account enabled flag set");
            json_response(
                StatusCode::OK,
                serde_json::json!({
                    "public_id": account.public_id,
                    "enabled": account.enabled,
                }),
            )
        }
        Err(e) => pool_error_response(&account_pool::Error::from(e)),
    }
}

#[derive(Deserialize)]
struct SetOrgRefRequest {
    organization_ref: String,
}

/// PUT /admin/accounts/{public_id}/organization-ref — set the org ref
/// used to match inbound rate-limit signals.
async fn set_organization_ref(
    State(state): State<AdminState>,
    Path(public_id): Path<String>,
    axum::Json(body): axum::Json<SetOrgRefRequest>,
) -> Response {
    if body.organization_ref.is_empty() {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": {
                    "type": "validation_error",
                    "message": "organization_ref must not be empty",
                }
            }),
        );
    }

    match state
        .engine
        .store()
        .set_org_ref(&public_id, body.organization_ref)
        .await
    {
        Ok(account) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "public_id": account.public_id,
                "organization_ref": account.organization_ref,
            }),
        ),
        Err(e) => pool_error_response(&account_pool::Error::from(e)),
    }
}
