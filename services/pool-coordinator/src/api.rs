//! Public coordination API
//!
//! Serves the rate-limit signal ingest endpoint, the account status
//! listing, selection, activation, health, and Prometheus metrics on the
//! public listener. Account credentials never appear in any response on
//! this surface; callers address accounts by public id.

use std::sync::Arc;
use std::time::Instant;

use account_pool::{Error as PoolError, PoolEngine, RateLimitSignal};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::warn;

use crate::error::{json_response, pool_error_response};
use crate::metrics;

/// Shared state for public API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<PoolEngine>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(engine: Arc<PoolEngine>, prometheus: PrometheusHandle) -> Self {
        Self {
            engine,
            prometheus,
            started_at: Instant::now(),
        }
    }
}

/// Build the public axum router.
///
/// Applies a concurrency limit layer based on `max_connections`.
pub fn build_api_router(state: ApiState, max_connections: usize) -> Router {
    Router::new()
        .route("/api/signals", post(ingest_signal))
        .route("/api/accounts", get(list_accounts))
        .route("/api/accounts/select", post(select_account))
        .route("/api/accounts/{public_id}/activate", post(activate_account))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// POST /api/signals — ingest a rate-limit signal from the monitor.
///
/// Always answers with the resolved cooldown and whether a pooled account
/// matched; unmatched signals are dropped upstream of the store, so they
/// still get a 200.
async fn ingest_signal(
    State(state): State<ApiState>,
    axum::Json(signal): axum::Json<RateLimitSignal>,
) -> Response {
    match state.engine.ingest_signal(signal).await {
        Ok(receipt) => {
            metrics::record_signal(receipt.outcome.label());
            json_response(
                StatusCode::OK,
                serde_json::json!({
                    "cooldown_seconds": receipt.cooldown_seconds,
                    "reset_at": receipt.reset_at,
                    "account_found": receipt.account_found,
                }),
            )
        }
        Err(e) => {
            metrics::record_signal("rejected");
            warn!(error = %e, "signal rejected");
            pool_error_response(&e)
        }
    }
}

/// GET /api/accounts — per-account status listing plus pool summary counts.
async fn list_accounts(State(state): State<ApiState>) -> Response {
    json_response(StatusCode::OK, state.engine.statuses().await)
}

/// Request body for the select endpoint. An empty body (or `{}`) means
/// open selection; naming an account makes it targeted.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SelectRequest {
    account_id: Option<String>,
}

/// POST /api/accounts/select — pick the account a request should use.
async fn select_account(State(state): State<ApiState>, body: axum::body::Bytes) -> Response {
    let request: SelectRequest = if body.is_empty() {
        SelectRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    serde_json::json!({
                        "error": {
                            "type": "validation_error",
                            "message": format!("invalid selection body: {e}"),
                        }
                    }),
                );
            }
        }
    };

    let result = match request.account_id.as_deref() {
        Some(public_id) => state.engine.select_target(public_id).await,
        None => state.engine.select().await,
    };
    match result {
        Ok(account) => {
            metrics::record_selection("selected");
            json_response(
                StatusCode::OK,
                serde_json::json!({
                    "public_id": account.public_id,
                    "state": account.lifecycle_state.label(),
                }),
            )
        }
        Err(e) => {
            metrics::record_selection(selection_outcome(&e));
            pool_error_response(&e)
        }
    }
}

fn selection_outcome(err: &PoolError) -> &'static str {
    match err {
        PoolError::PoolExhausted(_) => "exhausted",
        PoolError::NotFound(_) => "not_found",
        PoolError::Unavailable { .. } => "unavailable",
        _ => "error",
    }
}

/// POST /api/accounts/{public_id}/activate — claim an idle account.
async fn activate_account(
    State(state): State<ApiState>,
    Path(public_id): Path<String>,
) -> Response {
    match state.engine.activate(&public_id).await {
        Ok(account) => {
            metrics::record_activation("activated");
            json_response(
                StatusCode::OK,
                serde_json::json!({
                    "public_id": account.public_id,
                    "state": account.lifecycle_state.label(),
                    "usage_count": account.usage_count,
                }),
            )
        }
        Err(e) => {
            metrics::record_activation(activation_outcome(&e));
            pool_error_response(&e)
        }
    }
}

fn activation_outcome(err: &PoolError) -> &'static str {
    match err {
        PoolError::StateConflict { .. } => "conflict",
        PoolError::Unavailable { .. } => "unavailable",
        PoolError::NotFound(_) => "not_found",
        _ => "error",
    }
}

/// GET /health — pool health summary with uptime.
///
/// 200 while at least one enabled account is selectable, 503 otherwise.
async fn health(State(state): State<ApiState>) -> Response {
    let mut body = state.engine.health().await;
    body["uptime_seconds"] = state.started_at.elapsed().as_secs().into();

    let status = if body["status"] == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    json_response(status, body)
}

/// GET /metrics — Prometheus text exposition format.
async fn render_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
