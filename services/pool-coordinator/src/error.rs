//! HTTP mapping for engine errors
//!
//! Every engine error maps to one status code and a JSON error object
//! `{"error": {"type": ..., "message": ...}}`. The exhausted-pool error
//! already carries its full error object (with state counts) as a JSON
//! string, so it passes through as-is.

use account_pool::Error as PoolError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Map an engine error onto an HTTP response.
pub fn pool_error_response(err: &PoolError) -> Response {
    match err {
        PoolError::InvalidSignal(msg) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_signal", msg)
        }
        PoolError::NotFound(msg) => error_response(StatusCode::NOT_FOUND, "not_found", msg),
        PoolError::Unavailable {
            message,
            retry_after_secs,
        } => {
            let mut body = serde_json::json!({
                "error": {
                    "type": "account_unavailable",
                    "message": message,
                }
            });
            if let Some(secs) = retry_after_secs {
                body["error"]["retry_after_secs"] = (*secs).into();
            }
            json_response(StatusCode::SERVICE_UNAVAILABLE, body)
        }
        PoolError::StateConflict { state } => error_response(
            StatusCode::CONFLICT,
            "state_conflict",
            &format!("account is {state}, not idle"),
        ),
        PoolError::PoolExhausted(body) => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.clone(),
        )
            .into_response(),
        PoolError::Store(msg) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

fn error_response(status: StatusCode, error_type: &str, message: &str) -> Response {
    json_response(
        status,
        serde_json::json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }),
    )
}

/// JSON response with the content type set.
pub fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn invalid_signal_maps_to_400() {
        let err = PoolError::InvalidSignal("missing required field: timestamp".into());
        let response = pool_error_response(&err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "invalid_signal");
        assert!(
            json["error"]["message"]
                .as_str()
                .unwrap()
                .contains("timestamp")
        );
    }

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let err = PoolError::NotFound("account acct_abc not found".into());
        let response = pool_error_response(&err);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "not_found");
    }

    #[tokio::test]
    async fn unavailable_maps_to_503_with_retry_hint() {
        let err = PoolError::Unavailable {
            message: "account acct_abc is rate limited".into(),
            retry_after_secs: Some(180),
        };
        let response = pool_error_response(&err);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "account_unavailable");
        assert_eq!(json["error"]["retry_after_secs"], 180);
    }

    #[tokio::test]
    async fn unavailable_without_cooldown_omits_retry_hint() {
        let err = PoolError::Unavailable {
            message: "account acct_abc is disabled".into(),
            retry_after_secs: None,
        };
        let response = pool_error_response(&err);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert!(json["error"].get("retry_after_secs").is_none());
    }

    #[tokio::test]
    async fn state_conflict_maps_to_409() {
        let err = PoolError::StateConflict {
            state: "available".into(),
        };
        let response = pool_error_response(&err);
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "state_conflict");
        assert!(
            json["error"]["message"]
                .as_str()
                .unwrap()
                .contains("available")
        );
    }

    #[tokio::test]
    async fn exhausted_pool_body_passes_through_with_counts() {
        let message = serde_json::json!({
            "error": {
                "type": "pool_exhausted",
                "message": "No eligible accounts available",
                "pool": { "accounts_total": 3, "accounts_busy": 3 }
            }
        })
        .to_string();
        let err = PoolError::PoolExhausted(message);
        let response = pool_error_response(&err);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "pool_exhausted");
        assert_eq!(json["error"]["pool"]["accounts_busy"], 3);
    }

    #[tokio::test]
    async fn store_error_maps_to_500() {
        let err = PoolError::Store("write failed: disk full".into());
        let response = pool_error_response(&err);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "store_error");
    }
}
