//! Health check handlers.
//!
//! - `/health`: liveness, returns OK while the process is running
//! - `/ready`: readiness, checks the database

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness check handler.
///
/// Does not touch dependencies; failure means the process is hung.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check handler.
///
/// Returns 200 when the database answers, 503 otherwise. The error body is
/// generic; the cause is logged.
#[tracing::instrument(skip_all, name = "clinic.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if let Err(e) = sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        tracing::warn!(target: "clinic.health", error = %e, "Readiness check failed: database error");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                database: Some("unhealthy"),
                error: Some("Service dependencies unavailable".to_string()),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            database: Some("healthy"),
            error: None,
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check_is_plain_ok() {
        assert_eq!(health_check().await, "OK");
    }

    #[test]
    fn test_not_ready_body_omits_details() {
        let body = serde_json::to_value(ReadinessResponse {
            status: "not_ready",
            database: Some("unhealthy"),
            error: Some("Service dependencies unavailable".to_string()),
        })
        .unwrap();
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["error"], "Service dependencies unavailable");

        let ready = serde_json::to_value(ReadinessResponse {
            status: "ready",
            database: Some("healthy"),
            error: None,
        })
        .unwrap();
        assert!(ready.get("error").is_none());
    }
}
