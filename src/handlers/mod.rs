pub mod auth;
pub mod conversations;
pub mod encryption;
pub mod files;
pub mod messages;
pub mod notifications;
pub mod polls;
pub mod reactions;
pub mod shared;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_ok = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = ?e, "Health check: database query failed");
            false
        }
    };

    let http_status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "service": "flowtalk-server",
            "version": env!("CARGO_PKG_VERSION"),
            "database": if db_ok { "ok" } else { "unavailable" },
        })),
    )
}

/// GET /health/ready — readiness probe distinct from liveness; same check for
/// now since the only external dependency on the hot path is Postgres.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    health_check(State(state)).await
}

/// GET /health/websocket — reports the fanout plane's live connection count
/// without touching the database.
pub async fn websocket_health(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.connections.session_count().await;
    Json(json!({ "status": "ok", "connected_sessions": sessions }))
}
