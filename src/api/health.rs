use axum::{extract::State, response::Json};
use chrono::Utc;
use sea_orm::ConnectionTrait;
use serde::Serialize;

use crate::common::error::AppResult;
use crate::infrastructure::state::AppState;

pub fn health_routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/health", axum::routing::get(health_check))
        .route("/ready", axum::routing::get(readiness_check))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    message: String,
    timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "service is running".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Unlike `/health`, this checks that the database is actually reachable —
/// used by orchestrators to decide whether to route traffic here.
pub async fn readiness_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    state.db.execute_unprepared("SELECT 1").await?;

    Ok(Json(HealthResponse {
        status: "ready".to_string(),
        message: "database reachable".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    }))
}
