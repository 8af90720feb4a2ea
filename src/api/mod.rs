pub mod auth;
pub mod health;
pub mod metrics;
pub mod realms;

use axum::{routing::get, Router};

use crate::infrastructure::state::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::health_routes())
        .merge(metrics::metrics_routes())
        .merge(realms::realm_routes())
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::oauth_callback))
        .route("/auth/logout", get(auth::logout))
}

pub async fn not_found() -> impl axum::response::IntoResponse {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}
