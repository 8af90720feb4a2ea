use axum::{middleware, Router};

use crate::{
    api::{api_routes, not_found},
    common::middleware::{auth::auth_pipeline, tenant::TenantLayer},
    infrastructure::state::AppState,
};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(api_routes())
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), auth_pipeline))
        .layer(TenantLayer::new())
        .with_state(state)
}
