use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::common::config;
use crate::infrastructure::cache::{CacheStore, RedisStore};
use crate::infrastructure::provider::OidcClient;
use crate::infrastructure::state::AppState;

mod api;
mod common;
mod domain;
mod infrastructure;
mod router;
mod token;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::setup_logging().map_err(|e| anyhow::anyhow!("{}", e))?;

    let app_config = Arc::new(config::get_app_config().clone());

    let db = sea_orm::Database::connect(app_config.database.to_connect_options())
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to database: {e}"))?;
    let db = Arc::new(db);

    let cache: Arc<dyn CacheStore> = Arc::new(RedisStore::new(&app_config.redis.url)?);

    let oidc = OidcClient::new(
        app_config.provider.url.clone(),
        Duration::from_secs(app_config.http.timeout_secs),
        app_config.http.max_connections,
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let metrics_handle = common::metrics::init_metrics().map_err(|e| anyhow::anyhow!("{e}"))?;

    let state = AppState::new(app_config.clone(), db, cache, oidc, metrics_handle);

    let app = router::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], app_config.server.backend_port));
    tracing::info!("server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
