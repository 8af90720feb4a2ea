use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use sea_orm::DatabaseConnection;

use crate::common::config::AppConfig;
use crate::infrastructure::cache::CacheStore;
use crate::infrastructure::provider::{OidcClient, ProviderAdminClient};
use crate::infrastructure::services::guest_service::GuestServiceTrait;
use crate::infrastructure::services::identity_mapper::IdentityMapperTrait;
use crate::infrastructure::services::permission_cache::PermissionCacheTrait;
use crate::infrastructure::services::realm_registry::RealmRegistryTrait;
use crate::infrastructure::services::{GuestService, IdentityMapper, PermissionCacheService, RealmRegistry};
use crate::token::TokenValidator;

/// Everything a request handler or middleware layer needs, wired up once at
/// startup and shared behind `Arc`/cheap clones for the lifetime of the
/// process.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub cache: Arc<dyn CacheStore>,
    pub realm_registry: Arc<dyn RealmRegistryTrait>,
    pub identity_mapper: Arc<dyn IdentityMapperTrait>,
    pub permission_cache: Arc<dyn PermissionCacheTrait>,
    pub guest_service: Arc<dyn GuestServiceTrait>,
    pub token_validator: Arc<TokenValidator>,
    pub provider_admin: Arc<ProviderAdminClient>,
    pub oidc: Arc<OidcClient>,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        cache: Arc<dyn CacheStore>,
        oidc: OidcClient,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        let oidc = Arc::new(oidc);

        let realm_registry: Arc<dyn RealmRegistryTrait> = Arc::new(RealmRegistry::new(
            db.clone(),
            cache.clone(),
            Duration::from_secs(config.cache_ttl.realm_secs),
        ));
        let identity_mapper: Arc<dyn IdentityMapperTrait> = Arc::new(IdentityMapper::new(
            db.clone(),
            cache.clone(),
            Duration::from_secs(config.cache_ttl.user_secs),
        ));
        let permission_cache: Arc<dyn PermissionCacheTrait> = Arc::new(PermissionCacheService::new(
            db.clone(),
            cache.clone(),
            Duration::from_secs(config.cache_ttl.permission_secs),
            Duration::from_secs(config.cache_ttl.roles_secs),
        ));
        let guest_service: Arc<dyn GuestServiceTrait> = Arc::new(GuestService::new(
            db.clone(),
            cache.clone(),
            config.guest.ip_rate_limit_max_requests,
            config.guest.session_rate_limit_max_requests,
            Duration::from_secs(config.guest.rate_limit_window_secs),
            Duration::from_secs(config.guest.session_ttl_secs),
            config.guest.fail_open,
        ));
        let token_validator = Arc::new(TokenValidator::new(
            cache.clone(),
            (*oidc).clone(),
            Duration::from_secs(config.cache_ttl.public_key_secs),
            config.provider.client_id.clone(),
            config.provider.client_secret.clone(),
        ));
        let provider_admin = Arc::new(ProviderAdminClient::new(
            config.provider.url.clone(),
            config.provider.admin_username.clone(),
            config.provider.admin_password.clone(),
            config.provider.admin_client_id.clone(),
        ));

        Self {
            config,
            db,
            cache,
            realm_registry,
            identity_mapper,
            permission_cache,
            guest_service,
            token_validator,
            provider_admin,
            oidc,
            metrics_handle,
        }
    }
}
