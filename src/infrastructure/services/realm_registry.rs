use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::common::error::{AppError, AppResult};
use crate::common::ids::TimeSortableId;
use crate::domain::realm::{Realm, RealmRegistration};
use crate::infrastructure::cache::CacheStore;
use crate::infrastructure::database::entities::realm::{
    ActiveModel as RealmActiveModel, Column as RealmColumn, Entity as RealmEntity,
    Model as RealmModel,
};

fn realm_cache_key(tenant_id: &str) -> String {
    format!("realm:{tenant_id}")
}

fn join_algorithms(algorithms: &[String]) -> String {
    algorithms.join(",")
}

fn split_algorithms(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn model_to_domain(model: RealmModel) -> Realm {
    Realm {
        id: TimeSortableId::from_uuid(model.id),
        tenant_id: model.tenant_id,
        display_name: model.display_name,
        provider_realm_name: model.provider_realm_name,
        provider_server_url: model.provider_server_url,
        issuer_url: model.issuer_url,
        client_id: model.client_id,
        client_secret_ref: model.client_secret_ref,
        signing_algorithms: split_algorithms(&model.signing_algorithms),
        expected_audience: model.expected_audience,
        expected_issuer: model.expected_issuer,
        verify_signature: model.verify_signature,
        verify_exp: model.verify_exp,
        verify_nbf: model.verify_nbf,
        verify_iat: model.verify_iat,
        verify_audience: model.verify_audience,
        verify_issuer: model.verify_issuer,
        public_key_ttl_secs: model.public_key_ttl_secs.max(0) as u64,
        is_active: model.is_active,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

fn domain_to_active_model(realm: &Realm) -> RealmActiveModel {
    RealmActiveModel {
        id: Set(realm.id.as_uuid()),
        tenant_id: Set(realm.tenant_id.clone()),
        display_name: Set(realm.display_name.clone()),
        provider_realm_name: Set(realm.provider_realm_name.clone()),
        provider_server_url: Set(realm.provider_server_url.clone()),
        issuer_url: Set(realm.issuer_url.clone()),
        client_id: Set(realm.client_id.clone()),
        client_secret_ref: Set(realm.client_secret_ref.clone()),
        signing_algorithms: Set(join_algorithms(&realm.signing_algorithms)),
        expected_audience: Set(realm.expected_audience.clone()),
        expected_issuer: Set(realm.expected_issuer.clone()),
        verify_signature: Set(realm.verify_signature),
        verify_exp: Set(realm.verify_exp),
        verify_nbf: Set(realm.verify_nbf),
        verify_iat: Set(realm.verify_iat),
        verify_audience: Set(realm.verify_audience),
        verify_issuer: Set(realm.verify_issuer),
        public_key_ttl_secs: Set(realm.public_key_ttl_secs as i64),
        is_active: Set(realm.is_active),
        created_at: Set(realm.created_at),
        updated_at: Set(realm.updated_at),
    }
}

/// Fields an operator may change on an already-registered realm. `None`
/// leaves the existing value untouched.
#[derive(Debug, Clone, Default)]
pub struct RealmUpdate {
    pub display_name: Option<String>,
    pub expected_audience: Option<String>,
    pub expected_issuer: Option<String>,
    pub signing_algorithms: Option<Vec<String>>,
    pub verify_audience: Option<bool>,
    pub verify_issuer: Option<bool>,
    pub public_key_ttl_secs: Option<u64>,
}

/// Owns the tenant-to-realm mapping: which identity-provider realm backs a
/// tenant, and whether it is currently usable. Reads go through the cache
/// first since this lookup happens on every authenticated request.
#[async_trait]
pub trait RealmRegistryTrait: Send + Sync {
    async fn create_tenant_realm(&self, registration: RealmRegistration) -> AppResult<Realm>;
    async fn get_realm_by_tenant(&self, tenant_id: &str) -> AppResult<Realm>;
    async fn get_realm_by_id(&self, realm_id: &TimeSortableId) -> AppResult<Realm>;
    /// Registers the platform/master realm in memory only — no DB row is
    /// ever written for it, since it isn't tenant-owned.
    async fn register_platform_realm(&self, realm: Realm) -> AppResult<()>;
    async fn update_realm(&self, tenant_id: &str, update: RealmUpdate) -> AppResult<Realm>;
    async fn disable_realm(&self, tenant_id: &str) -> AppResult<()>;
    async fn list_realms(&self) -> AppResult<Vec<Realm>>;

    // Legacy aliases kept for existing call sites.
    async fn find_by_tenant(&self, tenant_id: &str) -> AppResult<Realm> {
        self.get_realm_by_tenant(tenant_id).await
    }
}

pub struct RealmRegistry {
    db: Arc<DatabaseConnection>,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
    platform_realms: RwLock<Vec<Realm>>,
}

impl RealmRegistry {
    pub fn new(db: Arc<DatabaseConnection>, cache: Arc<dyn CacheStore>, cache_ttl: Duration) -> Self {
        Self {
            db,
            cache,
            cache_ttl,
            platform_realms: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RealmRegistryTrait for RealmRegistry {
    #[instrument(skip(self, registration))]
    async fn create_tenant_realm(&self, registration: RealmRegistration) -> AppResult<Realm> {
        let existing_for_tenant = RealmEntity::find()
            .filter(RealmColumn::TenantId.eq(registration.tenant_id.clone()))
            .one(self.db.as_ref())
            .await?;

        if existing_for_tenant.is_some() {
            return Err(AppError::realm_conflict(format!(
                "tenant {} already has a realm registered",
                registration.tenant_id
            )));
        }

        let existing_for_provider_realm = RealmEntity::find()
            .filter(RealmColumn::ProviderServerUrl.eq(registration.provider_server_url.clone()))
            .filter(RealmColumn::ProviderRealmName.eq(registration.provider_realm_name.clone()))
            .one(self.db.as_ref())
            .await?;

        if existing_for_provider_realm.is_some() {
            return Err(AppError::realm_conflict(format!(
                "realm {} already registered at {}",
                registration.provider_realm_name, registration.provider_server_url
            )));
        }

        let realm = Realm::new(registration)?;
        domain_to_active_model(&realm).insert(self.db.as_ref()).await?;

        self.cache.delete(&realm_cache_key(&realm.tenant_id)).await?;
        Ok(realm)
    }

    #[instrument(skip(self))]
    async fn get_realm_by_tenant(&self, tenant_id: &str) -> AppResult<Realm> {
        let key = realm_cache_key(tenant_id);
        if let Some(cached) = self.cache.get(&key).await? {
            if let Ok(realm) = serde_json::from_slice::<Realm>(&cached) {
                return Ok(realm);
            }
        }

        let model = RealmEntity::find()
            .filter(RealmColumn::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(AppError::realm_not_configured)?;

        let realm = model_to_domain(model);
        let encoded = serde_json::to_vec(&realm)?;
        self.cache.set_ex(&key, encoded, self.cache_ttl).await?;
        Ok(realm)
    }

    #[instrument(skip(self))]
    async fn get_realm_by_id(&self, realm_id: &TimeSortableId) -> AppResult<Realm> {
        for realm in self.platform_realms.read().await.iter() {
            if realm.id == *realm_id {
                return Ok(realm.clone());
            }
        }

        let model = RealmEntity::find_by_id(realm_id.as_uuid())
            .one(self.db.as_ref())
            .await?
            .ok_or_else(AppError::realm_not_configured)?;

        Ok(model_to_domain(model))
    }

    #[instrument(skip(self, realm))]
    async fn register_platform_realm(&self, realm: Realm) -> AppResult<()> {
        let mut realms = self.platform_realms.write().await;
        realms.retain(|r| r.provider_realm_name != realm.provider_realm_name);
        realms.push(realm);
        Ok(())
    }

    #[instrument(skip(self, update))]
    async fn update_realm(&self, tenant_id: &str, update: RealmUpdate) -> AppResult<Realm> {
        let model = RealmEntity::find()
            .filter(RealmColumn::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(AppError::realm_not_configured)?;

        let mut active_model: RealmActiveModel = model.into();

        if let Some(display_name) = update.display_name {
            active_model.display_name = Set(display_name);
        }
        if let Some(expected_audience) = update.expected_audience {
            active_model.expected_audience = Set(Some(expected_audience));
        }
        if let Some(expected_issuer) = update.expected_issuer {
            active_model.expected_issuer = Set(Some(expected_issuer));
        }
        if let Some(signing_algorithms) = update.signing_algorithms {
            active_model.signing_algorithms = Set(join_algorithms(&signing_algorithms));
        }
        if let Some(verify_audience) = update.verify_audience {
            active_model.verify_audience = Set(verify_audience);
        }
        if let Some(verify_issuer) = update.verify_issuer {
            active_model.verify_issuer = Set(verify_issuer);
        }
        if let Some(public_key_ttl_secs) = update.public_key_ttl_secs {
            active_model.public_key_ttl_secs = Set(public_key_ttl_secs as i64);
        }
        active_model.updated_at = Set(Utc::now());

        let updated = active_model.update(self.db.as_ref()).await?;
        self.cache.delete(&realm_cache_key(tenant_id)).await?;
        Ok(model_to_domain(updated))
    }

    #[instrument(skip(self))]
    async fn disable_realm(&self, tenant_id: &str) -> AppResult<()> {
        let model = RealmEntity::find()
            .filter(RealmColumn::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(AppError::realm_not_configured)?;

        let mut active_model: RealmActiveModel = model.into();
        active_model.is_active = Set(false);
        active_model.updated_at = Set(Utc::now());
        active_model.update(self.db.as_ref()).await?;

        self.cache.delete(&realm_cache_key(tenant_id)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_realms(&self) -> AppResult<Vec<Realm>> {
        let models = RealmEntity::find().all(self.db.as_ref()).await?;
        Ok(models.into_iter().map(model_to_domain).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::InMemoryStore;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use uuid::Uuid;

    fn test_model() -> RealmModel {
        let now = Utc::now();
        RealmModel {
            id: Uuid::now_v7(),
            tenant_id: "tenant-a".to_string(),
            display_name: "Acme".to_string(),
            provider_realm_name: "tenant-a-realm".to_string(),
            provider_server_url: "https://idp.example.com".to_string(),
            issuer_url: "https://idp.example.com/realms/tenant-a-realm".to_string(),
            client_id: "tenant-a-client".to_string(),
            client_secret_ref: None,
            signing_algorithms: "RS256".to_string(),
            expected_audience: None,
            expected_issuer: Some("https://idp.example.com/realms/tenant-a-realm".to_string()),
            verify_signature: true,
            verify_exp: true,
            verify_nbf: true,
            verify_iat: true,
            verify_audience: false,
            verify_issuer: true,
            public_key_ttl_secs: 3600,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_registration() -> RealmRegistration {
        RealmRegistration {
            tenant_id: "tenant-a".to_string(),
            display_name: "Acme".to_string(),
            provider_realm_name: "tenant-a-realm".to_string(),
            provider_server_url: "https://idp.example.com".to_string(),
            issuer_url: "https://idp.example.com/realms/tenant-a-realm".to_string(),
            client_id: "tenant-a-client".to_string(),
            client_secret_ref: None,
        }
    }

    #[tokio::test]
    async fn find_by_tenant_caches_after_db_lookup() {
        let model = test_model();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model.clone()]])
            .into_connection();

        let registry = RealmRegistry::new(
            Arc::new(db),
            Arc::new(InMemoryStore::new()),
            Duration::from_secs(60),
        );

        let realm = registry.get_realm_by_tenant("tenant-a").await.unwrap();
        assert_eq!(realm.tenant_id, "tenant-a");
        assert_eq!(realm.signing_algorithms, vec!["RS256".to_string()]);
    }

    #[tokio::test]
    async fn find_by_tenant_missing_returns_realm_not_configured() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(Vec::<Vec<RealmModel>>::new())
            .into_connection();

        let registry = RealmRegistry::new(
            Arc::new(db),
            Arc::new(InMemoryStore::new()),
            Duration::from_secs(60),
        );

        let result = registry.get_realm_by_tenant("missing-tenant").await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind.code(), "realm_not_configured");
    }

    #[tokio::test]
    async fn create_tenant_realm_rejects_duplicate_tenant() {
        let model = test_model();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model]])
            .into_connection();

        let registry = RealmRegistry::new(
            Arc::new(db),
            Arc::new(InMemoryStore::new()),
            Duration::from_secs(60),
        );

        let result = registry.create_tenant_realm(test_registration()).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind.code(), "realm_conflict");
    }

    #[tokio::test]
    async fn create_tenant_realm_rejects_duplicate_provider_realm() {
        let model = test_model();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(Vec::<Vec<RealmModel>>::new())
            .append_query_results(vec![vec![model]])
            .into_connection();

        let registry = RealmRegistry::new(
            Arc::new(db),
            Arc::new(InMemoryStore::new()),
            Duration::from_secs(60),
        );

        let mut registration = test_registration();
        registration.tenant_id = "tenant-b".to_string();
        let result = registry.create_tenant_realm(registration).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind.code(), "realm_conflict");
    }

    #[tokio::test]
    async fn register_platform_realm_is_retrievable_by_id_without_db_write() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let registry = RealmRegistry::new(
            Arc::new(db),
            Arc::new(InMemoryStore::new()),
            Duration::from_secs(60),
        );

        let realm = Realm::platform(
            "https://idp.example.com".to_string(),
            "master".to_string(),
            "https://idp.example.com/realms/master".to_string(),
            "admin-cli".to_string(),
        )
        .unwrap();
        let realm_id = realm.id;

        registry.register_platform_realm(realm).await.unwrap();
        let fetched = registry.get_realm_by_id(&realm_id).await.unwrap();
        assert_eq!(fetched.provider_realm_name, "master");
    }
}
