use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::instrument;
use uuid::Uuid;

use crate::common::error::{AppError, AppResult};
use crate::common::ids::TimeSortableId;
use crate::domain::identity::UserIdentity;
use crate::infrastructure::cache::CacheStore;
use crate::infrastructure::database::entities::tenant_access_grant::{
    ActiveModel as GrantActiveModel, Column as GrantColumn, Entity as GrantEntity,
};
use crate::infrastructure::database::entities::user_identity::{
    ActiveModel as UserIdentityActiveModel, Column as UserIdentityColumn,
    Entity as UserIdentityEntity, Model as UserIdentityModel,
};

fn identity_cache_key(tenant_id: &str, provider_subject: &str) -> String {
    format!("user:{tenant_id}:{provider_subject}")
}

fn model_to_domain(model: UserIdentityModel) -> UserIdentity {
    UserIdentity {
        id: TimeSortableId::from_uuid(model.id),
        tenant_id: model.tenant_id,
        provider_subject: model.provider_subject,
        username: model.username,
        email: model.email,
        is_active: model.is_active,
        created_at: model.created_at,
        updated_at: model.updated_at,
        last_seen_at: model.last_seen_at,
    }
}

fn domain_to_active_model(identity: &UserIdentity) -> UserIdentityActiveModel {
    UserIdentityActiveModel {
        id: Set(identity.id.as_uuid()),
        tenant_id: Set(identity.tenant_id.clone()),
        provider_subject: Set(identity.provider_subject.clone()),
        username: Set(identity.username.clone()),
        email: Set(identity.email.clone()),
        is_active: Set(identity.is_active),
        created_at: Set(identity.created_at),
        updated_at: Set(identity.updated_at),
        last_seen_at: Set(identity.last_seen_at),
    }
}

/// Either half of the identity mapping a caller might hold: the internal
/// user id assigned at provisioning time, or the provider's own subject.
#[derive(Debug, Clone)]
pub enum IdentityRef {
    Internal(TimeSortableId),
    ExternalSubject { tenant_id: String, provider_subject: String },
}

/// Maps a provider subject (the `sub` claim inside a realm) onto a stable
/// internal user identity, provisioning one just-in-time on first sight and
/// recording every tenant that subject has ever been granted access to.
#[async_trait]
pub trait IdentityMapperTrait: Send + Sync {
    async fn map_identity(
        &self,
        tenant_id: &str,
        provider_subject: &str,
        username: Option<String>,
        email: Option<String>,
    ) -> AppResult<UserIdentity>;

    async fn get_by_internal_id(&self, user_id: &TimeSortableId) -> AppResult<UserIdentity>;

    /// Drops the cached mapping so the next `map_identity`/lookup re-reads
    /// from the database. Call after disabling a user or changing their
    /// profile out-of-band (e.g. through the provider's own admin console).
    async fn invalidate_mapping(&self, identity_ref: IdentityRef) -> AppResult<()>;
}

pub struct IdentityMapper {
    db: Arc<DatabaseConnection>,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
}

impl IdentityMapper {
    pub fn new(db: Arc<DatabaseConnection>, cache: Arc<dyn CacheStore>, cache_ttl: Duration) -> Self {
        Self {
            db,
            cache,
            cache_ttl,
        }
    }

    async fn record_access_grant(&self, identity: &UserIdentity) -> AppResult<()> {
        let existing = GrantEntity::find()
            .filter(GrantColumn::UserIdentityId.eq(identity.id.as_uuid()))
            .filter(GrantColumn::TenantId.eq(identity.tenant_id.clone()))
            .one(self.db.as_ref())
            .await?;

        if existing.is_some() {
            return Ok(());
        }

        let grant = GrantActiveModel {
            id: Set(Uuid::now_v7()),
            user_identity_id: Set(identity.id.as_uuid()),
            tenant_id: Set(identity.tenant_id.clone()),
            granted_at: Set(Utc::now()),
        };
        grant.insert(self.db.as_ref()).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityMapperTrait for IdentityMapper {
    #[instrument(skip(self))]
    async fn map_identity(
        &self,
        tenant_id: &str,
        provider_subject: &str,
        username: Option<String>,
        email: Option<String>,
    ) -> AppResult<UserIdentity> {
        let key = identity_cache_key(tenant_id, provider_subject);

        if let Some(cached) = self.cache.get(&key).await? {
            if let Ok(mut identity) = serde_json::from_slice::<UserIdentity>(&cached) {
                identity.ensure_active()?;
                return Ok(identity);
            }
        }

        let existing = UserIdentityEntity::find()
            .filter(UserIdentityColumn::TenantId.eq(tenant_id))
            .filter(UserIdentityColumn::ProviderSubject.eq(provider_subject))
            .one(self.db.as_ref())
            .await?;

        let mut identity = match existing {
            Some(model) => {
                let mut identity = model_to_domain(model);
                identity.sync_profile(username, email);
                identity.touch();
                domain_to_active_model(&identity)
                    .update(self.db.as_ref())
                    .await?;
                identity
            },
            None => {
                let identity = UserIdentity::provision(
                    tenant_id.to_string(),
                    provider_subject.to_string(),
                    username,
                    email,
                )?;
                domain_to_active_model(&identity)
                    .insert(self.db.as_ref())
                    .await?;
                identity
            },
        };

        identity.ensure_active()?;
        self.record_access_grant(&identity).await?;

        let encoded = serde_json::to_vec(&identity)?;
        self.cache.set_ex(&key, encoded, self.cache_ttl).await?;

        Ok(identity)
    }

    #[instrument(skip(self))]
    async fn get_by_internal_id(&self, user_id: &TimeSortableId) -> AppResult<UserIdentity> {
        let model = UserIdentityEntity::find_by_id(user_id.as_uuid())
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found("user identity not found"))?;
        Ok(model_to_domain(model))
    }

    #[instrument(skip(self))]
    async fn invalidate_mapping(&self, identity_ref: IdentityRef) -> AppResult<()> {
        match identity_ref {
            IdentityRef::ExternalSubject { tenant_id, provider_subject } => {
                self.cache
                    .delete(&identity_cache_key(&tenant_id, &provider_subject))
                    .await
            },
            IdentityRef::Internal(user_id) => {
                let model = UserIdentityEntity::find_by_id(user_id.as_uuid())
                    .one(self.db.as_ref())
                    .await?;
                if let Some(model) = model {
                    self.cache
                        .delete(&identity_cache_key(&model.tenant_id, &model.provider_subject))
                        .await?;
                }
                Ok(())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::InMemoryStore;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn test_model() -> UserIdentityModel {
        let now = Utc::now();
        UserIdentityModel {
            id: Uuid::now_v7(),
            tenant_id: "tenant-a".to_string(),
            provider_subject: "sub-1".to_string(),
            username: Some("alice".to_string()),
            email: Some("alice@example.com".to_string()),
            is_active: true,
            created_at: now,
            updated_at: now,
            last_seen_at: Some(now),
        }
    }

    #[tokio::test]
    async fn new_subject_is_provisioned_and_cached() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(Vec::<Vec<UserIdentityModel>>::new())
            .append_query_results(Vec::<Vec<crate::infrastructure::database::entities::tenant_access_grant::Model>>::new())
            .append_exec_results(vec![sea_orm::MockExecResult {
                last_insert_id: 1,
                rows_affected: 1,
            }])
            .append_exec_results(vec![sea_orm::MockExecResult {
                last_insert_id: 1,
                rows_affected: 1,
            }])
            .into_connection();

        let cache = Arc::new(InMemoryStore::new());
        let mapper = IdentityMapper::new(Arc::new(db), cache.clone(), Duration::from_secs(60));

        let identity = mapper
            .map_identity("tenant-a", "sub-new", Some("bob".to_string()), None)
            .await
            .unwrap();

        assert_eq!(identity.provider_subject, "sub-new");
        assert!(cache
            .get(&identity_cache_key("tenant-a", "sub-new"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn disabled_existing_identity_served_from_cache_is_rejected() {
        let mut model = test_model();
        model.is_active = false;
        let identity = model_to_domain(model);

        let cache = Arc::new(InMemoryStore::new());
        let key = identity_cache_key("tenant-a", "sub-1");
        cache
            .set_ex(&key, serde_json::to_vec(&identity).unwrap(), Duration::from_secs(60))
            .await
            .unwrap();

        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let mapper = IdentityMapper::new(Arc::new(db), cache, Duration::from_secs(60));

        let result = mapper.map_identity("tenant-a", "sub-1", None, None).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind.code(), "user_disabled");
    }

    #[tokio::test]
    async fn invalidate_mapping_by_external_subject_clears_cache() {
        let model = test_model();
        let identity = model_to_domain(model);

        let cache = Arc::new(InMemoryStore::new());
        let key = identity_cache_key("tenant-a", "sub-1");
        cache
            .set_ex(&key, serde_json::to_vec(&identity).unwrap(), Duration::from_secs(60))
            .await
            .unwrap();

        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let mapper = IdentityMapper::new(Arc::new(db), cache.clone(), Duration::from_secs(60));

        mapper
            .invalidate_mapping(IdentityRef::ExternalSubject {
                tenant_id: "tenant-a".to_string(),
                provider_subject: "sub-1".to_string(),
            })
            .await
            .unwrap();

        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_by_internal_id_returns_matching_identity() {
        let model = test_model();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model.clone()]])
            .into_connection();

        let mapper = IdentityMapper::new(Arc::new(db), Arc::new(InMemoryStore::new()), Duration::from_secs(60));

        let found = mapper
            .get_by_internal_id(&TimeSortableId::from_uuid(model.id))
            .await
            .unwrap();
        assert_eq!(found.provider_subject, "sub-1");
    }
}
