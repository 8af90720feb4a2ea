use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::instrument;

use crate::common::error::AppResult;
use crate::common::ids::TimeSortableId;
use crate::domain::permission::{PermissionInfo, PermissionScope, PermissionSet};
use crate::domain::role::Role;
use crate::infrastructure::cache::CacheStore;
use crate::infrastructure::database::entities::permission::{
    Column as PermissionColumn, Entity as PermissionEntity, Model as PermissionModel,
};
use crate::infrastructure::database::entities::role::{
    Column as RoleColumn, Entity as RoleEntity, Model as RoleModel,
};
use crate::infrastructure::database::entities::role_permission::{
    Column as RolePermissionColumn, Entity as RolePermissionEntity,
};
use crate::infrastructure::database::entities::user_role::{
    Column as UserRoleColumn, Entity as UserRoleEntity, Model as UserRoleModel,
};

fn permission_cache_key(tenant_id: &str, user_id: &TimeSortableId) -> String {
    format!("perm:{tenant_id}:{user_id}")
}

fn roles_cache_key(tenant_id: &str, user_id: &TimeSortableId) -> String {
    format!("roles:{tenant_id}:{user_id}")
}

fn summary_cache_key(tenant_id: &str, user_id: &TimeSortableId) -> String {
    format!("perm-summary:{tenant_id}:{user_id}")
}

fn scope_from_str(raw: &str) -> PermissionScope {
    if raw == "platform" {
        PermissionScope::Platform
    } else {
        PermissionScope::Tenant
    }
}

fn role_model_to_domain(model: RoleModel) -> Role {
    Role {
        role_code: model.role_code,
        scope: scope_from_str(&model.scope),
        name: model.name,
        description: model.description,
        is_system: model.is_system,
    }
}

fn permission_model_to_info(model: PermissionModel) -> PermissionInfo {
    PermissionInfo {
        code: model.code,
        scope: scope_from_str(&model.scope),
        description: model.description,
        is_dangerous: model.is_dangerous,
        requires_mfa: model.requires_mfa,
        requires_approval: model.requires_approval,
    }
}

fn is_active(grant: &UserRoleModel) -> bool {
    grant.expires_at.map(|at| at > Utc::now()).unwrap_or(true)
}

/// Resolves and caches a user's roles and effective permissions within a
/// tenant, rolling up `user_roles -> role_permissions -> permissions`. Each
/// of the three shapes (raw permission set, role catalog, permission
/// catalog) is cached under its own key and TTL since callers read them at
/// different rates and a role edit shouldn't force a permission-set refetch.
#[async_trait]
pub trait PermissionCacheTrait: Send + Sync {
    async fn resolve(&self, tenant_id: &str, user_id: &TimeSortableId) -> AppResult<PermissionSet>;

    async fn check_permission(
        &self,
        tenant_id: &str,
        user_id: &TimeSortableId,
        code: &str,
    ) -> AppResult<bool> {
        Ok(self.resolve(tenant_id, user_id).await?.allows(code))
    }

    /// `require_all = true`: every code must be covered. `false`: any one
    /// code covered is enough.
    async fn check_permissions(
        &self,
        tenant_id: &str,
        user_id: &TimeSortableId,
        codes: &[&str],
        require_all: bool,
    ) -> AppResult<bool> {
        let set = self.resolve(tenant_id, user_id).await?;
        Ok(if require_all {
            set.allows_all(codes)
        } else {
            set.allows_any(codes)
        })
    }

    async fn get_user_permissions(
        &self,
        tenant_id: &str,
        user_id: &TimeSortableId,
    ) -> AppResult<Vec<PermissionInfo>>;

    async fn get_user_roles(&self, tenant_id: &str, user_id: &TimeSortableId) -> AppResult<Vec<Role>>;

    async fn invalidate_user(&self, tenant_id: &str, user_id: &TimeSortableId) -> AppResult<()>;

    /// Flushes every cached permission/role/summary snapshot across every
    /// tenant and user. The cache doesn't index by role, so a role-catalog
    /// edit (a permission added to or removed from a role) can't be
    /// narrowed to just the users holding that role without scanning the
    /// full `user_roles` table; a full flush is the correct and simplest
    /// fix, paid for only on the rare admin-edits-a-role path.
    async fn invalidate_role(&self, role_id: &str) -> AppResult<()>;

    /// Pre-populates all three cache entries for a user, e.g. right after
    /// login, so the first authorization check on the request path is a
    /// cache hit rather than a cold roll-up.
    async fn warm_user(&self, tenant_id: &str, user_id: &TimeSortableId) -> AppResult<()>;

    async fn invalidate(&self, tenant_id: &str, user_id: &TimeSortableId) -> AppResult<()> {
        self.invalidate_user(tenant_id, user_id).await
    }
}

pub struct PermissionCacheService {
    db: Arc<DatabaseConnection>,
    cache: Arc<dyn CacheStore>,
    permission_ttl: Duration,
    roles_ttl: Duration,
}

impl PermissionCacheService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        cache: Arc<dyn CacheStore>,
        permission_ttl: Duration,
        roles_ttl: Duration,
    ) -> Self {
        Self {
            db,
            cache,
            permission_ttl,
            roles_ttl,
        }
    }

    async fn active_role_ids(&self, tenant_id: &str, user_id: &TimeSortableId) -> AppResult<Vec<uuid::Uuid>> {
        let grants = UserRoleEntity::find()
            .filter(UserRoleColumn::UserIdentityId.eq(user_id.as_uuid()))
            .filter(UserRoleColumn::TenantId.eq(tenant_id))
            .all(self.db.as_ref())
            .await?;

        Ok(grants
            .into_iter()
            .filter(is_active)
            .map(|g| g.role_id)
            .collect())
    }

    async fn load_roles(&self, tenant_id: &str, user_id: &TimeSortableId) -> AppResult<Vec<Role>> {
        let role_ids = self.active_role_ids(tenant_id, user_id).await?;
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }

        let roles = RoleEntity::find()
            .filter(RoleColumn::Id.is_in(role_ids))
            .all(self.db.as_ref())
            .await?;

        Ok(roles.into_iter().map(role_model_to_domain).collect())
    }

    async fn load_permission_set(&self, tenant_id: &str, user_id: &TimeSortableId) -> AppResult<PermissionSet> {
        let role_ids = self.active_role_ids(tenant_id, user_id).await?;
        if role_ids.is_empty() {
            return Ok(PermissionSet::empty());
        }

        let permission_ids: Vec<uuid::Uuid> = RolePermissionEntity::find()
            .filter(RolePermissionColumn::RoleId.is_in(role_ids))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|rp| rp.permission_id)
            .collect();

        if permission_ids.is_empty() {
            return Ok(PermissionSet::empty());
        }

        let codes: Vec<String> = PermissionEntity::find()
            .filter(PermissionColumn::Id.is_in(permission_ids))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|p| p.code)
            .collect();

        Ok(PermissionSet::new(codes))
    }

    async fn load_permission_infos(
        &self,
        tenant_id: &str,
        user_id: &TimeSortableId,
    ) -> AppResult<Vec<PermissionInfo>> {
        let role_ids = self.active_role_ids(tenant_id, user_id).await?;
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }

        let permission_ids: Vec<uuid::Uuid> = RolePermissionEntity::find()
            .filter(RolePermissionColumn::RoleId.is_in(role_ids))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|rp| rp.permission_id)
            .collect();

        if permission_ids.is_empty() {
            return Ok(Vec::new());
        }

        let permissions = PermissionEntity::find()
            .filter(PermissionColumn::Id.is_in(permission_ids))
            .all(self.db.as_ref())
            .await?;

        Ok(permissions.into_iter().map(permission_model_to_info).collect())
    }
}

#[async_trait]
impl PermissionCacheTrait for PermissionCacheService {
    #[instrument(skip(self))]
    async fn resolve(&self, tenant_id: &str, user_id: &TimeSortableId) -> AppResult<PermissionSet> {
        let key = permission_cache_key(tenant_id, user_id);

        if let Some(cached) = self.cache.get(&key).await? {
            if let Ok(set) = serde_json::from_slice::<PermissionSet>(&cached) {
                return Ok(set);
            }
        }

        let set = self.load_permission_set(tenant_id, user_id).await?;
        let encoded = serde_json::to_vec(&set)?;
        self.cache.set_ex(&key, encoded, self.permission_ttl).await?;
        Ok(set)
    }

    #[instrument(skip(self))]
    async fn get_user_permissions(
        &self,
        tenant_id: &str,
        user_id: &TimeSortableId,
    ) -> AppResult<Vec<PermissionInfo>> {
        let key = summary_cache_key(tenant_id, user_id);

        if let Some(cached) = self.cache.get(&key).await? {
            if let Ok(infos) = serde_json::from_slice::<Vec<PermissionInfo>>(&cached) {
                return Ok(infos);
            }
        }

        let infos = self.load_permission_infos(tenant_id, user_id).await?;
        let encoded = serde_json::to_vec(&infos)?;
        self.cache.set_ex(&key, encoded, self.permission_ttl).await?;
        Ok(infos)
    }

    #[instrument(skip(self))]
    async fn get_user_roles(&self, tenant_id: &str, user_id: &TimeSortableId) -> AppResult<Vec<Role>> {
        let key = roles_cache_key(tenant_id, user_id);

        if let Some(cached) = self.cache.get(&key).await? {
            if let Ok(roles) = serde_json::from_slice::<Vec<Role>>(&cached) {
                return Ok(roles);
            }
        }

        let roles = self.load_roles(tenant_id, user_id).await?;
        let encoded = serde_json::to_vec(&roles)?;
        self.cache.set_ex(&key, encoded, self.roles_ttl).await?;
        Ok(roles)
    }

    #[instrument(skip(self))]
    async fn invalidate_user(&self, tenant_id: &str, user_id: &TimeSortableId) -> AppResult<()> {
        self.cache.delete(&permission_cache_key(tenant_id, user_id)).await?;
        self.cache.delete(&roles_cache_key(tenant_id, user_id)).await?;
        self.cache.delete(&summary_cache_key(tenant_id, user_id)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn invalidate_role(&self, role_id: &str) -> AppResult<()> {
        tracing::info!(role_id, "flushing permission cache after role catalog change");
        self.cache.delete_pattern("perm:*").await?;
        self.cache.delete_pattern("roles:*").await?;
        self.cache.delete_pattern("perm-summary:*").await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn warm_user(&self, tenant_id: &str, user_id: &TimeSortableId) -> AppResult<()> {
        self.resolve(tenant_id, user_id).await?;
        self.get_user_roles(tenant_id, user_id).await?;
        self.get_user_permissions(tenant_id, user_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::InMemoryStore;
    use crate::infrastructure::database::entities::role_permission::Model as RolePermissionModel;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use uuid::Uuid;

    fn test_role(role_id: Uuid) -> RoleModel {
        RoleModel {
            id: role_id,
            tenant_id: Some("tenant-a".to_string()),
            role_code: "editor".to_string(),
            scope: "tenant".to_string(),
            name: "Editor".to_string(),
            description: None,
            is_system: false,
            created_at: Utc::now(),
        }
    }

    fn test_grant(user_id: Uuid, role_id: Uuid) -> UserRoleModel {
        UserRoleModel {
            user_identity_id: user_id,
            role_id,
            tenant_id: "tenant-a".to_string(),
            granted_at: Utc::now(),
            expires_at: None,
        }
    }

    fn test_permission(permission_id: Uuid) -> PermissionModel {
        PermissionModel {
            id: permission_id,
            code: "invoices:read".to_string(),
            scope: "tenant".to_string(),
            description: None,
            is_dangerous: false,
            requires_mfa: false,
            requires_approval: false,
        }
    }

    #[tokio::test]
    async fn resolves_and_caches_rolled_up_permissions() {
        let role_id = Uuid::now_v7();
        let permission_id = Uuid::now_v7();
        let user_id = TimeSortableId::new();

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![test_grant(user_id.as_uuid(), role_id)]])
            .append_query_results(vec![vec![RolePermissionModel {
                role_id,
                permission_id,
            }]])
            .append_query_results(vec![vec![test_permission(permission_id)]])
            .into_connection();

        let cache = Arc::new(InMemoryStore::new());
        let service = PermissionCacheService::new(
            Arc::new(db),
            cache.clone(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        let set = service.resolve("tenant-a", &user_id).await.unwrap();
        assert!(set.allows("invoices:read"));
        assert!(cache
            .get(&permission_cache_key("tenant-a", &user_id))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn tenant_with_no_roles_resolves_empty() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(Vec::<Vec<UserRoleModel>>::new())
            .into_connection();

        let cache = Arc::new(InMemoryStore::new());
        let service = PermissionCacheService::new(
            Arc::new(db),
            cache,
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        let set = service.resolve("tenant-a", &TimeSortableId::new()).await.unwrap();
        assert!(!set.allows("invoices:read"));
    }

    #[tokio::test]
    async fn get_user_roles_returns_catalog_entries() {
        let role_id = Uuid::now_v7();
        let user_id = TimeSortableId::new();

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![test_grant(user_id.as_uuid(), role_id)]])
            .append_query_results(vec![vec![test_role(role_id)]])
            .into_connection();

        let service = PermissionCacheService::new(
            Arc::new(db),
            Arc::new(InMemoryStore::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        let roles = service.get_user_roles("tenant-a", &user_id).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].role_code, "editor");
    }

    #[tokio::test]
    async fn expired_grant_is_excluded() {
        let role_id = Uuid::now_v7();
        let user_id = TimeSortableId::new();
        let mut grant = test_grant(user_id.as_uuid(), role_id);
        grant.expires_at = Some(Utc::now() - chrono::Duration::seconds(60));

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![grant]])
            .into_connection();

        let service = PermissionCacheService::new(
            Arc::new(db),
            Arc::new(InMemoryStore::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        let roles = service.get_user_roles("tenant-a", &user_id).await.unwrap();
        assert!(roles.is_empty());
    }

    #[tokio::test]
    async fn invalidate_user_clears_all_three_keys() {
        let user_id = TimeSortableId::new();
        let cache = Arc::new(InMemoryStore::new());
        cache
            .set_ex(&permission_cache_key("tenant-a", &user_id), vec![1], Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set_ex(&roles_cache_key("tenant-a", &user_id), vec![1], Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set_ex(&summary_cache_key("tenant-a", &user_id), vec![1], Duration::from_secs(60))
            .await
            .unwrap();

        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let service = PermissionCacheService::new(
            Arc::new(db),
            cache.clone(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        service.invalidate_user("tenant-a", &user_id).await.unwrap();
        assert!(cache.get(&permission_cache_key("tenant-a", &user_id)).await.unwrap().is_none());
        assert!(cache.get(&roles_cache_key("tenant-a", &user_id)).await.unwrap().is_none());
        assert!(cache.get(&summary_cache_key("tenant-a", &user_id)).await.unwrap().is_none());
    }
}
