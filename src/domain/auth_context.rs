use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::common::error::{AppError, AppResult};
use crate::domain::permission::PermissionSet;

/// Decoded Keycloak-shaped JWT claims. Field set matches what the provider
/// actually emits; unknown/extra claims are dropped rather than erroring,
/// since providers add vendor fields over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub auth_time: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
    pub iss: String,
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    #[serde(default)]
    pub typ: Option<String>,
    #[serde(default)]
    pub azp: Option<String>,
    #[serde(default)]
    pub session_state: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default)]
    pub acr: Option<String>,
    #[serde(default)]
    pub realm_access: Option<RealmAccess>,
    #[serde(default)]
    pub resource_access: Option<HashMap<String, ResourceAccess>>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Claims {
    /// Role names from `realm_access.roles` (unprefixed realm roles) plus
    /// every client's `resource_access.<client>.roles`, each prefixed with
    /// `<client-id>:` so a client role can never collide with a realm role
    /// of the same name.
    pub fn all_roles(&self) -> HashSet<String> {
        let mut roles = HashSet::new();
        if let Some(realm_access) = &self.realm_access {
            roles.extend(realm_access.roles.iter().cloned());
        }
        if let Some(resource_access) = &self.resource_access {
            for (client_id, access) in resource_access.iter() {
                roles.extend(
                    access
                        .roles
                        .iter()
                        .map(|role| format!("{client_id}:{role}")),
                );
            }
        }
        roles
    }
}

/// The fully-resolved identity of an authenticated request: who, in which
/// tenant, with which permissions. Produced by the request pipeline and
/// carried in axum request extensions for handlers to consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub tenant_id: String,
    pub subject: String,
    pub user_id: Option<crate::common::ids::TimeSortableId>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub permissions: PermissionSet,
    pub request_id: String,
    pub is_guest: bool,
}

impl AuthContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, code: &str) -> bool {
        self.permissions.allows(code)
    }

    /// Rejects the request unless every one of `codes` is covered. This is
    /// the enforcement point named by the request pipeline's permission
    /// step: handlers that guard an operation call this before doing any
    /// work, rather than trusting that token possession alone is enough.
    pub fn require_permissions(&self, codes: &[&str]) -> AppResult<()> {
        if self.permissions.allows_all(codes) {
            return Ok(());
        }
        Err(AppError::insufficient_permissions(
            self.permissions.missing(codes),
        ))
    }

    pub fn require_permission(&self, code: &str) -> AppResult<()> {
        self.require_permissions(&[code])
    }

    /// Rejects the request unless at least one of `codes` is covered.
    pub fn require_any_permission(&self, codes: &[&str]) -> AppResult<()> {
        if self.permissions.allows_any(codes) {
            return Ok(());
        }
        Err(AppError::insufficient_permissions(
            codes.iter().map(|c| c.to_string()).collect(),
        ))
    }

    pub fn require_role(&self, role: &str) -> AppResult<()> {
        if self.has_role(role) {
            return Ok(());
        }
        Err(AppError::forbidden(format!("role {role} required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_roles_merges_realm_and_resource_access() {
        let mut resource_access = HashMap::new();
        resource_access.insert(
            "billing-service".to_string(),
            ResourceAccess {
                roles: vec!["billing:admin".to_string()],
            },
        );

        let claims = Claims {
            sub: "user-1".to_string(),
            exp: 0,
            iat: 0,
            auth_time: None,
            jti: None,
            iss: "https://idp.example.com/realms/acme".to_string(),
            aud: None,
            typ: None,
            azp: None,
            session_state: None,
            sid: None,
            acr: None,
            realm_access: Some(RealmAccess {
                roles: vec!["realm-admin".to_string()],
            }),
            resource_access: Some(resource_access),
            scope: None,
            email_verified: None,
            preferred_username: None,
            given_name: None,
            family_name: None,
            email: None,
        };

        let roles = claims.all_roles();
        assert!(roles.contains("realm-admin"));
        assert!(roles.contains("billing-service:billing:admin"));
    }

    #[test]
    fn require_permission_reports_missing_on_failure() {
        let ctx = AuthContext {
            tenant_id: "tenant-a".to_string(),
            subject: "user-1".to_string(),
            user_id: None,
            username: None,
            email: None,
            roles: Vec::new(),
            permissions: PermissionSet::new(vec!["invoices:read".to_string()]),
            request_id: "req-1".to_string(),
            is_guest: false,
        };

        assert!(ctx.require_permission("invoices:read").is_ok());
        let err = ctx.require_permission("invoices:delete").unwrap_err();
        assert_eq!(err.kind.code(), "insufficient_permissions");
    }

    #[test]
    fn require_any_permission_succeeds_on_partial_match() {
        let ctx = AuthContext {
            tenant_id: "tenant-a".to_string(),
            subject: "user-1".to_string(),
            user_id: None,
            username: None,
            email: None,
            roles: Vec::new(),
            permissions: PermissionSet::new(vec!["invoices:read".to_string()]),
            request_id: "req-1".to_string(),
            is_guest: false,
        };

        assert!(ctx
            .require_any_permission(&["invoices:write", "invoices:read"])
            .is_ok());
        assert!(ctx
            .require_any_permission(&["invoices:write", "invoices:delete"])
            .is_err());
    }
}
