use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::{AppError, AppResult};
use crate::common::ids::TimeSortableId;

const DEFAULT_SIGNING_ALGORITHM: &str = "RS256";
const DEFAULT_PUBLIC_KEY_TTL_SECS: u64 = 3600;

/// A tenant's binding to an identity-provider realm. One tenant maps to
/// exactly one realm; a realm may be shared by several tenants (pooled
/// deployments) or dedicated to one (isolated deployments).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Realm {
    pub id: TimeSortableId,
    pub tenant_id: String,
    pub display_name: String,
    pub provider_realm_name: String,
    pub provider_server_url: String,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret_ref: Option<String>,
    /// Algorithms accepted for locally-verified signatures. A token whose
    /// `alg` header isn't in this set is rejected before any key fetch.
    pub signing_algorithms: Vec<String>,
    pub expected_audience: Option<String>,
    pub expected_issuer: Option<String>,
    pub verify_signature: bool,
    pub verify_exp: bool,
    pub verify_nbf: bool,
    pub verify_iat: bool,
    pub verify_audience: bool,
    pub verify_issuer: bool,
    pub public_key_ttl_secs: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a caller supplies when registering a new realm; everything else
/// (signing algorithms, verify flags, TTLs) takes the documented default and
/// can be overridden later via `update`.
#[derive(Debug, Clone)]
pub struct RealmRegistration {
    pub tenant_id: String,
    pub display_name: String,
    pub provider_realm_name: String,
    pub provider_server_url: String,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret_ref: Option<String>,
}

impl Realm {
    pub fn new(registration: RealmRegistration) -> AppResult<Self> {
        Self::validate_tenant_id(&registration.tenant_id)?;
        Self::validate_realm_name(&registration.provider_realm_name)?;

        let now = Utc::now();
        Ok(Self {
            id: TimeSortableId::new(),
            tenant_id: registration.tenant_id,
            display_name: registration.display_name,
            provider_realm_name: registration.provider_realm_name,
            provider_server_url: registration.provider_server_url,
            expected_issuer: Some(registration.issuer_url.clone()),
            issuer_url: registration.issuer_url,
            client_id: registration.client_id,
            client_secret_ref: registration.client_secret_ref,
            signing_algorithms: vec![DEFAULT_SIGNING_ALGORITHM.to_string()],
            expected_audience: None,
            verify_signature: true,
            verify_exp: true,
            verify_nbf: true,
            verify_iat: true,
            verify_audience: false,
            verify_issuer: true,
            public_key_ttl_secs: DEFAULT_PUBLIC_KEY_TTL_SECS,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// A realm registered in memory only, with no backing DB row (the
    /// platform/master realm used for admin operations against the provider
    /// itself rather than a tenant's own realm).
    pub fn platform(provider_server_url: String, provider_realm_name: String, issuer_url: String, client_id: String) -> AppResult<Self> {
        Self::new(RealmRegistration {
            tenant_id: "platform".to_string(),
            display_name: "Platform".to_string(),
            provider_realm_name,
            provider_server_url,
            issuer_url,
            client_id,
            client_secret_ref: None,
        })
    }

    pub fn validate_tenant_id(tenant_id: &str) -> AppResult<()> {
        if tenant_id.trim().is_empty() {
            return Err(AppError::validation("tenant_id must not be empty"));
        }
        Ok(())
    }

    pub fn validate_realm_name(name: &str) -> AppResult<()> {
        if name.trim().is_empty() {
            return Err(AppError::validation("provider_realm_name must not be empty"));
        }
        Ok(())
    }

    pub fn disable(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    pub fn ensure_active(&self) -> AppResult<()> {
        if !self.is_active {
            return Err(AppError::realm_not_configured());
        }
        Ok(())
    }

    /// Step 1 of token validation: is `alg` (as decoded from the token
    /// header) in this realm's allow-list? Checked before any key fetch.
    pub fn allows_algorithm(&self, alg: &str) -> bool {
        self.signing_algorithms.iter().any(|a| a == alg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> RealmRegistration {
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

    #[test]
    fn new_realm_defaults_active() {
        let realm = Realm::new(registration()).unwrap();
        assert!(realm.is_active);
    }

    #[test]
    fn new_realm_defaults_to_rs256_only() {
        let realm = Realm::new(registration()).unwrap();
        assert!(realm.allows_algorithm("RS256"));
        assert!(!realm.allows_algorithm("HS256"));
        assert!(!realm.allows_algorithm("none"));
    }

    #[test]
    fn rejects_empty_tenant_id() {
        let mut reg = registration();
        reg.tenant_id = "".to_string();
        assert!(Realm::new(reg).is_err());
    }

    #[test]
    fn disabled_realm_fails_ensure_active() {
        let mut realm = Realm::new(registration()).unwrap();
        realm.disable();
        assert!(realm.ensure_active().is_err());
    }
}
