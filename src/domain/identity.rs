use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::{AppError, AppResult};
use crate::common::ids::TimeSortableId;

/// Local record mapping a provider subject (`sub` claim) within a tenant's
/// realm to a stable internal user id. Created lazily the first time a
/// subject is seen (just-in-time provisioning) and updated on every login
/// if the provider-side profile has changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: TimeSortableId,
    pub tenant_id: String,
    pub provider_subject: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl UserIdentity {
    pub fn provision(
        tenant_id: String,
        provider_subject: String,
        username: Option<String>,
        email: Option<String>,
    ) -> AppResult<Self> {
        if tenant_id.trim().is_empty() {
            return Err(AppError::missing_tenant());
        }
        if provider_subject.trim().is_empty() {
            return Err(AppError::user_mapping_failure("empty provider subject"));
        }

        let now = Utc::now();
        Ok(Self {
            id: TimeSortableId::new(),
            tenant_id,
            provider_subject,
            username,
            email,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_seen_at: Some(now),
        })
    }

    pub fn touch(&mut self) {
        self.last_seen_at = Some(Utc::now());
    }

    pub fn ensure_active(&self) -> AppResult<()> {
        if !self.is_active {
            return Err(AppError::user_disabled());
        }
        Ok(())
    }

    pub fn sync_profile(&mut self, username: Option<String>, email: Option<String>) {
        if username.is_some() {
            self.username = username;
        }
        if email.is_some() {
            self.email = email;
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_requires_tenant_and_subject() {
        assert!(UserIdentity::provision(
            "".to_string(),
            "sub-1".to_string(),
            None,
            None
        )
        .is_err());

        assert!(UserIdentity::provision(
            "tenant-a".to_string(),
            "".to_string(),
            None,
            None
        )
        .is_err());
    }

    #[test]
    fn disabled_identity_fails_ensure_active() {
        let mut identity =
            UserIdentity::provision("tenant-a".to_string(), "sub-1".to_string(), None, None)
                .unwrap();
        identity.is_active = false;
        assert!(identity.ensure_active().is_err());
    }

    #[test]
    fn sync_profile_only_overwrites_present_fields() {
        let mut identity = UserIdentity::provision(
            "tenant-a".to_string(),
            "sub-1".to_string(),
            Some("alice".to_string()),
            Some("alice@example.com".to_string()),
        )
        .unwrap();

        identity.sync_profile(None, Some("alice2@example.com".to_string()));
        assert_eq!(identity.username.as_deref(), Some("alice"));
        assert_eq!(identity.email.as_deref(), Some("alice2@example.com"));
    }
}
