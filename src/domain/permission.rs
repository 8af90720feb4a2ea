use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A single `resource:action` permission code, e.g. `invoices:read`.
/// Either half may be the wildcard `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub action: String,
}

impl Permission {
    pub fn parse(code: &str) -> Option<Self> {
        let (resource, action) = code.split_once(':')?;
        if resource.is_empty() || action.is_empty() {
            return None;
        }
        Some(Self {
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }

    pub fn code(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }

    /// Does this permission (possibly wildcarded) cover the given concrete
    /// `resource:action` code? The four match rules, most specific first:
    /// exact match, `resource:*`, `*:action`, `*:*`.
    pub fn matches(&self, other: &Permission) -> bool {
        let resource_matches = self.resource == "*" || self.resource == other.resource;
        let action_matches = self.action == "*" || self.action == other.action;
        resource_matches && action_matches
    }
}

/// A user's resolved permission set for a tenant, as computed by rolling up
/// roles assigned in that tenant. Opaque wrapper so callers go through
/// `allows` rather than poking at role membership directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    granted: HashSet<String>,
}

impl PermissionSet {
    pub fn new(codes: impl IntoIterator<Item = String>) -> Self {
        Self {
            granted: codes.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn codes(&self) -> impl Iterator<Item = &String> {
        self.granted.iter()
    }

    /// True if any granted permission (wildcarded or exact) covers `code`.
    pub fn allows(&self, code: &str) -> bool {
        let Some(requested) = Permission::parse(code) else {
            return false;
        };

        self.granted.iter().any(|granted_code| {
            Permission::parse(granted_code)
                .map(|granted| granted.matches(&requested))
                .unwrap_or(false)
        })
    }

    pub fn allows_all(&self, codes: &[&str]) -> bool {
        codes.iter().all(|c| self.allows(c))
    }

    /// True if at least one of `codes` is covered. Used for `require_all =
    /// false` checks.
    pub fn allows_any(&self, codes: &[&str]) -> bool {
        codes.iter().any(|c| self.allows(c))
    }

    pub fn missing(&self, codes: &[&str]) -> Vec<String> {
        codes
            .iter()
            .filter(|c| !self.allows(c))
            .map(|c| c.to_string())
            .collect()
    }
}

/// Scope a role or permission is defined in: platform-wide, or scoped to a
/// single tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    Platform,
    Tenant,
}

/// A permission's full catalog entry, as returned by
/// [`PermissionCacheTrait::get_user_permissions`](crate::infrastructure::services::permission_cache::PermissionCacheTrait::get_user_permissions).
/// Distinct from [`Permission`], which is just the wildcard-matcher pair used
/// internally by [`PermissionSet::allows`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInfo {
    pub code: String,
    pub scope: PermissionScope,
    pub description: Option<String>,
    pub is_dangerous: bool,
    pub requires_mfa: bool,
    pub requires_approval: bool,
}
