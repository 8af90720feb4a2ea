use serde::{Deserialize, Serialize};

use crate::domain::permission::PermissionScope;

/// A role's catalog entry, as returned by
/// [`PermissionCacheTrait::get_user_roles`](crate::infrastructure::services::permission_cache::PermissionCacheTrait::get_user_roles).
/// `role_code` is unique within its scope; `name` is the display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub role_code: String,
    pub scope: PermissionScope,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
}
