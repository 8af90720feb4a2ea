pub mod auth_context;
pub mod guest;
pub mod identity;
pub mod permission;
pub mod realm;
pub mod role;

pub use auth_context::AuthContext;
pub use guest::GuestSession;
pub use identity::UserIdentity;
pub use permission::{Permission, PermissionInfo, PermissionScope, PermissionSet};
pub use realm::{Realm, RealmRegistration};
pub use role::Role;
