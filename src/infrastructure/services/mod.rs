pub mod guest_service;
pub mod identity_mapper;
pub mod permission_cache;
pub mod realm_registry;

pub use guest_service::GuestService;
pub use identity_mapper::IdentityMapper;
pub use permission_cache::PermissionCacheService;
pub use realm_registry::RealmRegistry;
