pub use sea_orm_migration::prelude::*;

mod m20240601_000001_create_realms_table;
mod m20240601_000002_create_user_identities_table;
mod m20240601_000003_create_roles_and_permissions_tables;
mod m20240601_000004_create_guest_sessions_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_realms_table::Migration),
            Box::new(m20240601_000002_create_user_identities_table::Migration),
            Box::new(m20240601_000003_create_roles_and_permissions_tables::Migration),
            Box::new(m20240601_000004_create_guest_sessions_table::Migration),
        ]
    }
}
