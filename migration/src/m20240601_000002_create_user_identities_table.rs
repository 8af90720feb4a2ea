use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserIdentities::Table)
                    .col(
                        ColumnDef::new(UserIdentities::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UserIdentities::TenantId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserIdentities::ProviderSubject)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(UserIdentities::Username).string().null())
                    .col(ColumnDef::new(UserIdentities::Email).string().null())
                    .col(
                        ColumnDef::new(UserIdentities::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(UserIdentities::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(UserIdentities::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(UserIdentities::LastSeenAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_identities_tenant_subject")
                    .table(UserIdentities::Table)
                    .col(UserIdentities::TenantId)
                    .col(UserIdentities::ProviderSubject)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserIdentities::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum UserIdentities {
    Table,
    Id,
    TenantId,
    ProviderSubject,
    Username,
    Email,
    IsActive,
    CreatedAt,
    UpdatedAt,
    LastSeenAt,
}
