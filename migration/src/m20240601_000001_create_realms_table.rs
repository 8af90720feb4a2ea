use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Realms::Table)
                    .col(ColumnDef::new(Realms::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Realms::TenantId).string().not_null())
                    .col(ColumnDef::new(Realms::DisplayName).string().not_null())
                    .col(
                        ColumnDef::new(Realms::ProviderRealmName)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Realms::ProviderServerUrl)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Realms::IssuerUrl).string().not_null())
                    .col(ColumnDef::new(Realms::ClientId).string().not_null())
                    .col(ColumnDef::new(Realms::ClientSecretRef).string().null())
                    .col(
                        ColumnDef::new(Realms::SigningAlgorithms)
                            .string()
                            .not_null()
                            .default("RS256"),
                    )
                    .col(ColumnDef::new(Realms::ExpectedAudience).string().null())
                    .col(ColumnDef::new(Realms::ExpectedIssuer).string().null())
                    .col(
                        ColumnDef::new(Realms::VerifySignature)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Realms::VerifyExp)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Realms::VerifyNbf)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Realms::VerifyIat)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Realms::VerifyAudience)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Realms::VerifyIssuer)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Realms::PublicKeyTtlSecs)
                            .big_integer()
                            .not_null()
                            .default(3600),
                    )
                    .col(
                        ColumnDef::new(Realms::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Realms::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Realms::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_realms_tenant_id")
                    .table(Realms::Table)
                    .col(Realms::TenantId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_realms_provider_server_realm")
                    .table(Realms::Table)
                    .col(Realms::ProviderServerUrl)
                    .col(Realms::ProviderRealmName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TenantAccessGrants::Table)
                    .col(
                        ColumnDef::new(TenantAccessGrants::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TenantAccessGrants::UserIdentityId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TenantAccessGrants::TenantId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TenantAccessGrants::GrantedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tenant_access_grants_user_tenant")
                    .table(TenantAccessGrants::Table)
                    .col(TenantAccessGrants::UserIdentityId)
                    .col(TenantAccessGrants::TenantId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TenantAccessGrants::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Realms::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
pub enum Realms {
    Table,
    Id,
    TenantId,
    DisplayName,
    ProviderRealmName,
    ProviderServerUrl,
    IssuerUrl,
    ClientId,
    ClientSecretRef,
    SigningAlgorithms,
    ExpectedAudience,
    ExpectedIssuer,
    VerifySignature,
    VerifyExp,
    VerifyNbf,
    VerifyIat,
    VerifyAudience,
    VerifyIssuer,
    PublicKeyTtlSecs,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum TenantAccessGrants {
    Table,
    Id,
    UserIdentityId,
    TenantId,
    GrantedAt,
}
