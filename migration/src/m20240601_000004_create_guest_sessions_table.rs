use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(GuestSessions::Table)
                    .col(
                        ColumnDef::new(GuestSessions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GuestSessions::TenantId).string().not_null())
                    .col(
                        ColumnDef::new(GuestSessions::SessionToken)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GuestSessions::Fingerprint)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(GuestSessions::UserAgent).string().not_null())
                    .col(ColumnDef::new(GuestSessions::Referrer).string().null())
                    .col(
                        ColumnDef::new(GuestSessions::RequestCount)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(GuestSessions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(GuestSessions::LastSeenAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(GuestSessions::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_guest_sessions_session_token")
                    .table(GuestSessions::Table)
                    .col(GuestSessions::SessionToken)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_guest_sessions_tenant_fingerprint")
                    .table(GuestSessions::Table)
                    .col(GuestSessions::TenantId)
                    .col(GuestSessions::Fingerprint)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(GuestSessions::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum GuestSessions {
    Table,
    Id,
    TenantId,
    SessionToken,
    Fingerprint,
    UserAgent,
    Referrer,
    RequestCount,
    CreatedAt,
    LastSeenAt,
    ExpiresAt,
}
