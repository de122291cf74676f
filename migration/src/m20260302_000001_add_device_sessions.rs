use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create device_sessions table for browser-delegated CLI login
        manager
            .create_table(
                Table::create()
                    .table(DeviceSessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeviceSessions::DeviceCode)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DeviceSessions::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(big_integer(DeviceSessions::CreatedAt))
                    .col(big_integer(DeviceSessions::ExpiresAt))
                    .col(string(DeviceSessions::RequestedTokenName))
                    .col(string_null(DeviceSessions::OwnerSubject))
                    .col(string_null(DeviceSessions::SealedCiphertext))
                    .col(string_null(DeviceSessions::SealedNonce))
                    .col(string_null(DeviceSessions::SealedTag))
                    .col(string_null(DeviceSessions::BoundTokenId))
                    .col(string_null(DeviceSessions::ClientIp))
                    .col(string_null(DeviceSessions::UserAgent))
                    .col(big_integer_null(DeviceSessions::ApprovedAt))
                    .col(big_integer_null(DeviceSessions::ConsumedAt))
                    .to_owned(),
            )
            .await?;

        // Create index on expires_at for the sweep job
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_device_sessions_expires_at")
                    .table(DeviceSessions::Table)
                    .col(DeviceSessions::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_device_sessions_status")
                    .table(DeviceSessions::Table)
                    .col(DeviceSessions::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeviceSessions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DeviceSessions {
    Table,
    DeviceCode,
    Status,
    CreatedAt,
    ExpiresAt,
    RequestedTokenName,
    OwnerSubject,
    SealedCiphertext,
    SealedNonce,
    SealedTag,
    BoundTokenId,
    ClientIp,
    UserAgent,
    ApprovedAt,
    ConsumedAt,
}
