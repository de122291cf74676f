use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ApiTokens::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ApiTokens::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(ApiTokens::LookupDigest))
                    .col(string(ApiTokens::VerificationHash))
                    .col(string(ApiTokens::OwnerSubject))
                    .col(string(ApiTokens::DisplayName))
                    .col(big_integer(ApiTokens::CreatedAt))
                    .col(big_integer(ApiTokens::ExpiresAt))
                    .col(
                        ColumnDef::new(ApiTokens::Revoked)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        // Inbound bearer requests locate their token by digest
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_api_tokens_lookup_digest")
                    .table(ApiTokens::Table)
                    .col(ApiTokens::LookupDigest)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_api_tokens_owner")
                    .table(ApiTokens::Table)
                    .col(ApiTokens::OwnerSubject)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ApiTokens::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ApiTokens {
    Table,
    Id,
    LookupDigest,
    VerificationHash,
    OwnerSubject,
    DisplayName,
    CreatedAt,
    ExpiresAt,
    Revoked,
}
