use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let id_col = match manager.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => ColumnDef::new(SecurityEvents::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key()
                .to_owned(),
            _ => ColumnDef::new(SecurityEvents::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key()
                .to_owned(),
        };

        manager
            .create_table(
                Table::create()
                    .table(SecurityEvents::Table)
                    .if_not_exists()
                    .col(id_col)
                    .col(string(SecurityEvents::Event))
                    .col(string(SecurityEvents::Severity))
                    .col(string_null(SecurityEvents::Subject))
                    .col(string_null(SecurityEvents::DeviceCode))
                    .col(string_null(SecurityEvents::ClientId))
                    .col(string(SecurityEvents::Metadata))
                    .col(big_integer(SecurityEvents::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_security_events_device_code")
                    .table(SecurityEvents::Table)
                    .col(SecurityEvents::DeviceCode)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SecurityEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SecurityEvents {
    Table,
    Id,
    Event,
    Severity,
    Subject,
    DeviceCode,
    ClientId,
    Metadata,
    CreatedAt,
}
