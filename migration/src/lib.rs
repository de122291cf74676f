pub use sea_orm_migration::prelude::*;

mod m20260301_000001_initial_schema;
mod m20260301_000002_add_api_tokens;
mod m20260302_000001_add_device_sessions;
mod m20260305_000001_add_security_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_initial_schema::Migration),
            Box::new(m20260301_000002_add_api_tokens::Migration),
            Box::new(m20260302_000001_add_device_sessions::Migration),
            Box::new(m20260305_000001_add_security_events::Migration),
        ]
    }
}
