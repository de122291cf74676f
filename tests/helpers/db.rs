use sea_orm::{Database, DatabaseConnection};
use migration::MigratorTrait;
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// Number of device session rows, whatever their status
pub async fn count_device_sessions(db: &DatabaseConnection) -> u64 {
    use esh::entities::device_session::Entity;
    use sea_orm::{EntityTrait, PaginatorTrait};

    Entity::find()
        .count(db)
        .await
        .expect("Failed to count device sessions")
}

/// Number of security events of one kind
pub async fn count_security_events(db: &DatabaseConnection, event: &str) -> u64 {
    use esh::entities::security_event::{Column, Entity};
    use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

    Entity::find()
        .filter(Column::Event.eq(event))
        .count(db)
        .await
        .expect("Failed to count security events")
}
