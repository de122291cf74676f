use esh::session::SESSION_COOKIE_NAME;
use esh::storage;
use sea_orm::DatabaseConnection;

/// Builder for creating test users
pub struct UserBuilder {
    username: String,
    password: String,
}

impl UserBuilder {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            password: "password123".to_string(),
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> storage::User {
        storage::create_user(db, &self.username, &self.password)
            .await
            .expect("Failed to create test user")
    }
}

/// Builder for creating browser sessions
pub struct SessionBuilder {
    subject: String,
    ttl: i64,
}

impl SessionBuilder {
    pub fn new(subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            ttl: 3600, // 1 hour
        }
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> storage::Session {
        storage::create_session(db, &self.subject, self.ttl, None, None)
            .await
            .expect("Failed to create test session")
    }
}

/// `Cookie` header value carrying the given browser session
pub fn session_cookie(session: &storage::Session) -> String {
    format!("{}={}", SESSION_COOKIE_NAME, session.session_id)
}
