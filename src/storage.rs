use crate::device::DeviceStatus;
use crate::entities;
use crate::errors::EshError;
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use chrono::Utc;
use migration::MigratorTrait;
use rand::RngCore;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rows older than this past their expiry are deleted by the sweep job.
pub const DEVICE_SESSION_RETENTION_SECS: i64 = 7 * 24 * 3600;

/// Security events are kept for 90 days.
pub const SECURITY_EVENT_RETENTION_SECS: i64 = 90 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub subject: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: i64,
    pub enabled: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub subject: String,
    pub auth_time: i64,
    pub created_at: i64,
    pub expires_at: i64,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSession {
    pub device_code: String,
    pub status: DeviceStatus,
    pub created_at: i64,
    pub expires_at: i64,
    pub requested_token_name: String,
    pub owner_subject: Option<String>,
    pub sealed_ciphertext: Option<String>,
    pub sealed_nonce: Option<String>,
    pub sealed_tag: Option<String>,
    pub bound_token_id: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub approved_at: Option<i64>,
    pub consumed_at: Option<i64>,
}

impl DeviceSession {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }

    pub fn has_sealed_credential(&self) -> bool {
        self.sealed_ciphertext.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewDeviceSession {
    pub requested_token_name: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub ttl_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub id: String,
    pub lookup_digest: String,
    pub verification_hash: String,
    pub owner_subject: String,
    pub display_name: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub revoked: i64,
}

#[derive(Debug, Clone)]
pub struct NewApiToken {
    pub lookup_digest: String,
    pub verification_hash: String,
    pub owner_subject: String,
    pub display_name: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: i64,
    pub event: String,
    pub severity: String,
    pub subject: Option<String>,
    pub device_code: Option<String>,
    pub client_id: Option<String>,
    pub metadata: Value,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewSecurityEvent {
    pub event: String,
    pub severity: String,
    pub subject: Option<String>,
    pub device_code: Option<String>,
    pub client_id: Option<String>,
    pub metadata: Value,
}

/// Connect and bring the schema up to date.
pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, EshError> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

/// 32 random bytes, base64url without padding (43 characters).
fn generate_device_code() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

// User management functions

pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> Result<User, EshError> {
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::{Argon2, PasswordHasher};

    let subject = random_id();
    let created_at = Utc::now().timestamp();

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| EshError::Other(format!("Password hashing failed: {}", e)))?
        .to_string();

    let user = entities::user::ActiveModel {
        subject: Set(subject.clone()),
        username: Set(username.to_string()),
        password_hash: Set(password_hash.clone()),
        created_at: Set(created_at),
        enabled: Set(1),
    };

    user.insert(db).await?;

    Ok(User {
        subject,
        username: username.to_string(),
        password_hash,
        created_at,
        enabled: 1,
    })
}

pub async fn get_user_by_username(
    db: &DatabaseConnection,
    username: &str,
) -> Result<Option<User>, EshError> {
    use entities::user::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Username.eq(username))
        .one(db)
        .await?
        .map(|model| User {
            subject: model.subject,
            username: model.username,
            password_hash: model.password_hash,
            created_at: model.created_at,
            enabled: model.enabled,
        }))
}

/// Returns the user's subject when the password matches an enabled account.
pub async fn verify_user_password(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> Result<Option<String>, EshError> {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let user = match get_user_by_username(db, username).await? {
        Some(u) if u.enabled == 1 => u,
        _ => return Ok(None),
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| EshError::Other(format!("Invalid password hash: {}", e)))?;

    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
    {
        Ok(Some(user.subject))
    } else {
        Ok(None)
    }
}

// Browser session functions

pub async fn create_session(
    db: &DatabaseConnection,
    subject: &str,
    ttl_secs: i64,
    user_agent: Option<String>,
    ip_address: Option<String>,
) -> Result<Session, EshError> {
    let session_id = random_id();
    let now = Utc::now().timestamp();
    let expires_at = now + ttl_secs;

    let session = entities::session::ActiveModel {
        session_id: Set(session_id.clone()),
        subject: Set(subject.to_string()),
        auth_time: Set(now),
        created_at: Set(now),
        expires_at: Set(expires_at),
        user_agent: Set(user_agent.clone()),
        ip_address: Set(ip_address.clone()),
    };

    session.insert(db).await?;

    Ok(Session {
        session_id,
        subject: subject.to_string(),
        auth_time: now,
        created_at: now,
        expires_at,
        user_agent,
        ip_address,
    })
}

pub async fn get_session(
    db: &DatabaseConnection,
    session_id: &str,
) -> Result<Option<Session>, EshError> {
    use entities::session::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::SessionId.eq(session_id))
        .one(db)
        .await?
    {
        let now = Utc::now().timestamp();
        if now > model.expires_at {
            return Ok(None);
        }

        Ok(Some(Session {
            session_id: model.session_id,
            subject: model.subject,
            auth_time: model.auth_time,
            created_at: model.created_at,
            expires_at: model.expires_at,
            user_agent: model.user_agent,
            ip_address: model.ip_address,
        }))
    } else {
        Ok(None)
    }
}

pub async fn delete_session(db: &DatabaseConnection, session_id: &str) -> Result<(), EshError> {
    use entities::session::{Column, Entity};

    Entity::delete_many()
        .filter(Column::SessionId.eq(session_id))
        .exec(db)
        .await?;

    Ok(())
}

pub async fn cleanup_expired_sessions(db: &DatabaseConnection) -> Result<u64, EshError> {
    use entities::session::{Column, Entity};

    let now = Utc::now().timestamp();
    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

// API token functions

pub async fn create_api_token<C: ConnectionTrait>(
    conn: &C,
    input: NewApiToken,
    now: i64,
) -> Result<ApiToken, EshError> {
    let id = uuid::Uuid::new_v4().to_string();

    let token = entities::api_token::ActiveModel {
        id: Set(id.clone()),
        lookup_digest: Set(input.lookup_digest.clone()),
        verification_hash: Set(input.verification_hash.clone()),
        owner_subject: Set(input.owner_subject.clone()),
        display_name: Set(input.display_name.clone()),
        created_at: Set(now),
        expires_at: Set(input.expires_at),
        revoked: Set(0),
    };

    token.insert(conn).await?;

    Ok(ApiToken {
        id,
        lookup_digest: input.lookup_digest,
        verification_hash: input.verification_hash,
        owner_subject: input.owner_subject,
        display_name: input.display_name,
        created_at: now,
        expires_at: input.expires_at,
        revoked: 0,
    })
}

fn api_token_from_model(model: entities::api_token::Model) -> ApiToken {
    ApiToken {
        id: model.id,
        lookup_digest: model.lookup_digest,
        verification_hash: model.verification_hash,
        owner_subject: model.owner_subject,
        display_name: model.display_name,
        created_at: model.created_at,
        expires_at: model.expires_at,
        revoked: model.revoked,
    }
}

pub async fn get_api_token(db: &DatabaseConnection, id: &str) -> Result<Option<ApiToken>, EshError> {
    use entities::api_token::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Id.eq(id))
        .one(db)
        .await?
        .map(api_token_from_model))
}

/// Indexed lookup for inbound bearer requests. Callers still verify the slow hash.
pub async fn find_api_token_by_digest(
    db: &DatabaseConnection,
    lookup_digest: &str,
) -> Result<Option<ApiToken>, EshError> {
    use entities::api_token::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::LookupDigest.eq(lookup_digest))
        .one(db)
        .await?
        .map(api_token_from_model))
}

pub async fn count_api_tokens_for_owner(
    db: &DatabaseConnection,
    owner_subject: &str,
) -> Result<u64, EshError> {
    use entities::api_token::{Column, Entity};
    use sea_orm::PaginatorTrait;

    Ok(Entity::find()
        .filter(Column::OwnerSubject.eq(owner_subject))
        .count(db)
        .await?)
}

// Device session functions
//
// Every transition is a single conditional UPDATE keyed on the current status,
// so concurrent requests across processes cannot both win. Callers inspect the
// returned row count.

pub async fn create_device_session(
    db: &DatabaseConnection,
    input: NewDeviceSession,
    now: i64,
) -> Result<DeviceSession, EshError> {
    let device_code = generate_device_code();
    let expires_at = now + input.ttl_secs;

    let model = entities::device_session::ActiveModel {
        device_code: Set(device_code.clone()),
        status: Set(DeviceStatus::Pending.as_str().to_string()),
        created_at: Set(now),
        expires_at: Set(expires_at),
        requested_token_name: Set(input.requested_token_name.clone()),
        owner_subject: Set(None),
        sealed_ciphertext: Set(None),
        sealed_nonce: Set(None),
        sealed_tag: Set(None),
        bound_token_id: Set(None),
        client_ip: Set(input.client_ip.clone()),
        user_agent: Set(input.user_agent.clone()),
        approved_at: Set(None),
        consumed_at: Set(None),
    };

    model.insert(db).await?;

    Ok(DeviceSession {
        device_code,
        status: DeviceStatus::Pending,
        created_at: now,
        expires_at,
        requested_token_name: input.requested_token_name,
        owner_subject: None,
        sealed_ciphertext: None,
        sealed_nonce: None,
        sealed_tag: None,
        bound_token_id: None,
        client_ip: input.client_ip,
        user_agent: input.user_agent,
        approved_at: None,
        consumed_at: None,
    })
}

fn device_session_from_model(
    model: entities::device_session::Model,
) -> Result<DeviceSession, EshError> {
    let status = model.status.parse::<DeviceStatus>()?;
    Ok(DeviceSession {
        device_code: model.device_code,
        status,
        created_at: model.created_at,
        expires_at: model.expires_at,
        requested_token_name: model.requested_token_name,
        owner_subject: model.owner_subject,
        sealed_ciphertext: model.sealed_ciphertext,
        sealed_nonce: model.sealed_nonce,
        sealed_tag: model.sealed_tag,
        bound_token_id: model.bound_token_id,
        client_ip: model.client_ip,
        user_agent: model.user_agent,
        approved_at: model.approved_at,
        consumed_at: model.consumed_at,
    })
}

/// Raw read without expiry normalisation; see `device::inspect` for the lazy-expiry view.
pub async fn get_device_session(
    db: &DatabaseConnection,
    device_code: &str,
) -> Result<Option<DeviceSession>, EshError> {
    use entities::device_session::{Column, Entity};

    Entity::find()
        .filter(Column::DeviceCode.eq(device_code))
        .one(db)
        .await?
        .map(device_session_from_model)
        .transpose()
}

/// pending|approved -> expired for a session past its expiry; scrubs any sealed blob.
pub async fn mark_device_session_expired(
    db: &DatabaseConnection,
    device_code: &str,
    now: i64,
) -> Result<u64, EshError> {
    use entities::device_session::{Column, Entity};

    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(DeviceStatus::Expired.as_str()))
        .col_expr(Column::SealedCiphertext, Expr::value(Option::<String>::None))
        .col_expr(Column::SealedNonce, Expr::value(Option::<String>::None))
        .col_expr(Column::SealedTag, Expr::value(Option::<String>::None))
        .filter(Column::DeviceCode.eq(device_code))
        .filter(Column::Status.is_in([
            DeviceStatus::Pending.as_str(),
            DeviceStatus::Approved.as_str(),
        ]))
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

/// approved -> expired regardless of `expires_at`, dropping a sealed blob that
/// failed to open. Later polls see `expired` instead of retrying the unseal.
pub async fn quarantine_device_session(
    db: &DatabaseConnection,
    device_code: &str,
) -> Result<u64, EshError> {
    use entities::device_session::{Column, Entity};

    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(DeviceStatus::Expired.as_str()))
        .col_expr(Column::SealedCiphertext, Expr::value(Option::<String>::None))
        .col_expr(Column::SealedNonce, Expr::value(Option::<String>::None))
        .col_expr(Column::SealedTag, Expr::value(Option::<String>::None))
        .filter(Column::DeviceCode.eq(device_code))
        .filter(Column::Status.eq(DeviceStatus::Approved.as_str()))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

/// pending -> approved, storing the sealed credential and its token id.
pub async fn approve_device_session<C: ConnectionTrait>(
    conn: &C,
    device_code: &str,
    owner_subject: &str,
    token_id: &str,
    sealed: (String, String, String),
    now: i64,
) -> Result<u64, EshError> {
    use entities::device_session::{Column, Entity};

    let (ciphertext, nonce, tag) = sealed;
    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(DeviceStatus::Approved.as_str()))
        .col_expr(Column::OwnerSubject, Expr::value(owner_subject))
        .col_expr(Column::BoundTokenId, Expr::value(token_id))
        .col_expr(Column::SealedCiphertext, Expr::value(ciphertext))
        .col_expr(Column::SealedNonce, Expr::value(nonce))
        .col_expr(Column::SealedTag, Expr::value(tag))
        .col_expr(Column::ApprovedAt, Expr::value(now))
        .filter(Column::DeviceCode.eq(device_code))
        .filter(Column::Status.eq(DeviceStatus::Pending.as_str()))
        .filter(Column::ExpiresAt.gte(now))
        .exec(conn)
        .await?;

    Ok(result.rows_affected)
}

/// approved -> consumed, clearing the sealed credential in the same statement.
pub async fn consume_device_session(
    db: &DatabaseConnection,
    device_code: &str,
    now: i64,
) -> Result<u64, EshError> {
    use entities::device_session::{Column, Entity};

    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(DeviceStatus::Consumed.as_str()))
        .col_expr(Column::SealedCiphertext, Expr::value(Option::<String>::None))
        .col_expr(Column::SealedNonce, Expr::value(Option::<String>::None))
        .col_expr(Column::SealedTag, Expr::value(Option::<String>::None))
        .col_expr(Column::ConsumedAt, Expr::value(now))
        .filter(Column::DeviceCode.eq(device_code))
        .filter(Column::Status.eq(DeviceStatus::Approved.as_str()))
        .filter(Column::ExpiresAt.gte(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

/// pending -> cancelled when the browser user denies the request.
pub async fn cancel_device_session(
    db: &DatabaseConnection,
    device_code: &str,
    owner_subject: &str,
    now: i64,
) -> Result<u64, EshError> {
    use entities::device_session::{Column, Entity};

    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(DeviceStatus::Cancelled.as_str()))
        .col_expr(Column::OwnerSubject, Expr::value(owner_subject))
        .filter(Column::DeviceCode.eq(device_code))
        .filter(Column::Status.eq(DeviceStatus::Pending.as_str()))
        .filter(Column::ExpiresAt.gte(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

/// Expire stale sessions in bulk and delete rows past the retention window.
pub async fn cleanup_expired_device_sessions(
    db: &DatabaseConnection,
    now: i64,
) -> Result<u64, EshError> {
    use entities::device_session::{Column, Entity};

    let expired = Entity::update_many()
        .col_expr(Column::Status, Expr::value(DeviceStatus::Expired.as_str()))
        .col_expr(Column::SealedCiphertext, Expr::value(Option::<String>::None))
        .col_expr(Column::SealedNonce, Expr::value(Option::<String>::None))
        .col_expr(Column::SealedTag, Expr::value(Option::<String>::None))
        .filter(Column::Status.is_in([
            DeviceStatus::Pending.as_str(),
            DeviceStatus::Approved.as_str(),
        ]))
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    let deleted = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now - DEVICE_SESSION_RETENTION_SECS))
        .exec(db)
        .await?;

    Ok(expired.rows_affected + deleted.rows_affected)
}

// Security event functions

pub async fn insert_security_event(
    db: &DatabaseConnection,
    input: NewSecurityEvent,
) -> Result<(), EshError> {
    let now = Utc::now().timestamp();
    let metadata = serde_json::to_string(&input.metadata)?;

    let event = entities::security_event::ActiveModel {
        event: Set(input.event),
        severity: Set(input.severity),
        subject: Set(input.subject),
        device_code: Set(input.device_code),
        client_id: Set(input.client_id),
        metadata: Set(metadata),
        created_at: Set(now),
        ..Default::default()
    };

    event.insert(db).await?;
    Ok(())
}

pub async fn get_security_events_for_device(
    db: &DatabaseConnection,
    device_code: &str,
) -> Result<Vec<SecurityEvent>, EshError> {
    use entities::security_event::{Column, Entity};

    let models = Entity::find()
        .filter(Column::DeviceCode.eq(device_code))
        .order_by_asc(Column::Id)
        .all(db)
        .await?;

    models
        .into_iter()
        .map(|m| {
            Ok(SecurityEvent {
                id: m.id,
                event: m.event,
                severity: m.severity,
                subject: m.subject,
                device_code: m.device_code,
                client_id: m.client_id,
                metadata: serde_json::from_str(&m.metadata)?,
                created_at: m.created_at,
            })
        })
        .collect()
}

/// Delete security events older than the retention period.
pub async fn prune_security_events(db: &DatabaseConnection, now: i64) -> Result<u64, EshError> {
    use entities::security_event::{Column, Entity};

    let result = Entity::delete_many()
        .filter(Column::CreatedAt.lt(now - SECURITY_EVENT_RETENTION_SECS))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}
