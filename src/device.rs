//! Device session state machine.
//!
//! A device session moves `pending -> approved -> consumed`, or leaves
//! `pending` for `expired`/`cancelled`. Every transition is a conditional write
//! in [`crate::storage`]; the functions here decide which write to attempt and
//! how to report the result when a concurrent request got there first.
//!
//! All operations take an explicit `now` (unix seconds).

use crate::cipher::{EnvelopeCipher, SealedBlob};
use crate::errors::EshError;
use crate::storage::{self, DeviceSession, NewApiToken, NewDeviceSession};
use crate::token;
use sea_orm::{DatabaseConnection, TransactionTrait};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    Pending,
    Approved,
    Expired,
    Consumed,
    Cancelled,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Pending => "pending",
            DeviceStatus::Approved => "approved",
            DeviceStatus::Expired => "expired",
            DeviceStatus::Consumed => "consumed",
            DeviceStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeviceStatus::Expired | DeviceStatus::Consumed | DeviceStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: DeviceStatus) -> bool {
        use DeviceStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Expired)
                | (Pending, Cancelled)
                | (Approved, Consumed)
                | (Approved, Expired)
        )
    }

    fn ensure_transition(&self, next: DeviceStatus) -> Result<(), EshError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(EshError::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = EshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeviceStatus::Pending),
            "approved" => Ok(DeviceStatus::Approved),
            "expired" => Ok(DeviceStatus::Expired),
            "consumed" => Ok(DeviceStatus::Consumed),
            "cancelled" => Ok(DeviceStatus::Cancelled),
            other => Err(EshError::Other(format!("unknown device status `{}`", other))),
        }
    }
}

/// Label used when the client does not ask for one.
pub const DEFAULT_TOKEN_NAME: &str = "CLI";

/// Length of a base64url-encoded 32-byte device code.
pub const DEVICE_CODE_LENGTH: usize = 43;

/// Reject anything that could not have been issued by `create`.
pub fn validate_device_code(code: &str) -> Result<(), EshError> {
    let well_formed = code.len() == DEVICE_CODE_LENGTH
        && code
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if well_formed {
        Ok(())
    } else {
        Err(EshError::Validation("malformed device code".to_string()))
    }
}

/// Trim and bound the requested token label. Empty or missing falls back to the default.
pub fn validate_token_name(name: Option<&str>, max_len: usize) -> Result<String, EshError> {
    let trimmed = name.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Ok(DEFAULT_TOKEN_NAME.to_string());
    }
    if trimmed.chars().count() > max_len {
        return Err(EshError::Validation(format!(
            "token name must be at most {} characters",
            max_len
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(EshError::Validation(
            "token name must not contain control characters".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone)]
pub struct CreateDeviceSession {
    pub token_name: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub ttl_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApproveOutcome {
    /// This call minted the credential.
    Approved { token_id: String },
    /// The same owner approved earlier; nothing new was minted.
    AlreadyApproved { token_id: Option<String> },
}

/// The plaintext credential handed to the polling client exactly once.
#[derive(Clone, PartialEq, Eq)]
pub struct DeliveredCredential {
    pub plaintext: String,
    pub token_id: String,
    pub token_name: String,
    pub owner_subject: String,
    pub expires_at: i64,
}

impl fmt::Debug for DeliveredCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveredCredential")
            .field("token_id", &self.token_id)
            .field("token_name", &self.token_name)
            .field("owner_subject", &self.owner_subject)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Pending,
    Expired,
    Delivered(DeliveredCredential),
}

pub async fn create(
    db: &DatabaseConnection,
    input: CreateDeviceSession,
    now: i64,
) -> Result<DeviceSession, EshError> {
    let session = storage::create_device_session(
        db,
        NewDeviceSession {
            requested_token_name: input.token_name,
            client_ip: input.client_ip,
            user_agent: input.user_agent,
            ttl_secs: input.ttl_secs,
        },
        now,
    )
    .await?;

    tracing::debug!(expires_at = session.expires_at, "Created device session");
    Ok(session)
}

/// Read a session with lazy expiry applied.
pub async fn inspect(
    db: &DatabaseConnection,
    device_code: &str,
    now: i64,
) -> Result<Option<DeviceSession>, EshError> {
    let Some(session) = storage::get_device_session(db, device_code).await? else {
        return Ok(None);
    };

    if session.status.is_terminal() || !session.is_expired_at(now) {
        return Ok(Some(session));
    }

    session.status.ensure_transition(DeviceStatus::Expired)?;
    let rows = storage::mark_device_session_expired(db, device_code, now).await?;
    if rows > 0 {
        tracing::debug!(from = %session.status, "Device session expired");
    }

    // Re-read either way: a concurrent writer may have moved it first
    storage::get_device_session(db, device_code).await
}

fn already_approved(session: &DeviceSession, owner_subject: &str) -> Result<ApproveOutcome, EshError> {
    if session.owner_subject.as_deref() == Some(owner_subject) {
        Ok(ApproveOutcome::AlreadyApproved {
            token_id: session.bound_token_id.clone(),
        })
    } else {
        Err(EshError::Conflict(
            "device code was approved by another user".to_string(),
        ))
    }
}

/// Mint a credential for `owner_subject`, seal it and bind it to the session.
///
/// The token row and the `pending -> approved` write share one transaction; if
/// the conditional write loses, the token row is rolled back with it.
pub async fn approve(
    db: &DatabaseConnection,
    cipher: &EnvelopeCipher,
    device_code: &str,
    owner_subject: &str,
    token_ttl_secs: i64,
    now: i64,
) -> Result<ApproveOutcome, EshError> {
    let session = inspect(db, device_code, now)
        .await?
        .ok_or(EshError::NotFound)?;

    match session.status {
        DeviceStatus::Pending => {}
        DeviceStatus::Approved | DeviceStatus::Consumed => {
            return already_approved(&session, owner_subject)
        }
        DeviceStatus::Expired | DeviceStatus::Cancelled => return Err(EshError::Expired),
    }

    let minted = token::mint()?;
    let sealed = cipher.seal(&minted.plaintext)?;

    let txn = db.begin().await?;
    let api_token = storage::create_api_token(
        &txn,
        NewApiToken {
            lookup_digest: minted.lookup_digest,
            verification_hash: minted.verification_hash,
            owner_subject: owner_subject.to_string(),
            display_name: session.requested_token_name.clone(),
            expires_at: now + token_ttl_secs,
        },
        now,
    )
    .await?;

    let rows = storage::approve_device_session(
        &txn,
        device_code,
        owner_subject,
        &api_token.id,
        sealed.to_columns(),
        now,
    )
    .await?;

    if rows == 1 {
        txn.commit().await?;
        return Ok(ApproveOutcome::Approved {
            token_id: api_token.id,
        });
    }

    txn.rollback().await?;
    tracing::debug!("Lost approve race, reporting current state");

    let current = inspect(db, device_code, now)
        .await?
        .ok_or(EshError::NotFound)?;
    match current.status {
        DeviceStatus::Approved | DeviceStatus::Consumed => already_approved(&current, owner_subject),
        DeviceStatus::Expired | DeviceStatus::Cancelled => Err(EshError::Expired),
        DeviceStatus::Pending => Err(EshError::Other(
            "conditional approve matched no rows on a pending session".to_string(),
        )),
    }
}

/// Hand the credential out at most once.
///
/// The blob is unsealed before the `approved -> consumed` write. If it does not
/// open, the session is expired and scrubbed so the failure is reported once
/// and later polls see `Expired`.
pub async fn consume(
    db: &DatabaseConnection,
    cipher: &EnvelopeCipher,
    device_code: &str,
    now: i64,
) -> Result<ConsumeOutcome, EshError> {
    let Some(session) = inspect(db, device_code, now).await? else {
        return Ok(ConsumeOutcome::Expired);
    };

    match session.status {
        DeviceStatus::Pending | DeviceStatus::Consumed => return Ok(ConsumeOutcome::Pending),
        DeviceStatus::Expired | DeviceStatus::Cancelled => return Ok(ConsumeOutcome::Expired),
        DeviceStatus::Approved => {}
    }

    let plaintext = match unseal_stored(cipher, &session) {
        Ok(plaintext) => plaintext,
        Err(EshError::Integrity) => return quarantine(db, device_code).await,
        Err(e) => return Err(e),
    };

    let api_token = match session.bound_token_id.as_deref() {
        Some(token_id) => storage::get_api_token(db, token_id).await?,
        None => None,
    };
    let Some(api_token) = api_token else {
        return quarantine(db, device_code).await;
    };

    let rows = storage::consume_device_session(db, device_code, now).await?;
    if rows == 0 {
        // Another poller won, or the session expired in between
        return Ok(ConsumeOutcome::Pending);
    }

    Ok(ConsumeOutcome::Delivered(DeliveredCredential {
        plaintext,
        token_id: api_token.id,
        token_name: api_token.display_name,
        owner_subject: api_token.owner_subject,
        expires_at: api_token.expires_at,
    }))
}

fn unseal_stored(cipher: &EnvelopeCipher, session: &DeviceSession) -> Result<String, EshError> {
    match (
        session.sealed_ciphertext.as_deref(),
        session.sealed_nonce.as_deref(),
        session.sealed_tag.as_deref(),
    ) {
        (Some(ct), Some(nonce), Some(tag)) => cipher.unseal(&SealedBlob::from_columns(ct, nonce, tag)?),
        _ => Err(EshError::Integrity),
    }
}

/// Retire an approved session whose credential can no longer be delivered.
/// Only the caller whose write takes effect sees `Integrity`.
async fn quarantine(
    db: &DatabaseConnection,
    device_code: &str,
) -> Result<ConsumeOutcome, EshError> {
    if storage::quarantine_device_session(db, device_code).await? == 0 {
        let current = storage::get_device_session(db, device_code).await?;
        return Ok(match current.map(|s| s.status) {
            Some(DeviceStatus::Consumed) => ConsumeOutcome::Pending,
            _ => ConsumeOutcome::Expired,
        });
    }

    tracing::error!("Sealed credential failed integrity check, session expired");
    Err(EshError::Integrity)
}

/// The browser user declined the request.
pub async fn cancel(
    db: &DatabaseConnection,
    device_code: &str,
    owner_subject: &str,
    now: i64,
) -> Result<(), EshError> {
    let session = inspect(db, device_code, now)
        .await?
        .ok_or(EshError::NotFound)?;

    match session.status {
        DeviceStatus::Expired | DeviceStatus::Cancelled => return Err(EshError::Expired),
        status => status.ensure_transition(DeviceStatus::Cancelled)?,
    }

    let rows = storage::cancel_device_session(db, device_code, owner_subject, now).await?;
    if rows == 1 {
        return Ok(());
    }

    let current = inspect(db, device_code, now)
        .await?
        .ok_or(EshError::NotFound)?;
    match current.status {
        DeviceStatus::Cancelled | DeviceStatus::Expired => Err(EshError::Expired),
        status => Err(EshError::InvalidTransition {
            from: status.as_str().to_string(),
            to: DeviceStatus::Cancelled.as_str().to_string(),
        }),
    }
}
