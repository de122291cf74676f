//! Security audit sink.
//!
//! Every event is emitted on the `security` tracing target and persisted to the
//! `security_events` table. Persistence failures are logged and swallowed so an
//! audit outage never changes the outcome of the request that produced it.

use crate::storage::{self, NewSecurityEvent};
use sea_orm::DatabaseConnection;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEventKind {
    DeviceStarted,
    DeviceApproved,
    TokenDelivered,
    DeviceCancelled,
    IntegrityFailure,
    RateLimitExceeded,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::DeviceStarted => "device.started",
            SecurityEventKind::DeviceApproved => "device.approved",
            SecurityEventKind::TokenDelivered => "device.token_delivered",
            SecurityEventKind::DeviceCancelled => "device.cancelled",
            SecurityEventKind::IntegrityFailure => "device.integrity_failure",
            SecurityEventKind::RateLimitExceeded => "rate_limit.exceeded",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SecurityEventKind::DeviceStarted | SecurityEventKind::DeviceCancelled => {
                Severity::Info
            }
            SecurityEventKind::DeviceApproved
            | SecurityEventKind::TokenDelivered
            | SecurityEventKind::RateLimitExceeded => Severity::Warning,
            SecurityEventKind::IntegrityFailure => Severity::Critical,
        }
    }
}

/// Who and what an event is about. Never carries credential material.
#[derive(Debug, Clone, Default)]
pub struct AuditContext<'a> {
    pub subject: Option<&'a str>,
    pub device_code: Option<&'a str>,
    pub client_id: Option<&'a str>,
}

pub async fn record(
    db: &DatabaseConnection,
    kind: SecurityEventKind,
    ctx: AuditContext<'_>,
    metadata: Value,
) {
    let severity = kind.severity();
    let subject = ctx.subject.unwrap_or("-");
    let device_code = ctx.device_code.unwrap_or("-");
    let client_id = ctx.client_id.unwrap_or("-");

    match severity {
        Severity::Info => tracing::info!(
            target: "security",
            event = kind.as_str(),
            subject,
            device_code,
            client_id,
            %metadata,
            "security event"
        ),
        Severity::Warning => tracing::warn!(
            target: "security",
            event = kind.as_str(),
            subject,
            device_code,
            client_id,
            %metadata,
            "security event"
        ),
        Severity::Critical => tracing::error!(
            target: "security",
            event = kind.as_str(),
            subject,
            device_code,
            client_id,
            %metadata,
            "security event"
        ),
    }

    let event = NewSecurityEvent {
        event: kind.as_str().to_string(),
        severity: severity.as_str().to_string(),
        subject: ctx.subject.map(str::to_string),
        device_code: ctx.device_code.map(str::to_string),
        client_id: ctx.client_id.map(str::to_string),
        metadata,
    };

    if let Err(e) = storage::insert_security_event(db, event).await {
        tracing::error!(error = %e, event = kind.as_str(), "Failed to persist security event");
    }
}
