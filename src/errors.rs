use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EshError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(esh::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(
        code(esh::config),
        help("Check config.toml and the ESH__* / ESH_ENCRYPTION_KEY environment variables")
    )]
    Config(String),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(esh::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(esh::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Invalid request: {0}")]
    #[diagnostic(code(esh::validation))]
    Validation(String),

    #[error("Authentication required: {0}")]
    #[diagnostic(code(esh::auth))]
    Auth(String),

    #[error("Device code not found")]
    #[diagnostic(code(esh::not_found))]
    NotFound,

    #[error("Device code expired")]
    #[diagnostic(code(esh::expired))]
    Expired,

    #[error("Conflict: {0}")]
    #[diagnostic(code(esh::conflict))]
    Conflict(String),

    #[error("Invalid transition from `{from}` to `{to}`")]
    #[diagnostic(code(esh::invalid_transition))]
    InvalidTransition { from: String, to: String },

    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    #[diagnostic(code(esh::rate_limited))]
    RateLimited { retry_after_secs: u64 },

    #[error("Sealed credential failed integrity check")]
    #[diagnostic(code(esh::integrity))]
    Integrity,

    #[error("{0}")]
    #[diagnostic(code(esh::other))]
    Other(String),
}

impl From<config::ConfigError> for EshError {
    fn from(value: config::ConfigError) -> Self {
        EshError::Config(value.to_string())
    }
}

impl EshError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EshError::Validation(_) | EshError::NotFound | EshError::Expired => {
                StatusCode::BAD_REQUEST
            }
            EshError::Auth(_) => StatusCode::UNAUTHORIZED,
            EshError::Conflict(_) => StatusCode::CONFLICT,
            EshError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code used in JSON error bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            EshError::Validation(_) => "invalid_request",
            EshError::Auth(_) => "unauthenticated",
            EshError::NotFound => "not_found",
            EshError::Expired => "expired",
            EshError::Conflict(_) => "conflict",
            EshError::RateLimited { .. } => "rate_limited",
            _ => "server_error",
        }
    }
}

impl IntoResponse for EshError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal failures are logged by the caller; the body stays generic.
        let description = if status.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        let mut body = json!({
            "error": self.error_code(),
            "error_description": description,
        });

        let retry_after = match &self {
            EshError::RateLimited { retry_after_secs } => {
                body["retry_after"] = json!(retry_after_secs);
                Some(*retry_after_secs)
            }
            _ => None,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
