//! HTTP surface: the three device endpoints used by the CLI plus the small
//! browser flow (login, approval page) that a signed-in user goes through.
use crate::audit::{self, AuditContext, SecurityEventKind};
use crate::cipher::EnvelopeCipher;
use crate::device::{self, ApproveOutcome, ConsumeOutcome, CreateDeviceSession};
use crate::errors::EshError;
use crate::rate_limit::RateLimiter;
use crate::session::SessionCookie;
use crate::settings::Settings;
use crate::storage;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Form, FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
    pub cipher: Arc<EnvelopeCipher>,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(settings: Settings, db: DatabaseConnection, cipher: EnvelopeCipher) -> Self {
        let limiter = RateLimiter::from_settings(&settings.rate_limit);
        Self {
            settings: Arc::new(settings),
            db,
            cipher: Arc::new(cipher),
            limiter,
        }
    }
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    // X-Frame-Options: Prevent clickjacking of the approval page
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );

    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    // No scripts are served at all
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static(
            "default-src 'none'; style-src 'unsafe-inline'; form-action 'self'; frame-ancestors 'none'",
        ),
    );

    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );

    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        // CLI device login
        .route("/device/start", post(device_start))
        .route("/device/approve", post(device_approve))
        .route("/device/poll", get(device_poll))
        // Browser side
        .route("/device", get(device_page))
        .route("/device/confirm", post(device_confirm))
        .route("/login", get(login_page).post(login_submit))
        .route("/logout", get(logout))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState) -> miette::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let app = router(state.clone());

    tracing::info!(%addr, base_url = %state.settings.public_base_url(), "Listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .into_diagnostic()?;
    Ok(())
}

/// Best-effort identifier of the calling client for rate limiting and audit.
///
/// Prefers the first `X-Forwarded-For` hop, then `X-Real-IP`, then the socket
/// peer. Deployments must strip these headers at the edge for the value to mean
/// anything.
#[derive(Debug, Clone)]
pub struct ClientIdentity(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientIdentity(client_identifier(&parts.headers, peer)))
    }
}

fn client_identifier(headers: &HeaderMap, peer: Option<String>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or("").trim().to_string())
            .filter(|s| !s.is_empty())
    };

    header_value("x-forwarded-for")
        .or_else(|| header_value("x-real-ip"))
        .or(peer)
        .unwrap_or_else(|| "unknown".to_string())
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(String::from)
}

/// Enforce the per-operation window. Only the first rejection after an admit is audited.
async fn check_rate_limit(
    state: &AppState,
    operation: &str,
    client_id: &str,
) -> Result<(), EshError> {
    let key = format!("{}:{}", operation, client_id);
    if let Err(rejection) = state.limiter.check(&key) {
        if rejection.first_since_admit {
            audit::record(
                &state.db,
                SecurityEventKind::RateLimitExceeded,
                AuditContext {
                    client_id: Some(client_id),
                    ..Default::default()
                },
                json!({ "operation": operation }),
            )
            .await;
        }
        return Err(rejection.into());
    }
    Ok(())
}

/// Resolve the browser session from the cookie. Bearer credentials are never accepted here.
async fn require_browser_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<storage::Session, EshError> {
    if headers.contains_key(header::AUTHORIZATION) {
        return Err(EshError::Auth(
            "approval requires a browser session".to_string(),
        ));
    }

    let cookie = SessionCookie::from_headers(headers)
        .ok_or_else(|| EshError::Auth("not signed in".to_string()))?;

    storage::get_session(&state.db, &cookie.session_id)
        .await?
        .ok_or_else(|| EshError::Auth("session expired".to_string()))
}

fn parse_json_body<T: serde::de::DeserializeOwned + Default>(body: &Bytes) -> Result<T, EshError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| EshError::Validation(format!("invalid JSON body: {}", e)))
}

/// Log internal failures before they are flattened into a generic 500 body.
fn log_internal(operation: &str, err: &EshError) {
    if err.status_code().is_server_error() {
        tracing::error!(operation, error = %err, "Request failed");
    }
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// Device endpoints (CLI)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    token_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    device_code: String,
    verification_url: String,
    expires_at: i64,
    poll_interval_seconds: i64,
    token_name: String,
}

/// POST /device/start
async fn device_start(
    State(state): State<AppState>,
    ClientIdentity(client_id): ClientIdentity,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StartResponse>, EshError> {
    let req: StartRequest = parse_json_body(&body)?;
    let token_name = device::validate_token_name(
        req.token_name.as_deref(),
        state.settings.device.max_token_name_len,
    )?;

    check_rate_limit(&state, "start", &client_id).await?;

    let session = device::create(
        &state.db,
        CreateDeviceSession {
            token_name,
            client_ip: Some(client_id.clone()),
            user_agent: user_agent(&headers),
            ttl_secs: state.settings.device.session_ttl_secs,
        },
        Utc::now().timestamp(),
    )
    .await
    .inspect_err(|e| log_internal("start", e))?;

    audit::record(
        &state.db,
        SecurityEventKind::DeviceStarted,
        AuditContext {
            device_code: Some(&session.device_code),
            client_id: Some(&client_id),
            ..Default::default()
        },
        json!({ "token_name": session.requested_token_name }),
    )
    .await;

    Ok(Json(StartResponse {
        verification_url: state.settings.verification_url(&session.device_code),
        device_code: session.device_code,
        expires_at: session.expires_at,
        poll_interval_seconds: state.settings.device.poll_interval_secs,
        token_name: session.requested_token_name,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveRequest {
    #[serde(default)]
    device_code: String,
}

/// Shared by the JSON endpoint and the approval form.
async fn approve_for_session(
    state: &AppState,
    session: &storage::Session,
    device_code: &str,
    client_id: &str,
) -> Result<ApproveOutcome, EshError> {
    let token_ttl_secs = state.settings.device.token_ttl_days * 24 * 3600;
    let outcome = device::approve(
        &state.db,
        &state.cipher,
        device_code,
        &session.subject,
        token_ttl_secs,
        Utc::now().timestamp(),
    )
    .await
    .inspect_err(|e| log_internal("approve", e))?;

    if let ApproveOutcome::Approved { token_id } = &outcome {
        audit::record(
            &state.db,
            SecurityEventKind::DeviceApproved,
            AuditContext {
                subject: Some(&session.subject),
                device_code: Some(device_code),
                client_id: Some(client_id),
            },
            json!({ "token_id": token_id }),
        )
        .await;
    }

    Ok(outcome)
}

/// POST /device/approve
async fn device_approve(
    State(state): State<AppState>,
    ClientIdentity(client_id): ClientIdentity,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, EshError> {
    if headers.contains_key(header::AUTHORIZATION) {
        return Err(EshError::Auth(
            "approval requires a browser session".to_string(),
        ));
    }

    let req: ApproveRequest = parse_json_body(&body)?;
    device::validate_device_code(&req.device_code)?;

    check_rate_limit(&state, "approve", &client_id).await?;

    let session = require_browser_session(&state, &headers).await?;
    approve_for_session(&state, &session, &req.device_code, &client_id).await?;

    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollQuery {
    device_code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
enum PollResponse {
    Pending,
    Approved {
        token: String,
        token_id: String,
        token_name: String,
        expires_at: i64,
    },
    Expired,
}

/// GET /device/poll
async fn device_poll(
    State(state): State<AppState>,
    ClientIdentity(client_id): ClientIdentity,
    Query(query): Query<PollQuery>,
) -> Response {
    let mut response = match poll_inner(&state, &client_id, query).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    response
}

async fn poll_inner(
    state: &AppState,
    client_id: &str,
    query: PollQuery,
) -> Result<Response, EshError> {
    let device_code = query.device_code.unwrap_or_default();
    device::validate_device_code(&device_code)?;

    check_rate_limit(state, "poll", client_id).await?;

    let outcome = device::consume(
        &state.db,
        &state.cipher,
        &device_code,
        Utc::now().timestamp(),
    )
    .await;

    match outcome {
        Ok(ConsumeOutcome::Pending) => Ok(Json(PollResponse::Pending).into_response()),
        Ok(ConsumeOutcome::Expired) => {
            Ok((StatusCode::GONE, Json(PollResponse::Expired)).into_response())
        }
        Ok(ConsumeOutcome::Delivered(credential)) => {
            audit::record(
                &state.db,
                SecurityEventKind::TokenDelivered,
                AuditContext {
                    subject: Some(&credential.owner_subject),
                    device_code: Some(&device_code),
                    client_id: Some(client_id),
                },
                json!({ "token_id": credential.token_id }),
            )
            .await;

            Ok(Json(PollResponse::Approved {
                token: credential.plaintext,
                token_id: credential.token_id,
                token_name: credential.token_name,
                expires_at: credential.expires_at,
            })
            .into_response())
        }
        Err(EshError::Integrity) => {
            audit::record(
                &state.db,
                SecurityEventKind::IntegrityFailure,
                AuditContext {
                    device_code: Some(&device_code),
                    client_id: Some(client_id),
                    ..Default::default()
                },
                json!({}),
            )
            .await;
            Err(EshError::Integrity)
        }
        Err(e) => {
            log_internal("poll", &e);
            Err(e)
        }
    }
}

// ============================================================================
// Browser pages
// ============================================================================

const PAGE_STYLE: &str = r#"
        body { font-family: sans-serif; max-width: 600px; margin: 50px auto; padding: 20px; }
        .container { background: #f5f5f5; padding: 30px; border-radius: 8px; }
        h1 { margin-top: 0; }
        label { display: block; margin-top: 10px; }
        input[type="text"], input[type="password"] { width: 100%; padding: 8px; margin-top: 5px; box-sizing: border-box; }
        .details { background: white; padding: 15px; border-radius: 4px; margin: 20px 0; }
        .details dt { font-weight: bold; margin-top: 10px; }
        .details dd { margin-left: 0; color: #555; word-break: break-all; }
        .warning { background: #fff3cd; border-left: 4px solid #ffc107; padding: 15px; margin-bottom: 20px; }
        .error { color: #721c24; }
        .buttons { display: flex; gap: 10px; margin-top: 20px; }
        button { flex: 1; padding: 12px; font-size: 16px; border: none; border-radius: 4px; cursor: pointer; background: #007bff; color: white; }
        .approve { background: #28a745; }
        .deny { background: #dc3545; }
"#;

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} - esh</title>
    <style>{PAGE_STYLE}</style>
</head>
<body>
    <div class="container">
        <h1>{title}</h1>
        {body}
    </div>
</body>
</html>"#,
        title = html_escape(title),
    )
}

fn message_page(status: StatusCode, title: &str, message: &str) -> Response {
    let body = format!("<p>{}</p>", html_escape(message));
    (status, Html(page(title, &body))).into_response()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Only same-origin absolute paths are honoured as post-login destinations.
fn safe_return_to(return_to: Option<&str>) -> String {
    match return_to {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

fn login_redirect(return_to: &str) -> Response {
    Redirect::to(&format!(
        "/login?return_to={}",
        urlencoding::encode(return_to)
    ))
    .into_response()
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let signed_in = match SessionCookie::from_headers(&headers) {
        Some(cookie) => matches!(
            storage::get_session(&state.db, &cookie.session_id).await,
            Ok(Some(_))
        ),
        None => false,
    };

    if signed_in {
        message_page(
            StatusCode::OK,
            "Signed in",
            "Open the link printed by `esh login` to approve a device.",
        )
    } else {
        login_redirect("/")
    }
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    return_to: Option<String>,
    error: Option<String>,
}

async fn login_page(Query(q): Query<LoginQuery>) -> impl IntoResponse {
    let error_html = q
        .error
        .map(|err| format!("<p class=\"error\">{}</p>", html_escape(&err)))
        .unwrap_or_default();
    let return_to = html_escape(&safe_return_to(q.return_to.as_deref()));

    let body = format!(
        r#"{error_html}
        <form method="POST" action="/login">
            <input type="hidden" name="return_to" value="{return_to}">
            <label>
                Username:
                <input type="text" name="username" autocomplete="username" required autofocus>
            </label>
            <label>
                Password:
                <input type="password" name="password" autocomplete="current-password" required>
            </label>
            <div class="buttons"><button type="submit">Sign in</button></div>
        </form>"#
    );

    Html(page("Sign in", &body))
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
    return_to: Option<String>,
}

async fn login_submit(
    State(state): State<AppState>,
    ClientIdentity(client_id): ClientIdentity,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let return_to = safe_return_to(form.return_to.as_deref());
    let retry = |error: &str| {
        Redirect::to(&format!(
            "/login?error={}&return_to={}",
            urlencoding::encode(error),
            urlencoding::encode(&return_to)
        ))
        .into_response()
    };

    if let Err(e) = check_rate_limit(&state, "login", &client_id).await {
        return e.into_response();
    }

    let subject =
        match storage::verify_user_password(&state.db, &form.username, &form.password).await {
            Ok(Some(sub)) => sub,
            Ok(None) => return retry("Invalid username or password"),
            Err(e) => {
                log_internal("login", &e);
                return retry("Sign in failed, try again");
            }
        };

    let session = match storage::create_session(
        &state.db,
        &subject,
        state.settings.session.ttl_secs,
        user_agent(&headers),
        Some(client_id),
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            log_internal("login", &e);
            return retry("Failed to create session");
        }
    };

    let cookie_header = SessionCookie::new(session.session_id).to_cookie_header(&state.settings);

    let mut response = Redirect::to(&return_to).into_response();
    match HeaderValue::from_str(&cookie_header) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
            response
        }
        Err(_) => retry("Failed to create session"),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(cookie) = SessionCookie::from_headers(&headers) {
        if let Err(e) = storage::delete_session(&state.db, &cookie.session_id).await {
            tracing::warn!(error = %e, "Failed to delete session on logout");
        }
    }

    let mut response = Redirect::to("/login").into_response();
    if let Ok(value) = HeaderValue::from_str(&SessionCookie::delete_cookie_header()) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

#[derive(Debug, Deserialize)]
struct DevicePageQuery {
    code: Option<String>,
}

/// GET /device?code= - approval page
async fn device_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DevicePageQuery>,
) -> Response {
    let code = query.code.unwrap_or_default();

    let session = match SessionCookie::from_headers(&headers) {
        Some(cookie) => storage::get_session(&state.db, &cookie.session_id)
            .await
            .ok()
            .flatten(),
        None => None,
    };
    if session.is_none() {
        let return_to = format!("/device?code={}", urlencoding::encode(&code));
        return login_redirect(&return_to);
    }

    if device::validate_device_code(&code).is_err() {
        return message_page(
            StatusCode::BAD_REQUEST,
            "Invalid link",
            "This device login link is malformed. Run `esh login` again.",
        );
    }

    let device_session = match device::inspect(&state.db, &code, Utc::now().timestamp()).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            return message_page(
                StatusCode::NOT_FOUND,
                "Unknown request",
                "This device login request does not exist. Run `esh login` again.",
            )
        }
        Err(e) => {
            log_internal("device_page", &e);
            return message_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong",
                "Try again in a moment.",
            );
        }
    };

    match device_session.status {
        device::DeviceStatus::Pending => {}
        device::DeviceStatus::Approved | device::DeviceStatus::Consumed => {
            return message_page(
                StatusCode::OK,
                "Already approved",
                "This request has already been approved. Return to your terminal.",
            )
        }
        device::DeviceStatus::Expired | device::DeviceStatus::Cancelled => {
            return message_page(
                StatusCode::GONE,
                "Request expired",
                "This request has expired or was denied. Run `esh login` again.",
            )
        }
    }

    let expires_in_min = ((device_session.expires_at - Utc::now().timestamp()).max(0) + 59) / 60;
    let code_escaped = html_escape(&code);
    let body = format!(
        r#"<div class="warning">
            <strong>Only approve if you just ran <code>esh login</code>.</strong>
            Approving gives that terminal an API token for your account.
        </div>
        <div class="details">
            <dl>
                <dt>Token name:</dt>
                <dd>{token_name}</dd>
                <dt>Requested from:</dt>
                <dd>{client_ip}</dd>
                <dt>Client:</dt>
                <dd>{user_agent}</dd>
                <dt>Expires in:</dt>
                <dd>{expires_in_min} min</dd>
            </dl>
        </div>
        <div class="buttons">
            <form method="POST" action="/device/confirm" style="flex: 1;">
                <input type="hidden" name="code" value="{code_escaped}">
                <input type="hidden" name="approved" value="true">
                <button type="submit" class="approve">Approve</button>
            </form>
            <form method="POST" action="/device/confirm" style="flex: 1;">
                <input type="hidden" name="code" value="{code_escaped}">
                <input type="hidden" name="approved" value="false">
                <button type="submit" class="deny">Deny</button>
            </form>
        </div>"#,
        token_name = html_escape(&device_session.requested_token_name),
        client_ip = html_escape(device_session.client_ip.as_deref().unwrap_or("Unknown")),
        user_agent = html_escape(device_session.user_agent.as_deref().unwrap_or("Unknown")),
    );

    Html(page("Approve device login", &body)).into_response()
}

#[derive(Debug, Deserialize)]
struct DeviceConfirmForm {
    code: String,
    #[serde(default)]
    approved: bool,
}

/// POST /device/confirm - approve or deny from the approval page
async fn device_confirm(
    State(state): State<AppState>,
    ClientIdentity(client_id): ClientIdentity,
    headers: HeaderMap,
    Form(form): Form<DeviceConfirmForm>,
) -> Response {
    let result = confirm_inner(&state, &client_id, &headers, &form).await;

    match result {
        Ok(true) => message_page(
            StatusCode::OK,
            "Device approved",
            "You can return to your terminal.",
        ),
        Ok(false) => message_page(
            StatusCode::OK,
            "Device denied",
            "The login request has been rejected.",
        ),
        Err(EshError::Auth(_)) => {
            let return_to = format!("/device?code={}", urlencoding::encode(&form.code));
            login_redirect(&return_to)
        }
        Err(EshError::Expired) | Err(EshError::NotFound) => message_page(
            StatusCode::GONE,
            "Request expired",
            "This request has expired or was denied. Run `esh login` again.",
        ),
        Err(EshError::Conflict(_)) => message_page(
            StatusCode::CONFLICT,
            "Already approved",
            "This request was approved by another account.",
        ),
        Err(e) => e.into_response(),
    }
}

async fn confirm_inner(
    state: &AppState,
    client_id: &str,
    headers: &HeaderMap,
    form: &DeviceConfirmForm,
) -> Result<bool, EshError> {
    device::validate_device_code(&form.code)?;
    check_rate_limit(state, "approve", client_id).await?;
    let session = require_browser_session(state, headers).await?;

    if form.approved {
        approve_for_session(state, &session, &form.code, client_id).await?;
        return Ok(true);
    }

    device::cancel(&state.db, &form.code, &session.subject, Utc::now().timestamp())
        .await
        .inspect_err(|e| log_internal("cancel", e))?;

    audit::record(
        &state.db,
        SecurityEventKind::DeviceCancelled,
        AuditContext {
            subject: Some(&session.subject),
            device_code: Some(&form.code),
            client_id: Some(client_id),
        },
        json!({}),
    )
    .await;

    Ok(false)
}
