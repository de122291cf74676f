mod helpers;

use axum::http::StatusCode;
use axum::Router;
use esh::cipher::EnvelopeCipher;
use esh::device::{self, ConsumeOutcome, DeviceStatus};
use esh::settings::Settings;
use esh::storage;
use esh::token;
use esh::web::{self, AppState};
use helpers::{
    count_device_sessions, count_security_events, session_cookie, AxumTestRequest, SessionBuilder,
    TestDb, UserBuilder,
};
use serde_json::{json, Value};

const TEST_KEY_HEX: &str = "8f3a1c5e7b9d2f4a6c8e0b1d3f5a7c9e2b4d6f8a0c2e4b6d8f0a2c4e6b8d0f2a";

struct TestApp {
    db: TestDb,
    state: AppState,
}

impl TestApp {
    async fn new() -> Self {
        let mut settings = Settings::default();
        settings.server.public_base_url = Some("https://esh.example.com".to_string());
        Self::with_settings(settings).await
    }

    async fn with_settings(settings: Settings) -> Self {
        let db = TestDb::new().await;
        let cipher = EnvelopeCipher::from_hex(TEST_KEY_HEX).expect("valid key");
        let state = AppState::new(settings, db.connection().clone(), cipher);
        Self { db, state }
    }

    fn router(&self) -> Router {
        web::router(self.state.clone())
    }

    /// A signed-in browser user; returns (subject, cookie header)
    async fn signed_in(&self, username: &str) -> (String, String) {
        let user = UserBuilder::new(username).create(self.db.connection()).await;
        let session = SessionBuilder::new(&user.subject)
            .create(self.db.connection())
            .await;
        (user.subject, session_cookie(&session))
    }

    async fn start(&self, token_name: &str) -> Value {
        AxumTestRequest::post("/device/start")
            .json(&json!({ "tokenName": token_name }))
            .send(self.router())
            .await
            .assert_status(StatusCode::OK)
            .json()
    }

    async fn poll(&self, device_code: &str) -> helpers::AxumTestResponse {
        AxumTestRequest::get(&format!("/device/poll?deviceCode={}", device_code))
            .send(self.router())
            .await
    }

    async fn approve(&self, device_code: &str, cookie: &str) -> helpers::AxumTestResponse {
        AxumTestRequest::post("/device/approve")
            .cookie(cookie)
            .json(&json!({ "deviceCode": device_code }))
            .send(self.router())
            .await
    }
}

fn device_code(started: &Value) -> String {
    started["deviceCode"]
        .as_str()
        .expect("deviceCode in start response")
        .to_string()
}

#[tokio::test]
async fn test_ci_scenario_end_to_end() {
    let app = TestApp::new().await;
    let (subject, cookie) = app.signed_in("alice").await;

    let started = app.start("CI").await;
    let code = device_code(&started);
    assert_eq!(code.len(), 43);
    assert_eq!(started["tokenName"], "CI");
    assert_eq!(started["pollIntervalSeconds"], 5);
    assert_eq!(
        started["verificationUrl"],
        format!("https://esh.example.com/device?code={}", code)
    );

    let pending = app.poll(&code).await.assert_status(StatusCode::OK);
    assert_eq!(pending.header("cache-control"), Some("no-store"));
    assert_eq!(pending.json::<Value>(), json!({ "status": "pending" }));

    let approved = app.approve(&code, &cookie).await.assert_status(StatusCode::OK);
    assert_eq!(approved.json::<Value>(), json!({ "status": "ok" }));

    let delivered: Value = app.poll(&code).await.assert_status(StatusCode::OK).json();
    assert_eq!(delivered["status"], "approved");
    assert_eq!(delivered["tokenName"], "CI");
    let plaintext = delivered["token"].as_str().expect("token");
    assert!(plaintext.starts_with("esh_"));

    // The credential is stored only as digest and hash
    let stored = storage::find_api_token_by_digest(app.db.connection(), &token::lookup_digest(plaintext))
        .await
        .unwrap()
        .expect("token row");
    assert_eq!(stored.id, delivered["tokenId"].as_str().unwrap());
    assert_eq!(stored.owner_subject, subject);
    assert_ne!(stored.verification_hash, plaintext);
    assert!(token::verify(plaintext, &stored.verification_hash).unwrap());

    // Never again
    for _ in 0..3 {
        let again: Value = app.poll(&code).await.assert_status(StatusCode::OK).json();
        assert_eq!(again, json!({ "status": "pending" }));
    }

    let row = storage::get_device_session(app.db.connection(), &code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, DeviceStatus::Consumed);
    assert!(!row.has_sealed_credential());

    let events = storage::get_security_events_for_device(app.db.connection(), &code)
        .await
        .unwrap();
    let kinds: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(
        kinds,
        vec!["device.started", "device.approved", "device.token_delivered"]
    );

    // Minting and revealing both name the approver and the polling client
    for event in &events[1..] {
        assert_eq!(event.subject.as_deref(), Some(subject.as_str()));
        assert!(event.client_id.is_some());
    }
}

#[tokio::test]
async fn test_audit_metadata_never_contains_plaintext() {
    let app = TestApp::new().await;
    let (_, cookie) = app.signed_in("alice").await;
    let code = device_code(&app.start("CI").await);
    app.approve(&code, &cookie).await.assert_status(StatusCode::OK);
    let delivered: Value = app.poll(&code).await.json();
    let plaintext = delivered["token"].as_str().unwrap();

    for event in storage::get_security_events_for_device(app.db.connection(), &code)
        .await
        .unwrap()
    {
        assert!(!event.metadata.to_string().contains(plaintext));
    }
}

#[tokio::test]
async fn test_ttl_scenario_polls_expired_after_eleven_minutes() {
    let app = TestApp::new().await;
    let code = device_code(&app.start("CI").await);

    let row = storage::get_device_session(app.db.connection(), &code)
        .await
        .unwrap()
        .unwrap();
    let eleven_minutes_later = row.created_at + 11 * 60;

    let outcome = device::consume(
        app.db.connection(),
        &app.state.cipher,
        &code,
        eleven_minutes_later,
    )
    .await
    .unwrap();
    assert_eq!(outcome, ConsumeOutcome::Expired);

    let expired = app.poll(&code).await.assert_status(StatusCode::GONE);
    assert_eq!(expired.json::<Value>(), json!({ "status": "expired" }));

    // An approval arriving late cannot revive it
    let (_, cookie) = app.signed_in("alice").await;
    app.approve(&code, &cookie)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sixty_first_start_is_rate_limited() {
    let app = TestApp::new().await;

    for _ in 0..60 {
        app.start("CI").await;
    }

    let limited = AxumTestRequest::post("/device/start")
        .json(&json!({ "tokenName": "CI" }))
        .send(app.router())
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.header("retry-after").is_some());
    let body: Value = limited.json();
    assert_eq!(body["error"], "rate_limited");
    assert!(body["retry_after"].as_u64().unwrap() >= 1);

    assert_eq!(count_device_sessions(app.db.connection()).await, 60);

    // A different client identifier has its own window
    AxumTestRequest::post("/device/start")
        .header("x-forwarded-for", "198.51.100.9")
        .json(&json!({}))
        .send(app.router())
        .await
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_rejections_are_audited_once_per_window() {
    let mut settings = Settings::default();
    settings.rate_limit.max_requests = 1;
    let app = TestApp::with_settings(settings).await;

    app.start("CI").await;
    for _ in 0..50 {
        AxumTestRequest::post("/device/start")
            .json(&json!({ "tokenName": "CI" }))
            .send(app.router())
            .await
            .assert_status(StatusCode::TOO_MANY_REQUESTS);
    }

    assert_eq!(
        count_security_events(app.db.connection(), "rate_limit.exceeded").await,
        1
    );
    assert_eq!(count_security_events(app.db.connection(), "device.started").await, 1);
}

#[tokio::test]
async fn test_bearer_caller_cannot_approve() {
    let app = TestApp::new().await;
    let (_, cookie) = app.signed_in("alice").await;
    let code = device_code(&app.start("CI").await);

    AxumTestRequest::post("/device/approve")
        .cookie(&cookie)
        .header("authorization", "Bearer esh_stolen")
        .json(&json!({ "deviceCode": code }))
        .send(app.router())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    AxumTestRequest::post("/device/approve")
        .json(&json!({ "deviceCode": code }))
        .send(app.router())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let row = storage::get_device_session(app.db.connection(), &code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, DeviceStatus::Pending);
}

#[tokio::test]
async fn test_second_approver_conflicts_and_first_is_idempotent() {
    let app = TestApp::new().await;
    let (alice, alice_cookie) = app.signed_in("alice").await;
    let (_, mallory_cookie) = app.signed_in("mallory").await;
    let code = device_code(&app.start("CI").await);

    app.approve(&code, &alice_cookie).await.assert_status(StatusCode::OK);
    app.approve(&code, &alice_cookie).await.assert_status(StatusCode::OK);
    app.approve(&code, &mallory_cookie)
        .await
        .assert_status(StatusCode::CONFLICT);

    assert_eq!(
        storage::count_api_tokens_for_owner(app.db.connection(), &alice)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_expired_browser_session_cannot_approve() {
    let app = TestApp::new().await;
    let user = UserBuilder::new("alice").create(app.db.connection()).await;
    let stale = SessionBuilder::new(&user.subject)
        .with_ttl(-1)
        .create(app.db.connection())
        .await;
    let code = device_code(&app.start("CI").await);

    app.approve(&code, &session_cookie(&stale))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_validation_errors() {
    let app = TestApp::new().await;
    let (_, cookie) = app.signed_in("alice").await;

    AxumTestRequest::post("/device/start")
        .json(&json!({ "tokenName": "x".repeat(65) }))
        .send(app.router())
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    AxumTestRequest::post("/device/start")
        .json(&json!({ "tokenName": "line\nbreak" }))
        .send(app.router())
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.poll("short").await.assert_status(StatusCode::BAD_REQUEST);
    AxumTestRequest::get("/device/poll")
        .send(app.router())
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.approve("not-a-device-code", &cookie)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    // Well-formed but unknown
    app.poll(&"A".repeat(43)).await.assert_status(StatusCode::GONE);
    app.approve(&"A".repeat(43), &cookie)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(count_device_sessions(app.db.connection()).await, 0);
}

#[tokio::test]
async fn test_start_defaults_token_name() {
    let app = TestApp::new().await;

    let started: Value = AxumTestRequest::post("/device/start")
        .send(app.router())
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(started["tokenName"], "CLI");
}

#[tokio::test]
async fn test_browser_login_then_approve_via_page() {
    let app = TestApp::new().await;
    UserBuilder::new("alice")
        .with_password("correct horse")
        .create(app.db.connection())
        .await;
    let code = device_code(&app.start("laptop <script>").await);
    let page_path = format!("/device?code={}", code);

    // Not signed in: bounced to login with the page as return target
    let redirect = AxumTestRequest::get(&page_path)
        .send(app.router())
        .await
        .assert_status(StatusCode::SEE_OTHER);
    let location = redirect.header("location").unwrap().to_string();
    assert!(location.starts_with("/login?return_to="));

    let bad = AxumTestRequest::post("/login")
        .form(&[("username", "alice"), ("password", "wrong"), ("return_to", page_path.as_str())])
        .send(app.router())
        .await
        .assert_status(StatusCode::SEE_OTHER);
    assert!(bad.header("set-cookie").is_none());

    let signed_in = AxumTestRequest::post("/login")
        .form(&[
            ("username", "alice"),
            ("password", "correct horse"),
            ("return_to", page_path.as_str()),
        ])
        .send(app.router())
        .await
        .assert_status(StatusCode::SEE_OTHER);
    assert_eq!(signed_in.header("location"), Some(page_path.as_str()));
    let set_cookie = signed_in.header("set-cookie").unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("Secure"));
    let cookie = set_cookie.split(';').next().unwrap().to_string();

    let page = AxumTestRequest::get(&page_path)
        .cookie(&cookie)
        .send(app.router())
        .await
        .assert_status(StatusCode::OK);
    let html = page.text();
    assert!(html.contains("laptop &lt;script&gt;"));
    assert!(!html.contains("laptop <script>"));
    assert_eq!(page.header("x-frame-options"), Some("DENY"));

    AxumTestRequest::post("/device/confirm")
        .cookie(&cookie)
        .form(&[("code", code.as_str()), ("approved", "true")])
        .send(app.router())
        .await
        .assert_status(StatusCode::OK);

    let delivered: Value = app.poll(&code).await.json();
    assert_eq!(delivered["status"], "approved");
    assert_eq!(delivered["tokenName"], "laptop <script>");
}

#[tokio::test]
async fn test_deny_from_page_cancels_request() {
    let app = TestApp::new().await;
    let (_, cookie) = app.signed_in("alice").await;
    let code = device_code(&app.start("CI").await);

    AxumTestRequest::post("/device/confirm")
        .cookie(&cookie)
        .form(&[("code", code.as_str()), ("approved", "false")])
        .send(app.router())
        .await
        .assert_status(StatusCode::OK);

    app.poll(&code).await.assert_status(StatusCode::GONE);
    app.approve(&code, &cookie)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let events: Vec<String> = storage::get_security_events_for_device(app.db.connection(), &code)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert!(events.contains(&"device.cancelled".to_string()));
}

#[tokio::test]
async fn test_integrity_failure_returns_generic_error() {
    let app = TestApp::new().await;
    let (_, cookie) = app.signed_in("alice").await;
    let code = device_code(&app.start("CI").await);
    app.approve(&code, &cookie).await.assert_status(StatusCode::OK);

    // Same database, different key: the sealed blob no longer authenticates
    let other = EnvelopeCipher::new(&[9u8; 32]).unwrap();
    let mut state = app.state.clone();
    state.cipher = std::sync::Arc::new(other);
    let poll_path = format!("/device/poll?deviceCode={}", code);

    let response = AxumTestRequest::get(&poll_path)
        .send(web::router(state.clone()))
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!response.text().contains("esh_"));

    // The failure is final: later polls are told to stop
    for _ in 0..2 {
        let again = AxumTestRequest::get(&poll_path)
            .send(web::router(state.clone()))
            .await
            .assert_status(StatusCode::GONE);
        assert_eq!(again.json::<Value>(), json!({ "status": "expired" }));
    }
    app.poll(&code).await.assert_status(StatusCode::GONE);

    let events = storage::get_security_events_for_device(app.db.connection(), &code)
        .await
        .unwrap();
    let failures: Vec<_> = events
        .iter()
        .filter(|e| e.event == "device.integrity_failure")
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].severity, "critical");

    let row = storage::get_device_session(app.db.connection(), &code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, DeviceStatus::Expired);
    assert!(!row.has_sealed_credential());
}

#[tokio::test]
async fn test_healthz_and_security_headers() {
    let app = TestApp::new().await;

    let response = AxumTestRequest::get("/healthz")
        .send(app.router())
        .await
        .assert_status(StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({ "status": "ok" }));
    assert_eq!(response.header("x-content-type-options"), Some("nosniff"));
    assert!(response.header("content-security-policy").is_some());
}
