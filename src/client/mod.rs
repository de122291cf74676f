//! CLI side of the device login flow.

pub mod credentials;
mod login;

pub use credentials::{CredentialStore, StoredCredential};
pub use login::{login, LoginOptions};

use miette::Diagnostic;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const USER_AGENT: &str = concat!("esh-cli/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    #[diagnostic(code(esh::client::http), help("Check --server and your network connection"))]
    Http(#[from] reqwest::Error),

    #[error("Server returned HTTP {status}: {body}")]
    #[diagnostic(code(esh::client::status))]
    Status { status: u16, body: String },

    #[error("Rate limited by server")]
    #[diagnostic(code(esh::client::rate_limited))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Login request expired before it was approved")]
    #[diagnostic(code(esh::client::expired), help("Run `esh login` again"))]
    Expired,

    #[error("Gave up waiting for approval")]
    #[diagnostic(code(esh::client::timed_out), help("Run `esh login` again and approve in the browser"))]
    TimedOut,

    #[error("Invalid server URL: {0}")]
    #[diagnostic(code(esh::client::url))]
    Url(#[from] url::ParseError),

    #[error("Credential store error: {0}")]
    #[diagnostic(code(esh::client::credentials))]
    Credentials(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(esh::client::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(esh::client::serde))]
    Serde(#[from] serde_json::Error),
}

impl ClientError {
    /// Transient failures the poll loop should ride out.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::RateLimited { .. } => true,
            ClientError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub device_code: String,
    pub verification_url: String,
    pub expires_at: i64,
    pub poll_interval_seconds: i64,
    pub token_name: String,
}

/// Token returned by the single successful poll.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedToken {
    pub token: String,
    pub token_id: String,
    pub token_name: String,
    pub expires_at: i64,
}

impl std::fmt::Debug for ApprovedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovedToken")
            .field("token_id", &self.token_id)
            .field("token_name", &self.token_name)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Approved(ApprovedToken),
    Expired,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum PollBody {
    Pending,
    Approved(ApprovedToken),
    Expired,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    token_name: Option<&'a str>,
}

/// HTTP client for the three device endpoints.
#[derive(Debug, Clone)]
pub struct DeviceLoginClient {
    http: reqwest::Client,
    base_url: Url,
}

impl DeviceLoginClient {
    pub fn new(server: &str) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(server)?;
        // Keep any path prefix when joining endpoint paths
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn start(&self, token_name: Option<&str>) -> Result<StartResponse, ClientError> {
        let url = self.base_url.join("device/start")?;
        let response = self
            .http
            .post(url)
            .json(&StartRequest { token_name })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<StartResponse>().await?);
        }
        Err(error_from_response(response).await)
    }

    pub async fn poll(&self, device_code: &str) -> Result<PollStatus, ClientError> {
        let mut url = self.base_url.join("device/poll")?;
        url.query_pairs_mut().append_pair("deviceCode", device_code);

        let response = self.http.get(url).send().await?;

        match response.status() {
            StatusCode::GONE => Ok(PollStatus::Expired),
            status if status.is_success() => {
                let body = response.json::<PollBody>().await?;
                Ok(match body {
                    PollBody::Pending => PollStatus::Pending,
                    PollBody::Approved(token) => PollStatus::Approved(token),
                    PollBody::Expired => PollStatus::Expired,
                })
            }
            _ => Err(error_from_response(response).await),
        }
    }
}

async fn error_from_response(response: reqwest::Response) -> ClientError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        return ClientError::RateLimited { retry_after_secs };
    }

    let body = response.text().await.unwrap_or_default();
    ClientError::Status {
        status: status.as_u16(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CODE: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    #[tokio::test]
    async fn test_start_sends_token_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/device/start"))
            .and(body_json(json!({ "tokenName": "CI" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "deviceCode": CODE,
                "verificationUrl": format!("{}/device?code={}", server.uri(), CODE),
                "expiresAt": 1_700_000_600,
                "pollIntervalSeconds": 5,
                "tokenName": "CI"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DeviceLoginClient::new(&server.uri()).unwrap();
        let started = client.start(Some("CI")).await.unwrap();

        assert_eq!(started.device_code, CODE);
        assert_eq!(started.poll_interval_seconds, 5);
        assert_eq!(started.token_name, "CI");
    }

    #[tokio::test]
    async fn test_poll_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/device/poll"))
            .and(query_param("deviceCode", CODE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "pending" })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/device/poll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "approved",
                "token": "esh_secret",
                "tokenId": "tok-1",
                "tokenName": "CI",
                "expiresAt": 42
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/device/poll"))
            .respond_with(ResponseTemplate::new(410).set_body_json(json!({ "status": "expired" })))
            .mount(&server)
            .await;

        let client = DeviceLoginClient::new(&server.uri()).unwrap();

        assert_eq!(client.poll(CODE).await.unwrap(), PollStatus::Pending);
        match client.poll(CODE).await.unwrap() {
            PollStatus::Approved(token) => {
                assert_eq!(token.token, "esh_secret");
                assert_eq!(token.token_id, "tok-1");
                assert!(!format!("{:?}", token).contains("esh_secret"));
            }
            other => panic!("expected approval, got {other:?}"),
        }
        assert_eq!(client.poll(CODE).await.unwrap(), PollStatus::Expired);
    }

    #[tokio::test]
    async fn test_rate_limit_and_server_errors_are_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/device/poll"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/device/poll"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/device/poll"))
            .respond_with(ResponseTemplate::new(400).set_body_string("malformed device code"))
            .mount(&server)
            .await;

        let client = DeviceLoginClient::new(&server.uri()).unwrap();

        let err = client.poll(CODE).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::RateLimited {
                retry_after_secs: Some(7)
            }
        ));
        assert!(err.is_retryable());

        let err = client.poll(CODE).await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 503, .. }));
        assert!(err.is_retryable());

        let err = client.poll(CODE).await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 400, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_base_url_keeps_path_prefix() {
        let client = DeviceLoginClient::new("https://esh.example.com/api").unwrap();
        assert_eq!(
            client.base_url().join("device/start").unwrap().as_str(),
            "https://esh.example.com/api/device/start"
        );
        assert!(DeviceLoginClient::new("not a url").is_err());
    }
}
