use crate::settings::Settings;
use axum::http::HeaderMap;

pub const SESSION_COOKIE_NAME: &str = "esh_session";

/// Browser session cookie for the approval page. Only the opaque id travels in it.
#[derive(Clone, Debug)]
pub struct SessionCookie {
    pub session_id: String,
}

impl SessionCookie {
    pub fn new(session_id: String) -> Self {
        Self { session_id }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let cookie_header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;

        for cookie in cookie_header.split(';') {
            let cookie = cookie.trim();
            if let Some(value) = cookie
                .strip_prefix(SESSION_COOKIE_NAME)
                .and_then(|s| s.strip_prefix('='))
            {
                if value.is_empty() {
                    continue;
                }
                return Some(Self {
                    session_id: value.to_string(),
                });
            }
        }
        None
    }

    pub fn to_cookie_header(&self, settings: &Settings) -> String {
        let secure = settings.public_base_url().starts_with("https://");

        format!(
            "{}={}; HttpOnly; {}SameSite=Lax; Path=/; Max-Age={}",
            SESSION_COOKIE_NAME,
            self.session_id,
            if secure { "Secure; " } else { "" },
            settings.session.ttl_secs
        )
    }

    pub fn delete_cookie_header() -> String {
        format!(
            "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
            SESSION_COOKIE_NAME
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue};

    #[test]
    fn test_from_headers_picks_our_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; esh_session=abc123; other=1"),
        );

        let cookie = SessionCookie::from_headers(&headers).expect("cookie");
        assert_eq!(cookie.session_id, "abc123");
    }

    #[test]
    fn test_from_headers_ignores_prefix_lookalikes_and_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("esh_session_old=zzz; esh_session="),
        );
        assert!(SessionCookie::from_headers(&headers).is_none());
        assert!(SessionCookie::from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_secure_flag_follows_base_url() {
        let mut settings = Settings::default();
        settings.server.public_base_url = Some("https://esh.example.com".to_string());
        let header = SessionCookie::new("id".into()).to_cookie_header(&settings);
        assert!(header.contains("Secure;"));
        assert!(header.contains("Max-Age=3600"));

        settings.server.public_base_url = Some("http://localhost:8080".to_string());
        let header = SessionCookie::new("id".into()).to_cookie_header(&settings);
        assert!(!header.contains("Secure"));
    }
}
