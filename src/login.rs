//! The three-hop web login that yields a chat-backend access token.
//!
//! 1. POST the login form and keep the `reddit_session` cookie.
//! 2. GET the chat page with that cookie and scrape the scoped token and user id out of the
//!    script blob embedded in the HTML.
//! 3. Trade the scoped token for a backend access token.
//!
//! There are no retries here: login runs once per process and any failure is fatal.

use std::fmt;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, redirect};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::client::map_request_error;
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::observability::{LOGIN_FAILURES, LOGIN_HOPS};

/// Name of the identity provider's session cookie.
const SESSION_COOKIE: &str = "reddit_session";

/// Marker preceding the scoped token in the chat page.
pub const ACCESS_TOKEN_MARKER: &str = r#""accessToken":""#;

/// Marker preceding the account id in the chat page.
pub const USER_ID_MARKER: &str = r#""user":{"account":{"id":""#;

/// Username, password and optional second-factor code.  Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
    twofa: Option<String>,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        twofa: Option<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            twofa: twofa.filter(|code| !code.is_empty()),
        }
    }

    /// The value sent in the `passwd` form field.
    ///
    /// A second-factor code rides along after a colon.
    pub fn form_password(&self) -> String {
        match &self.twofa {
            Some(code) => format!("{}:{}", self.password, code),
            None => self.password.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("twofa", &self.twofa.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Bearer credential for the chat backend, scoped to one user id.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken({})", redact(&self.0))
    }
}

/// Intermediate state between hops two and three.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginSession {
    pub session_cookie: String,
    pub scoped_token: String,
    pub user_id: String,
}

impl fmt::Debug for LoginSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginSession")
            .field("session_cookie", &redact(&self.session_cookie))
            .field("scoped_token", &redact(&self.scoped_token))
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// What a successful login produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendIdentity {
    pub user_id: String,
    pub access_token: AccessToken,
}

/// Show a few leading characters of a secret for log correlation.
pub(crate) fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}…")
}

/// Return the text between `marker` and the next double quote.
///
/// The chat page is HTML with the values buried in a script blob, so this is a plain text search
/// rather than a parse.
pub fn extract_marked<'a>(body: &'a str, marker: &str) -> Option<&'a str> {
    let start = body.find(marker)? + marker.len();
    let rest = &body[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// Pull the scoped token and the user id out of the chat page body.
pub fn scrape_chat_page(body: &str) -> Option<(String, String)> {
    let token = extract_marked(body, ACCESS_TOKEN_MARKER)?;
    let user_id = extract_marked(body, USER_ID_MARKER)?;
    Some((token.to_string(), user_id.to_string()))
}

#[derive(Deserialize)]
struct ExchangeResponse {
    sb_access_token: Option<String>,
}

/// Performs the login handshake against the identity provider.
#[derive(Debug, Clone)]
pub struct CredentialExchange {
    config: BackendConfig,
    login_client: ReqwestClient,
    client: ReqwestClient,
}

impl CredentialExchange {
    /// Create a new exchange for the given backend.
    pub fn new(config: BackendConfig) -> Result<Self> {
        let login_client = ReqwestClient::builder()
            .timeout(config.timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self {
            config,
            login_client,
            client,
        })
    }

    /// Headers the login form and chat page expect from a browser.
    fn browser_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(agent) = HeaderValue::from_str(&self.config.user_agent) {
            headers.insert(header::USER_AGENT, agent);
        }
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*"),
        );
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"),
        );
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("empty"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("cors"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));
        headers
    }

    /// Run all three hops and return the backend identity.
    pub async fn exchange(&self, credentials: &Credentials) -> Result<BackendIdentity> {
        let identity = self.run_hops(credentials).await;
        if let Err(e) = &identity {
            LOGIN_FAILURES.click();
            warn!(username = %credentials.username, error = %e, "login failed");
        }
        identity
    }

    async fn run_hops(&self, credentials: &Credentials) -> Result<BackendIdentity> {
        let session_cookie = self.post_login(credentials).await?;
        let session = self.fetch_chat_page(session_cookie).await?;
        let access_token = self.exchange_token(&session).await?;
        info!(user_id = %session.user_id, "logged in to chat backend");
        Ok(BackendIdentity {
            user_id: session.user_id,
            access_token,
        })
    }

    /// Hop one: submit the login form and return the session cookie.
    async fn post_login(&self, credentials: &Credentials) -> Result<String> {
        LOGIN_HOPS.click();
        let form = [
            ("op", "login".to_string()),
            ("user", credentials.username.clone()),
            ("passwd", credentials.form_password()),
            ("api_type", "json".to_string()),
        ];
        let response = self
            .login_client
            .post(&self.config.login_url)
            .headers(self.browser_headers())
            .form(&form)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.config.timeout))?;
        debug!(status = %response.status(), "login form submitted");
        let cookie = response
            .cookies()
            .find(|cookie| cookie.name() == SESSION_COOKIE && !cookie.value().is_empty())
            .map(|cookie| cookie.value().to_string());
        cookie.ok_or_else(|| Error::authentication("no session cookie"))
    }

    /// Hop two: scrape the scoped token and user id from the chat page.
    async fn fetch_chat_page(&self, session_cookie: String) -> Result<LoginSession> {
        LOGIN_HOPS.click();
        let cookie = HeaderValue::from_str(&format!("{SESSION_COOKIE}={session_cookie}"))
            .map_err(|_| Error::authentication("session cookie is not a valid header value"))?;
        let response = self
            .client
            .get(&self.config.chat_page_url)
            .headers(self.browser_headers())
            .header(header::COOKIE, cookie)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.config.timeout))?;
        debug!(status = %response.status(), "chat page fetched");
        let body = response.text().await.map_err(|e| {
            Error::http_client(
                format!("Failed to read chat page: {}", e),
                Some(Box::new(e)),
            )
        })?;
        let (scoped_token, user_id) =
            scrape_chat_page(&body).ok_or_else(|| Error::authentication("markers not found"))?;
        let session = LoginSession {
            session_cookie,
            scoped_token,
            user_id,
        };
        debug!(?session, "scraped chat page");
        Ok(session)
    }

    /// Hop three: trade the scoped token for a backend access token.
    async fn exchange_token(&self, session: &LoginSession) -> Result<AccessToken> {
        LOGIN_HOPS.click();
        let response = self
            .client
            .get(&self.config.token_exchange_url)
            .bearer_auth(&session.scoped_token)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.config.timeout))?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "token exchange refused");
            return Err(Error::authentication("exchange rejected"));
        }
        let exchanged: ExchangeResponse = response
            .json()
            .await
            .map_err(|_| Error::authentication("exchange rejected"))?;
        let token = exchanged
            .sb_access_token
            .filter(|token| !token.is_empty())
            .map(AccessToken::new)
            .ok_or_else(|| Error::authentication("exchange rejected"))?;
        debug!(access_token = ?token, "token exchanged");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Trimmed from a captured chat page; the real blob is several hundred kilobytes.
    const CHAT_PAGE: &str = r#"<!DOCTYPE html><html><head><title>reddit: chat</title></head><body>
<script id="data">window.___r = {"accountManagerModalData":{},"user":{"account":{"id":"t2_4x9fj2","name":"archivist","hasVerifiedEmail":true},"session":{"accessToken":"812345678901-Yq1vN2w_abcDEF","expires":"2021-03-01T12:00:00.000Z"}}};</script>
</body></html>"#;

    #[test]
    fn form_password_appends_second_factor() {
        let plain = Credentials::new("u", "hunter2", None);
        assert_eq!(plain.form_password(), "hunter2");
        let with_code = Credentials::new("u", "hunter2", Some("123456".to_string()));
        assert_eq!(with_code.form_password(), "hunter2:123456");
        let empty_code = Credentials::new("u", "hunter2", Some(String::new()));
        assert_eq!(empty_code.form_password(), "hunter2");
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = Credentials::new("u", "hunter2", Some("123456".to_string()));
        let shown = format!("{creds:?}");
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("123456"));
        assert!(shown.contains("\"u\""));
    }

    #[test]
    fn scrape_captured_page() {
        let (token, user_id) = scrape_chat_page(CHAT_PAGE).unwrap();
        assert_eq!(token, "812345678901-Yq1vN2w_abcDEF");
        assert_eq!(user_id, "t2_4x9fj2");
    }

    #[test]
    fn scrape_requires_both_markers() {
        assert!(scrape_chat_page(r#"{"accessToken":"abc"}"#).is_none());
        assert!(scrape_chat_page(r#"{"user":{"account":{"id":"t2_x"}}}"#).is_none());
        assert!(scrape_chat_page("<html></html>").is_none());
    }

    #[test]
    fn extract_marked_needs_closing_quote() {
        assert_eq!(extract_marked(r#""accessToken":"abc"#, ACCESS_TOKEN_MARKER), None);
        assert_eq!(
            extract_marked(r#""accessToken":"""#, ACCESS_TOKEN_MARKER),
            Some("")
        );
    }

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("abcdefghijklmnop");
        assert_eq!(format!("{token:?}"), "AccessToken(abcd…)");
        assert_eq!(token.as_str(), "abcdefghijklmnop");
    }
}
