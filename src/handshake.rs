//! One-shot gateway handshake that turns an access token into a session key.
//!
//! The gateway greets every new connection with a `LOGI` frame whose JSON body carries the
//! session key.  The negotiator reads exactly that frame and hangs up; the long-lived stream is
//! a separate connection.

use std::fmt;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::error::{Error, Result, TransportErrorKind};
use crate::login::{AccessToken, BackendIdentity, redact};
use crate::observability::HANDSHAKES;

/// Opaque per-account credential sent as the `Session-Key` header on REST calls.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", redact(&self.0))
    }
}

/// Parse the first JSON object in `frame`, ignoring any non-JSON prefix and trailing bytes.
///
/// Gateway frames look like `LOGI{...}`; the tag is not always exactly four bytes, so the object
/// is located by its first `{`.
pub fn first_json_object(frame: &str) -> Option<Value> {
    let start = frame.find('{')?;
    let mut values = serde_json::Deserializer::from_str(&frame[start..]).into_iter::<Value>();
    match values.next() {
        Some(Ok(value @ Value::Object(_))) => Some(value),
        _ => None,
    }
}

/// Pull the session key out of the gateway's greeting frame.
pub fn extract_session_key(frame: &str) -> Result<SessionKey> {
    let body = first_json_object(frame)
        .ok_or_else(|| Error::handshake("greeting frame carries no JSON object"))?;
    match body.get("key").and_then(Value::as_str) {
        Some(key) if !key.is_empty() => Ok(SessionKey::new(key)),
        _ => {
            let reason = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no `key` field");
            Err(Error::handshake(format!("greeting frame rejected: {reason}")))
        }
    }
}

/// Derives a session key from a backend identity.
#[derive(Debug, Clone)]
pub struct SessionKeyNegotiator {
    config: BackendConfig,
}

impl SessionKeyNegotiator {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    /// Convenience wrapper over [`Self::negotiate`].
    pub async fn negotiate_for(&self, identity: &BackendIdentity) -> Result<SessionKey> {
        self.negotiate(&identity.user_id, &identity.access_token).await
    }

    /// Open a handshake connection, read the greeting, and close.
    pub async fn negotiate(
        &self,
        user_id: &str,
        access_token: &AccessToken,
    ) -> Result<SessionKey> {
        HANDSHAKES.click();
        let url = self.config.gateway_url_for(user_id, access_token)?;
        let timeout = self.config.timeout;

        let (mut ws, _) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                Error::transport(
                    TransportErrorKind::Timeout,
                    "Timeout connecting to gateway",
                    None,
                )
            })??;
        debug!("handshake connection open");

        let greeting = tokio::time::timeout(timeout, read_greeting(&mut ws))
            .await
            .map_err(|_| Error::handshake("timed out waiting for the greeting frame"))??;

        let _ = ws.close(None).await;
        let key = extract_session_key(&greeting)?;
        info!(session_key = ?key, "negotiated session key");
        Ok(key)
    }
}

/// Read frames until the first data frame arrives.
async fn read_greeting<S>(ws: &mut S) -> Result<String>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| match Error::from(e) {
            err if err.transport_kind() == Some(TransportErrorKind::ConnectionClosed) => {
                Error::handshake(format!("gateway closed without a greeting: {err}"))
            }
            err => err,
        })?;
        match msg {
            Message::Text(text) => return Ok(text),
            Message::Binary(data) => {
                return String::from_utf8(data).map_err(|e| {
                    Error::encoding(
                        format!("greeting frame is not UTF-8: {e}"),
                        Some(Box::new(e)),
                    )
                });
            }
            Message::Close(_) => break,
            _ => continue,
        }
    }
    Err(Error::handshake("gateway closed without a greeting"))
}
