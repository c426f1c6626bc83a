//! Gateway frames.
//!
//! Every text frame starts with a four-character type tag, optionally followed by a JSON body.

use serde::Deserialize;
use serde_json::Value;

use crate::handshake::first_json_object;

/// Width of the type tag at the start of every frame.
pub const TAG_LEN: usize = 4;

/// Error codes the backend uses for rejected or expired credentials.
const AUTH_ERROR_CODES: std::ops::RangeInclusive<i64> = 400300..=400399;

/// A user message delivered live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveMessage {
    pub channel_url: String,
    pub sender: String,
    pub body: String,
}

/// An `EROR` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    pub code: i64,
    pub message: String,
}

impl GatewayError {
    /// True when the backend is telling us our session is no longer valid.
    pub fn is_auth_failure(&self) -> bool {
        AUTH_ERROR_CODES.contains(&self.code)
    }
}

/// One inbound frame, decoded according to its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// `LOGI`: the gateway accepted our login.
    LoginAck,
    /// `MESG`: a chat message.
    Message(LiveMessage),
    /// `EROR`: the gateway reported an error.
    Error(GatewayError),
    /// Any other tag.  Ignored.
    Unknown { tag: String },
    /// A known tag whose body could not be decoded.
    Malformed { tag: String, reason: String },
}

#[derive(Deserialize)]
struct RawUser {
    name: Option<String>,
    nickname: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    channel_url: String,
    user: Option<RawUser>,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct RawError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// The frame's type tag: its first four characters, or the whole frame if shorter.
pub fn frame_tag(text: &str) -> &str {
    match text.char_indices().nth(TAG_LEN) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

impl InboundFrame {
    /// Decode a text frame.  Total: every input maps to some variant.
    pub fn parse(text: &str) -> Self {
        let tag = frame_tag(text);
        match tag {
            "LOGI" => InboundFrame::LoginAck,
            "MESG" => match decode::<RawMessage>(text) {
                Ok(raw) => {
                    let sender = raw
                        .user
                        .and_then(|u| u.name.filter(|n| !n.is_empty()).or(u.nickname))
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| crate::directory::UNKNOWN_NAME.to_string());
                    InboundFrame::Message(LiveMessage {
                        channel_url: raw.channel_url,
                        sender,
                        body: raw.message,
                    })
                }
                Err(reason) => InboundFrame::Malformed {
                    tag: tag.to_string(),
                    reason,
                },
            },
            "EROR" => match decode::<RawError>(text) {
                Ok(raw) => InboundFrame::Error(GatewayError {
                    code: raw.code,
                    message: raw.message,
                }),
                Err(reason) => InboundFrame::Malformed {
                    tag: tag.to_string(),
                    reason,
                },
            },
            _ => InboundFrame::Unknown {
                tag: tag.to_string(),
            },
        }
    }
}

/// Decode the JSON body that follows the tag.
fn decode<T: for<'de> Deserialize<'de>>(text: &str) -> std::result::Result<T, String> {
    let body: Value = first_json_object(text).ok_or_else(|| "no JSON body".to_string())?;
    serde_json::from_value(body).map_err(|e| e.to_string())
}
