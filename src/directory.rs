//! Channel listing with tolerant name and category resolution.
//!
//! Channel objects from the backend are heterogeneous: group chats often have no name, and the
//! subreddit a channel belongs to hides inside a JSON string in the `data` field.  Resolution
//! never fails; each lookup degrades to the next fallback.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::client::ChatApi;
use crate::error::Result;

/// Display name used when nothing else resolves.
pub const UNKNOWN_NAME: &str = "unknown";

/// One channel as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSummary {
    pub channel_url: String,
    pub display_name: String,
    pub category_tag: String,
}

impl ChannelSummary {
    /// Summarize a raw channel object; `None` when it has no `channel_url`.
    pub fn from_value(channel: &Value) -> Option<Self> {
        let channel_url = non_empty_str(channel.get("channel_url"))?.to_string();
        Some(Self {
            channel_url,
            display_name: resolve_display_name(channel),
            category_tag: resolve_category(channel),
        })
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Resolve a channel's display name.
///
/// Priority: the explicit `name`; else the distinct nicknames of the last sender, the creator,
/// and the inviter joined by ", "; else [`UNKNOWN_NAME`].
pub fn resolve_display_name(channel: &Value) -> String {
    if let Some(name) = non_empty_str(channel.get("name")) {
        return name.to_string();
    }
    let candidates = [
        channel.pointer("/last_message/user/nickname"),
        channel.pointer("/created_by/nickname"),
        channel.pointer("/inviter/nickname"),
    ];
    let mut nicknames: Vec<&str> = Vec::with_capacity(candidates.len());
    for nickname in candidates.into_iter().filter_map(non_empty_str) {
        if !nicknames.contains(&nickname) {
            nicknames.push(nickname);
        }
    }
    if nicknames.is_empty() {
        UNKNOWN_NAME.to_string()
    } else {
        nicknames.join(", ")
    }
}

/// Resolve a channel's category: `r/<subreddit>` from the embedded `data` JSON, else the raw
/// `custom_type`, else empty.
pub fn resolve_category(channel: &Value) -> String {
    let subreddit = channel
        .get("data")
        .and_then(Value::as_str)
        .and_then(|data| serde_json::from_str::<Value>(data).ok())
        .and_then(|data| {
            data.pointer("/subreddit/name")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
    match subreddit {
        Some(name) => format!("r/{name}"),
        None => channel
            .get("custom_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Summarize a page of raw channels, preserving backend order.
pub fn summarize_channels(channels: &[Value]) -> Vec<ChannelSummary> {
    channels
        .iter()
        .filter_map(|channel| {
            let summary = ChannelSummary::from_value(channel);
            if summary.is_none() {
                warn!("skipping channel without a channel_url");
            }
            summary
        })
        .collect()
}

/// Lookup from channel URL to summary, captured once when a stream starts.
#[derive(Debug, Clone, Default)]
pub struct ChannelIndex {
    channels: HashMap<String, ChannelSummary>,
}

impl ChannelIndex {
    pub fn new(channels: impl IntoIterator<Item = ChannelSummary>) -> Self {
        Self {
            channels: channels
                .into_iter()
                .map(|c| (c.channel_url.clone(), c))
                .collect(),
        }
    }

    pub fn get(&self, channel_url: &str) -> Option<&ChannelSummary> {
        self.channels.get(channel_url)
    }

    /// Display name for a channel, falling back to its URL for channels created after capture.
    pub fn display_name<'a>(&'a self, channel_url: &'a str) -> &'a str {
        self.get(channel_url)
            .map(|c| c.display_name.as_str())
            .unwrap_or(channel_url)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Lists the channels visible to a session.
pub struct ChannelDirectory<'a> {
    api: &'a ChatApi,
}

impl<'a> ChannelDirectory<'a> {
    pub fn new(api: &'a ChatApi) -> Self {
        Self { api }
    }

    /// Fetch up to one page of channels.  Rebuilt on every call; nothing is cached.
    pub async fn list(&self) -> Result<Vec<ChannelSummary>> {
        let raw = self.api.group_channels().await?;
        let channels = summarize_channels(&raw);
        debug!(count = channels.len(), "listed channels");
        Ok(channels)
    }

    /// Fetch the channels and index them by URL.
    pub async fn index(&self) -> Result<ChannelIndex> {
        Ok(ChannelIndex::new(self.list().await?))
    }
}
