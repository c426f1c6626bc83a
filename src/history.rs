//! Forward pagination through a channel's message history.
//!
//! Pages are requested with a `message_ts` cursor and come back oldest first.  After each page
//! the cursor moves to the `created_at` of the page's last message; an empty page ends the walk.

use async_trait::async_trait;
use futures::Stream;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::ChatApi;
use crate::error::Result;
use crate::observability::{HISTORY_MESSAGES, HISTORY_PAGES};

/// One historical message, classified by its type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    /// `ADMM`: administrative/system message.
    Admin { body: String },
    /// `MESG`: a user message.
    User { nickname: String, body: String },
    /// Anything else, kept whole so nothing is silently dropped.
    Unrecognized { raw: Value },
}

impl HistoryEntry {
    /// Classify a raw message object.  Missing fields degrade to empty strings.
    pub fn classify(message: Value) -> Self {
        let body = |m: &Value| {
            m.get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let tag = message
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned);
        match tag.as_deref() {
            Some("ADMM") => HistoryEntry::Admin {
                body: body(&message),
            },
            Some("MESG") => HistoryEntry::User {
                nickname: message
                    .pointer("/user/nickname")
                    .and_then(Value::as_str)
                    .unwrap_or(crate::directory::UNKNOWN_NAME)
                    .to_string(),
                body: body(&message),
            },
            _ => HistoryEntry::Unrecognized { raw: message },
        }
    }
}

/// Source of history pages.  [`ChatApi`] is the production implementation.
#[async_trait]
pub trait MessagePages: Send + Sync {
    /// Messages of `channel_url` created strictly after `cursor`, oldest first.
    async fn page(&self, channel_url: &str, cursor: i64) -> Result<Vec<Value>>;
}

#[async_trait]
impl MessagePages for ChatApi {
    async fn page(&self, channel_url: &str, cursor: i64) -> Result<Vec<Value>> {
        self.group_channel_messages(channel_url, cursor).await
    }
}

/// Where the paginator stands between pages.
enum Cursor {
    At(i64),
    Done,
}

/// Walks a channel's history page by page.
pub struct HistoryPaginator<P> {
    pages: P,
}

impl<P: MessagePages> HistoryPaginator<P> {
    pub fn new(pages: P) -> Self {
        Self { pages }
    }

    /// Lazily yield every message after `since_timestamp`.
    ///
    /// The stream is finite and cannot be resumed; callers that need to resume across runs
    /// should remember the `created_at` of the last message they saw.  A page error is yielded
    /// once and ends the stream.
    pub fn fetch<'a>(
        &'a self,
        channel_url: &'a str,
        since_timestamp: i64,
    ) -> impl Stream<Item = Result<HistoryEntry>> + 'a {
        stream::unfold(Cursor::At(since_timestamp), move |cursor| async move {
            let Cursor::At(cursor) = cursor else {
                return None;
            };
            HISTORY_PAGES.click();
            let messages = match self.pages.page(channel_url, cursor).await {
                Ok(messages) => messages,
                Err(e) => return Some((vec![Err(e)], Cursor::Done)),
            };
            if messages.is_empty() {
                debug!(channel_url, cursor, "history exhausted");
                return None;
            }
            let next = next_cursor(cursor, &messages);
            HISTORY_MESSAGES.count(messages.len() as u64);
            debug!(channel_url, cursor, count = messages.len(), "history page");
            let entries = messages
                .into_iter()
                .map(|m| Ok(HistoryEntry::classify(m)))
                .collect::<Vec<Result<HistoryEntry>>>();
            Some((entries, next))
        })
        .flat_map(stream::iter)
    }
}

/// The cursor for the page after `messages`.
///
/// Stops the walk when the last message has no usable `created_at` or the cursor would not
/// advance, so a misbehaving backend cannot make the walk loop or revisit messages.
fn next_cursor(cursor: i64, messages: &[Value]) -> Cursor {
    let last = messages
        .last()
        .and_then(|m| m.get("created_at"))
        .and_then(Value::as_i64);
    match last {
        Some(next) if next > cursor => Cursor::At(next),
        Some(next) => {
            warn!(cursor, next, "history cursor did not advance; stopping");
            Cursor::Done
        }
        None => {
            warn!(cursor, "last message has no created_at; stopping");
            Cursor::Done
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves a fixed, sorted dataset the way the backend does.
    struct FakePages {
        messages: Vec<Value>,
        page_size: usize,
        requests: Mutex<Vec<i64>>,
    }

    impl FakePages {
        fn new(timestamps: &[i64], page_size: usize) -> Self {
            let messages = timestamps
                .iter()
                .map(|ts| {
                    json!({
                        "type": "MESG",
                        "message": format!("m{ts}"),
                        "created_at": ts,
                        "user": {"nickname": "alice"},
                    })
                })
                .collect();
            Self {
                messages,
                page_size,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessagePages for FakePages {
        async fn page(&self, _channel_url: &str, cursor: i64) -> Result<Vec<Value>> {
            self.requests.lock().unwrap().push(cursor);
            Ok(self
                .messages
                .iter()
                .filter(|m| m["created_at"].as_i64().unwrap() > cursor)
                .take(self.page_size)
                .cloned()
                .collect())
        }
    }

    struct ScriptedPages {
        pages: Mutex<Vec<Result<Vec<Value>>>>,
    }

    #[async_trait]
    impl MessagePages for ScriptedPages {
        async fn page(&self, _channel_url: &str, _cursor: i64) -> Result<Vec<Value>> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Ok(vec![])
            } else {
                pages.remove(0)
            }
        }
    }

    async fn collect<P: MessagePages>(
        paginator: &HistoryPaginator<P>,
        since: i64,
    ) -> Vec<Result<HistoryEntry>> {
        paginator.fetch("c1", since).collect().await
    }

    #[test]
    fn classify_tags() {
        assert_eq!(
            HistoryEntry::classify(json!({"type": "ADMM", "message": "alice joined"})),
            HistoryEntry::Admin {
                body: "alice joined".to_string()
            }
        );
        assert_eq!(
            HistoryEntry::classify(
                json!({"type": "MESG", "message": "hi", "user": {"nickname": "bob"}})
            ),
            HistoryEntry::User {
                nickname: "bob".to_string(),
                body: "hi".to_string()
            }
        );
        let file = json!({"type": "FILE", "url": "https://example.com/a.png"});
        assert_eq!(
            HistoryEntry::classify(file.clone()),
            HistoryEntry::Unrecognized { raw: file }
        );
        let untyped = json!({"message": "?"});
        assert!(matches!(
            HistoryEntry::classify(untyped),
            HistoryEntry::Unrecognized { .. }
        ));
    }

    #[test]
    fn classify_tolerates_missing_fields() {
        assert_eq!(
            HistoryEntry::classify(json!({"type": "MESG"})),
            HistoryEntry::User {
                nickname: "unknown".to_string(),
                body: String::new()
            }
        );
    }

    #[tokio::test]
    async fn one_page_then_empty() {
        let pages = ScriptedPages {
            pages: Mutex::new(vec![
                Ok(vec![
                    json!({"type": "ADMM", "message": "created", "created_at": 10}),
                    json!({
                        "type": "MESG",
                        "message": "hi",
                        "created_at": 20,
                        "user": {"nickname": "alice"},
                    }),
                    json!({"type": "FILE", "created_at": 30}),
                ]),
                Ok(vec![]),
            ]),
        };
        let paginator = HistoryPaginator::new(pages);
        let entries = collect(&paginator, 0).await;
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(Result::is_ok));
        assert!(paginator.pages.pages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn walks_every_message_once() {
        let timestamps: Vec<i64> = (1..=450).map(|i| i * 10).collect();
        let paginator = HistoryPaginator::new(FakePages::new(&timestamps, 200));
        let entries = collect(&paginator, 0).await;
        let bodies: Vec<String> = entries
            .into_iter()
            .map(|e| match e.unwrap() {
                HistoryEntry::User { body, .. } => body,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        let expected: Vec<String> = timestamps.iter().map(|ts| format!("m{ts}")).collect();
        assert_eq!(bodies, expected);
        assert_eq!(
            *paginator.pages.requests.lock().unwrap(),
            vec![0, 2000, 4000, 4500]
        );
    }

    #[tokio::test]
    async fn cursor_starts_at_since() {
        let paginator = HistoryPaginator::new(FakePages::new(&[5, 15, 25], 200));
        let entries = collect(&paginator, 10).await;
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn stalled_cursor_stops() {
        let stuck = vec![json!({"type": "MESG", "message": "again", "created_at": 7})];
        let pages = ScriptedPages {
            pages: Mutex::new(vec![Ok(stuck.clone()), Ok(stuck.clone()), Ok(stuck)]),
        };
        let paginator = HistoryPaginator::new(pages);
        let entries = collect(&paginator, 7).await;
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn missing_created_at_stops() {
        let pages = ScriptedPages {
            pages: Mutex::new(vec![
                Ok(vec![json!({"type": "ADMM", "message": "no ts"})]),
                Ok(vec![json!({"type": "ADMM", "message": "never fetched", "created_at": 99})]),
            ]),
        };
        let paginator = HistoryPaginator::new(pages);
        let entries = collect(&paginator, 0).await;
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn page_error_ends_stream() {
        let pages = ScriptedPages {
            pages: Mutex::new(vec![
                Ok(vec![json!({"type": "ADMM", "message": "first", "created_at": 1})]),
                Err(Error::api(500, "boom")),
                Ok(vec![json!({"type": "ADMM", "message": "unreached", "created_at": 2})]),
            ]),
        };
        let paginator = HistoryPaginator::new(pages);
        let entries = collect(&paginator, 0).await;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_ok());
        assert_eq!(entries[1].as_ref().unwrap_err().status_code(), Some(500));
    }
}
