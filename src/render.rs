//! Console rendering for live messages, history, and channel listings.
//!
//! This module provides the renderer trait the stream and CLI write through, and a plain-text
//! implementation with optional ANSI styling.

use std::io::{self, Write};

use serde_json::Value;
use tracing::warn;

use crate::directory::ChannelSummary;
use crate::handshake::SessionKey;
use crate::history::HistoryEntry;

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for green text (used for the login notice).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for senders).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for blue text (used for channel names).
const ANSI_BLUE: &str = "\x1b[34m";

/// ANSI escape code for yellow text (used for unrecognized history entries).
const ANSI_YELLOW: &str = "\x1b[33m";

/// Trait for rendering archiver output.
///
/// The stream session and the one-shot commands only ever talk to a renderer, so output can be
/// styled, unstyled, or captured.
pub trait Renderer: Send {
    /// The gateway accepted our login.
    fn print_logged_in(&mut self);

    /// A live message, already resolved to display names.
    fn print_live_message(&mut self, channel: &str, sender: &str, body: &str);

    /// One entry of a channel's history.
    fn print_history_entry(&mut self, entry: &HistoryEntry);

    /// One row of the channel listing.
    fn print_channel(&mut self, channel: &ChannelSummary);

    /// The session key, in a form a shell can `eval`.
    fn print_session_key(&mut self, key: &SessionKey);

    /// Print an error message.
    fn print_error(&mut self, error: &str);
}

/// `Logged in!`
pub fn format_logged_in(use_color: bool) -> String {
    if use_color {
        format!("{ANSI_RESET}{ANSI_GREEN}Logged in!{ANSI_RESET}")
    } else {
        "Logged in!".to_string()
    }
}

/// `<channel> <sender>: <body>`
pub fn format_live_message(use_color: bool, channel: &str, sender: &str, body: &str) -> String {
    if use_color {
        format!("{ANSI_RESET}{ANSI_BLUE}{channel} {ANSI_RED}{sender}{ANSI_RESET}: {body}")
    } else {
        format!("{channel} {sender}: {body}")
    }
}

/// Admin messages print bare, user messages as `<nickname>: <body>`, anything else as an
/// explicit notice carrying the raw payload.
pub fn format_history_entry(use_color: bool, entry: &HistoryEntry) -> String {
    match entry {
        HistoryEntry::Admin { body } => body.clone(),
        HistoryEntry::User { nickname, body } if use_color => {
            format!("{ANSI_RESET}{ANSI_RED}{nickname}{ANSI_RESET}: {body}")
        }
        HistoryEntry::User { nickname, body } => format!("{nickname}: {body}"),
        HistoryEntry::Unrecognized { raw } => {
            let raw = compact(raw);
            if use_color {
                format!("{ANSI_YELLOW}unrecognized message:{ANSI_RESET} {raw}")
            } else {
                format!("unrecognized message: {raw}")
            }
        }
    }
}

fn compact(raw: &Value) -> String {
    serde_json::to_string(raw).unwrap_or_else(|_| raw.to_string())
}

/// Category, name, and URL in fixed-width columns.
pub fn format_channel(channel: &ChannelSummary) -> String {
    format!(
        "{:<12} {:<32} {}",
        channel.category_tag, channel.display_name, channel.channel_url
    )
}

/// `Error: <message>`, red when colored.
pub fn format_error(use_color: bool, error: &str) -> String {
    if use_color {
        format!("{ANSI_RED}Error: {error}{ANSI_RESET}")
    } else {
        format!("Error: {error}")
    }
}

/// `export REDDIT_SESSION_KEY=<key>`
pub fn format_session_key(key: &SessionKey) -> String {
    format!("export {}={}", crate::config::SESSION_KEY_ENV, key.as_str())
}

/// Plain text renderer with optional ANSI styling.
///
/// This renderer outputs lines to stdout unless given another writer; errors go to stderr.
pub struct PlainTextRenderer {
    out: Box<dyn Write + Send>,
    use_color: bool,
    write_failed: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(use_color, io::stdout())
    }

    /// Creates a renderer that writes its lines to `out`.
    pub fn with_writer(use_color: bool, out: impl Write + Send + 'static) -> Self {
        Self {
            out: Box::new(out),
            use_color,
            write_failed: false,
        }
    }

    /// Writes one line and flushes so streamed output shows up immediately.
    ///
    /// A failed write is logged once; later lines are still attempted.
    fn line(&mut self, text: &str) {
        let written = writeln!(self.out, "{text}").and_then(|()| self.out.flush());
        if let Err(e) = written {
            if !self.write_failed {
                warn!(error = %e, "cannot write output");
                self.write_failed = true;
            }
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_logged_in(&mut self) {
        let text = format_logged_in(self.use_color);
        self.line(&text);
    }

    fn print_live_message(&mut self, channel: &str, sender: &str, body: &str) {
        let text = format_live_message(self.use_color, channel, sender, body);
        self.line(&text);
    }

    fn print_history_entry(&mut self, entry: &HistoryEntry) {
        let text = format_history_entry(self.use_color, entry);
        self.line(&text);
    }

    fn print_channel(&mut self, channel: &ChannelSummary) {
        self.line(&format_channel(channel));
    }

    fn print_session_key(&mut self, key: &SessionKey) {
        self.line(&format_session_key(key));
    }

    fn print_error(&mut self, error: &str) {
        eprintln!("{}", format_error(self.use_color, error));
    }
}
