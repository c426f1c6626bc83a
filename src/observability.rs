use biometrics::{Collector, Counter, Moments};

pub(crate) static LOGIN_HOPS: Counter = Counter::new("reddit_chat_archiver.login.hops");
pub(crate) static LOGIN_FAILURES: Counter = Counter::new("reddit_chat_archiver.login.failures");
pub(crate) static HANDSHAKES: Counter = Counter::new("reddit_chat_archiver.handshake.attempts");

pub(crate) static HTTP_REQUESTS: Counter = Counter::new("reddit_chat_archiver.http.requests");
pub(crate) static HTTP_REQUEST_ERRORS: Counter =
    Counter::new("reddit_chat_archiver.http.request_errors");
pub(crate) static HTTP_REQUEST_DURATION: Moments =
    Moments::new("reddit_chat_archiver.http.request_duration_seconds");

pub(crate) static STREAM_CONNECTS: Counter = Counter::new("reddit_chat_archiver.stream.connects");
pub(crate) static STREAM_RECONNECTS: Counter =
    Counter::new("reddit_chat_archiver.stream.reconnects");
pub(crate) static STREAM_FRAMES: Counter = Counter::new("reddit_chat_archiver.stream.frames");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("reddit_chat_archiver.stream.errors");
pub(crate) static STREAM_PING_TIMEOUTS: Counter =
    Counter::new("reddit_chat_archiver.stream.ping_timeouts");
pub(crate) static STREAM_BACKOFF: Moments =
    Moments::new("reddit_chat_archiver.stream.backoff_seconds");

pub(crate) static HISTORY_PAGES: Counter = Counter::new("reddit_chat_archiver.history.pages");
pub(crate) static HISTORY_MESSAGES: Counter =
    Counter::new("reddit_chat_archiver.history.messages");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&LOGIN_HOPS);
    collector.register_counter(&LOGIN_FAILURES);
    collector.register_counter(&HANDSHAKES);

    collector.register_counter(&HTTP_REQUESTS);
    collector.register_counter(&HTTP_REQUEST_ERRORS);
    collector.register_moments(&HTTP_REQUEST_DURATION);

    collector.register_counter(&STREAM_CONNECTS);
    collector.register_counter(&STREAM_RECONNECTS);
    collector.register_counter(&STREAM_FRAMES);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_PING_TIMEOUTS);
    collector.register_moments(&STREAM_BACKOFF);

    collector.register_counter(&HISTORY_PAGES);
    collector.register_counter(&HISTORY_MESSAGES);
}
