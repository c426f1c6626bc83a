//! The long-lived gateway connection.
//!
//! A [`StreamSession`] keeps exactly one websocket open at a time.  It pings on a fixed interval
//! and declares the connection dead when a pong does not come back in time.  When the connection
//! drops for a recoverable reason it sleeps and reconnects, forever.  Anything else ends the run.
//!
//! ```text
//! Connecting ──ok──▶ Open ──drop/timeout──▶ Closed ──recoverable──▶ Reconnecting(n) ──sleep──▶ Connecting
//!      │                                       ▲           │
//!      └──────────────connect failed───────────┘           └──fatal──▶ run returns
//! ```

use std::fmt;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::directory::ChannelIndex;
use crate::error::{Error, Result, TransportErrorKind};
use crate::frame::InboundFrame;
use crate::observability::{
    STREAM_BACKOFF, STREAM_CONNECTS, STREAM_ERRORS, STREAM_FRAMES, STREAM_PING_TIMEOUTS,
    STREAM_RECONNECTS,
};
use crate::render::Renderer;

type GatewaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Exponential reconnect delay: `min(max, base * 2^(attempt - 1))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(15),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).  Attempt 0 does not wait.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        1u32.checked_shl(attempt - 1)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Timing knobs for a [`StreamSession`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// How often to ping an open connection.
    pub keepalive_interval: Duration,
    /// How long to wait for the pong after a ping.
    pub pong_timeout: Duration,
    /// Upper bound on the websocket upgrade.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(60),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl StreamOptions {
    pub fn with_keepalive(mut self, interval: Duration, pong_timeout: Duration) -> Self {
        self.keepalive_interval = interval;
        self.pong_timeout = pong_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Where a session is in its connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamConnectionState {
    Connecting,
    Open,
    /// The connection ended, or never opened; `reason` is the classified failure.
    Closed { reason: String },
    /// Waiting before reconnect attempt `attempt`.
    Reconnecting { attempt: u32 },
}

impl fmt::Display for StreamConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamConnectionState::Connecting => write!(f, "connecting"),
            StreamConnectionState::Open => write!(f, "open"),
            StreamConnectionState::Closed { reason } => write!(f, "closed ({reason})"),
            StreamConnectionState::Reconnecting { attempt } => {
                write!(f, "reconnecting (attempt {attempt})")
            }
        }
    }
}

/// Receives what a [`StreamSession`] reads.
///
/// Returning an error from `on_frame` ends the session with that error; use [`Error::abort`] to
/// stop on purpose.
pub trait FrameHandler: Send {
    /// Called for every inbound frame, including ones the session does not understand.
    fn on_frame(&mut self, frame: InboundFrame) -> Result<()>;

    /// Called on every lifecycle transition.
    fn on_state(&mut self, state: &StreamConnectionState) {
        _ = state;
    }
}

/// Keeps one gateway connection alive and feeds its frames to a handler.
#[derive(Debug, Clone, Default)]
pub struct StreamSession {
    options: StreamOptions,
}

impl StreamSession {
    pub fn new(options: StreamOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Stream from `gateway_url` until something fatal happens.
    ///
    /// Recoverable transport failures never surface: they are retried with backoff and no
    /// attempt cap.  The returned error is the reason the session had to stop.
    pub async fn run<H: FrameHandler>(&self, gateway_url: &Url, handler: &mut H) -> Error {
        let mut attempt: u32 = 0;
        loop {
            handler.on_state(&StreamConnectionState::Connecting);
            let failure = match self.connect(gateway_url).await {
                Ok(ws) => {
                    STREAM_CONNECTS.click();
                    attempt = 0;
                    info!("gateway connection open");
                    handler.on_state(&StreamConnectionState::Open);
                    self.pump(ws, handler).await
                }
                Err(e) => e,
            };
            STREAM_ERRORS.click();
            handler.on_state(&StreamConnectionState::Closed {
                reason: failure.to_string(),
            });
            if !failure.is_recoverable() {
                error!(error = %failure, "stream stopped");
                return failure;
            }

            attempt = attempt.saturating_add(1);
            handler.on_state(&StreamConnectionState::Reconnecting { attempt });
            let delay = self.options.reconnect.delay(attempt);
            STREAM_RECONNECTS.click();
            STREAM_BACKOFF.add(delay.as_secs_f64());
            warn!(
                error = %failure,
                attempt,
                delay_secs = delay.as_secs_f64(),
                "gateway connection lost, reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect(&self, gateway_url: &Url) -> Result<GatewaySocket> {
        debug!(host = gateway_url.host_str().unwrap_or_default(), "connecting to gateway");
        let (ws, _) = tokio::time::timeout(
            self.options.connect_timeout,
            connect_async(gateway_url.as_str()),
        )
        .await
        .map_err(|_| {
            Error::transport(
                TransportErrorKind::Timeout,
                "Timeout connecting to gateway",
                None,
            )
        })??;
        Ok(ws)
    }

    /// Read frames and keep the connection alive until it fails.  Always yields the failure.
    async fn pump<H: FrameHandler>(&self, ws: GatewaySocket, handler: &mut H) -> Error {
        let (mut sink, mut source) = ws.split();
        let interval = self.options.keepalive_interval;
        let mut keepalive = tokio::time::interval_at(Instant::now() + interval, interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let deadline = pong_deadline;
            let outcome = tokio::select! {
                msg = source.next() => match msg {
                    None => Err(Error::transport(
                        TransportErrorKind::ConnectionClosed,
                        "gateway ended the stream",
                        None,
                    )),
                    Some(Err(e)) => Err(e.into()),
                    Some(Ok(Message::Text(text))) => dispatch(handler, &text),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => dispatch(handler, &text),
                        Err(e) => {
                            warn!(error = %e, "dropping non-UTF-8 frame");
                            Ok(())
                        }
                    },
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                        Ok(())
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(f) => {
                                format!("gateway closed the connection: {} {}", f.code, f.reason)
                            }
                            None => "gateway closed the connection".to_string(),
                        };
                        Err(Error::transport(TransportErrorKind::ConnectionClosed, reason, None))
                    }
                    Some(Ok(_)) => Ok(()),
                },
                _ = keepalive.tick() => {
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + self.options.pong_timeout);
                    }
                    sink.send(Message::Ping(Vec::new())).await.map_err(Error::from)
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    STREAM_PING_TIMEOUTS.click();
                    Err(Error::transport(
                        TransportErrorKind::Timeout,
                        format!(
                            "no pong within {}s of a ping",
                            self.options.pong_timeout.as_secs_f64()
                        ),
                        None,
                    ))
                }
            };
            if let Err(e) = outcome {
                let _ = sink.close().await;
                return e;
            }
        }
    }
}

/// Parse one frame and hand it to the handler.
fn dispatch<H: FrameHandler>(handler: &mut H, text: &str) -> Result<()> {
    STREAM_FRAMES.click();
    let frame = InboundFrame::parse(text);
    match &frame {
        InboundFrame::Error(e) if e.is_auth_failure() => {
            return Err(Error::session_expired(format!(
                "gateway error {}: {}",
                e.code, e.message
            )));
        }
        InboundFrame::Error(e) => warn!(code = e.code, message = %e.message, "gateway error"),
        InboundFrame::Malformed { tag, reason } => {
            warn!(tag = %tag, reason = %reason, "dropping malformed frame")
        }
        InboundFrame::Unknown { tag } => debug!(tag = %tag, "ignoring frame"),
        InboundFrame::LoginAck | InboundFrame::Message(_) => {}
    }
    handler.on_frame(frame)
}

/// Prints live traffic to a renderer, naming channels from an index captured at startup.
pub struct LiveConsole<R> {
    channels: ChannelIndex,
    renderer: R,
}

impl<R: Renderer> LiveConsole<R> {
    pub fn new(channels: ChannelIndex, renderer: R) -> Self {
        Self { channels, renderer }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }
}

impl<R: Renderer> FrameHandler for LiveConsole<R> {
    fn on_frame(&mut self, frame: InboundFrame) -> Result<()> {
        match frame {
            InboundFrame::LoginAck => self.renderer.print_logged_in(),
            InboundFrame::Message(message) => {
                let channel = self.channels.display_name(&message.channel_url);
                self.renderer
                    .print_live_message(channel, &message.sender, &message.body);
            }
            _ => {}
        }
        Ok(())
    }

    fn on_state(&mut self, state: &StreamConnectionState) {
        debug!(%state, "stream state");
    }
}
