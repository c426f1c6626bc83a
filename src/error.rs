//! Error types for the chat archiver.
//!
//! Every fallible operation in the crate returns [`Error`].  Login and handshake failures are
//! fatal, REST failures are fatal for the call that produced them, and transport failures carry
//! a [`TransportErrorKind`] that the stream session uses to decide whether to reconnect.

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

use tokio_tungstenite::tungstenite;

/// Classification of a streaming transport failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// A read, connect, or keepalive deadline elapsed.
    Timeout,
    /// The peer closed the connection (cleanly or not).
    ConnectionClosed,
    /// The gateway host could not be resolved.
    AddressResolution,
    /// Any other network-level connectivity failure.
    Connectivity,
    /// The peer violated the websocket protocol.
    Protocol,
    /// The gateway refused the connection outright.
    Rejected,
}

impl TransportErrorKind {
    /// Returns true if a session should reconnect after this kind of failure.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            TransportErrorKind::Timeout
                | TransportErrorKind::ConnectionClosed
                | TransportErrorKind::AddressResolution
                | TransportErrorKind::Connectivity
        )
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::ConnectionClosed => "connection closed",
            TransportErrorKind::AddressResolution => "address resolution",
            TransportErrorKind::Connectivity => "connectivity",
            TransportErrorKind::Protocol => "protocol",
            TransportErrorKind::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// The main error type for the chat archiver.
#[derive(Clone, Debug)]
pub enum Error {
    /// A REST call returned a non-success status.
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// One of the login hops did not yield the expected artifact.
    Authentication {
        /// Human-readable error message.
        message: String,
    },

    /// The session-key handshake did not produce a parseable payload.
    Handshake {
        /// Human-readable error message.
        message: String,
    },

    /// The backend no longer accepts our credentials; log in again.
    SessionExpired {
        /// Human-readable error message.
        message: String,
    },

    /// The streaming connection failed.
    Transport {
        /// What kind of failure this was.
        kind: TransportErrorKind,
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// The operation was stopped on purpose.
    Abort {
        /// Human-readable error message.
        message: String,
    },

    /// Required configuration is missing or invalid.
    Configuration {
        /// Human-readable error message.
        message: String,
        /// Flag or variable that was at fault.
        param: Option<String>,
    },

    /// Error during JSON serialization or deserialization.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// HTTP client error.
    HttpClient {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A URL parsing or manipulation error.
    Url {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<url::ParseError>,
    },

    /// Encoding/decoding error.
    Encoding {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new API error.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a new authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Error::Authentication {
            message: message.into(),
        }
    }

    /// Creates a new handshake error.
    pub fn handshake(message: impl Into<String>) -> Self {
        Error::Handshake {
            message: message.into(),
        }
    }

    /// Creates a new session-expired error.
    pub fn session_expired(message: impl Into<String>) -> Self {
        Error::SessionExpired {
            message: message.into(),
        }
    }

    /// Creates a new transport error.
    pub fn transport(
        kind: TransportErrorKind,
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Transport {
            kind,
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new abort error.
    pub fn abort(message: impl Into<String>) -> Self {
        Error::Abort {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    pub fn configuration(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            param,
        }
    }

    /// Creates a new serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new HTTP client error.
    pub fn http_client(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::HttpClient {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new URL error.
    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    /// Creates a new encoding error.
    pub fn encoding(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Encoding {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Returns true if this error is related to authentication.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }

    /// Returns true if this error is a handshake failure.
    pub fn is_handshake(&self) -> bool {
        matches!(self, Error::Handshake { .. })
    }

    /// Returns true if the credentials must be re-derived before continuing.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::SessionExpired { .. })
    }

    /// Returns true if this error is an abort.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Abort { .. })
    }

    /// Returns true if this error is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }

    /// Returns the transport classification, if this is a transport error.
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Error::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true if a stream session should reconnect after this error.
    ///
    /// Only transport errors of a recoverable kind qualify; everything else ends the session.
    pub fn is_recoverable(&self) -> bool {
        self.transport_kind()
            .is_some_and(TransportErrorKind::is_recoverable)
    }

    /// Returns the status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Api {
                status_code,
                message,
            } => {
                write!(f, "API error ({status_code}): {message}")
            }
            Error::Authentication { message } => {
                write!(f, "Authentication error: {message}")
            }
            Error::Handshake { message } => {
                write!(f, "Handshake error: {message}")
            }
            Error::SessionExpired { message } => {
                write!(f, "Session expired, log in again: {message}")
            }
            Error::Transport { kind, message, .. } => {
                write!(f, "Transport error ({kind}): {message}")
            }
            Error::Abort { message } => {
                write!(f, "Aborted: {message}")
            }
            Error::Configuration { message, param } => {
                if let Some(param) = param {
                    write!(f, "Configuration error: {message} (parameter: {param})")
                } else {
                    write!(f, "Configuration error: {message}")
                }
            }
            Error::Serialization { message, .. } => {
                write!(f, "Serialization error: {message}")
            }
            Error::HttpClient { message, .. } => {
                write!(f, "HTTP client error: {message}")
            }
            Error::Url { message, .. } => {
                write!(f, "URL error: {message}")
            }
            Error::Encoding { message, .. } => {
                write!(f, "Encoding error: {message}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Transport { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Serialization { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::HttpClient { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Url { source, .. } => {
                source.as_ref().map(|e| e as &(dyn error::Error + 'static))
            }
            Error::Encoding { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(format!("URL parse error: {err}"), Some(err))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        use tungstenite::error::{ProtocolError, UrlError};

        let kind = match &err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportErrorKind::ConnectionClosed
            }
            tungstenite::Error::Io(e) => classify_io(e),
            tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                TransportErrorKind::ConnectionClosed
            }
            tungstenite::Error::Protocol(_) => TransportErrorKind::Protocol,
            tungstenite::Error::Url(UrlError::UnableToConnect(_)) => {
                TransportErrorKind::AddressResolution
            }
            tungstenite::Error::Http(response) => {
                let status = response.status().as_u16();
                if status == 401 || status == 403 {
                    return Error::session_expired(format!(
                        "gateway refused the access token ({status})"
                    ));
                }
                TransportErrorKind::Rejected
            }
            _ => TransportErrorKind::Rejected,
        };
        Error::transport(kind, err.to_string(), Some(Box::new(err)))
    }
}

/// Map a socket-level failure onto the transport taxonomy.
pub(crate) fn classify_io(err: &io::Error) -> TransportErrorKind {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportErrorKind::Timeout,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => TransportErrorKind::ConnectionClosed,
        _ => {
            // getaddrinfo failures surface as untyped io errors.
            let text = err.to_string().to_ascii_lowercase();
            if text.contains("lookup")
                || text.contains("resolve")
                || text.contains("name or service")
            {
                TransportErrorKind::AddressResolution
            } else {
                TransportErrorKind::Connectivity
            }
        }
    }
}

/// A specialized Result type for archiver operations.
pub type Result<T> = std::result::Result<T, Error>;
