// Public modules
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod history;
pub mod logging;
pub mod login;
pub mod observability;
pub mod render;
pub mod stream;

// Re-exports
pub use client::ChatApi;
pub use config::{ArchiverArgs, ArchiverConfig, BackendConfig, Command};
pub use directory::{ChannelDirectory, ChannelIndex, ChannelSummary};
pub use error::{Error, Result, TransportErrorKind};
pub use frame::{InboundFrame, LiveMessage};
pub use handshake::{SessionKey, SessionKeyNegotiator};
pub use history::{HistoryEntry, HistoryPaginator, MessagePages};
pub use login::{AccessToken, BackendIdentity, CredentialExchange, Credentials};
pub use observability::register_biometrics;
pub use render::{PlainTextRenderer, Renderer};
pub use stream::{
    FrameHandler, LiveConsole, ReconnectPolicy, StreamConnectionState, StreamOptions,
    StreamSession,
};
