//! Command-line archiver for Reddit chat.
//!
//! # Usage
//!
//! ```bash
//! # Log in and print live messages until killed
//! reddit-chat-archiver --username me --password hunter2 stream
//!
//! # Log in once and keep the session key for REST-only commands
//! eval "$(reddit-chat-archiver dump-session-key)"
//!
//! # List channels, then print one channel's history
//! reddit-chat-archiver list-group-channels
//! reddit-chat-archiver get-group-channel sendbird_group_channel_1234_ab
//! ```
//!
//! Credentials fall back to `REDDIT_USERNAME`, `REDDIT_PASSWORD` and `REDDIT_2FA`; the session
//! key falls back to `REDDIT_SESSION_KEY`.

use arrrg::CommandLine;
use futures::StreamExt;
use tracing::warn;

use reddit_chat_archiver::logging;
use reddit_chat_archiver::{
    ArchiverArgs, ArchiverConfig, BackendIdentity, ChannelDirectory, ChatApi, Command,
    CredentialExchange, Error, HistoryPaginator, LiveConsole, PlainTextRenderer, Renderer, Result,
    SessionKey, SessionKeyNegotiator, StreamOptions, StreamSession,
};

const USAGE: &str = "reddit-chat-archiver [OPTIONS] <stream|dump-session-key|list-group-channels|get-group-channel <CHANNEL_URL>>";

#[tokio::main]
async fn main() {
    let (args, free) = ArchiverArgs::from_command_line_relaxed(USAGE);
    let config = ArchiverConfig::from(args);
    let use_color = config.use_color;
    if let Err(e) = run(config, &free).await {
        PlainTextRenderer::with_color(use_color).print_error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(config: ArchiverConfig, free: &[String]) -> Result<()> {
    let command = Command::from_free_args(free)?;
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    if let Err(e) = logging::init(config.verbosity) {
        renderer.print_error(&e.to_string());
    }
    match command {
        Command::Stream => stream(&config, renderer).await,
        Command::DumpSessionKey => {
            let key = login(&config).await?.0;
            renderer.print_session_key(&key);
            Ok(())
        }
        Command::ListGroupChannels => {
            let api = ChatApi::new(&config.backend, config.session_key()?)?;
            for channel in ChannelDirectory::new(&api).list().await? {
                renderer.print_channel(&channel);
            }
            Ok(())
        }
        Command::GetGroupChannel { channel_url } => {
            let api = ChatApi::new(&config.backend, config.session_key()?)?;
            let paginator = HistoryPaginator::new(api);
            let mut entries = Box::pin(paginator.fetch(&channel_url, 0));
            while let Some(entry) = entries.next().await {
                renderer.print_history_entry(&entry?);
            }
            Ok(())
        }
    }
}

/// Run the three-hop login and the gateway handshake.
async fn login(config: &ArchiverConfig) -> Result<(SessionKey, BackendIdentity)> {
    let credentials = config.credentials()?;
    let identity = CredentialExchange::new(config.backend.clone())?
        .exchange(&credentials)
        .await?;
    let key = SessionKeyNegotiator::new(config.backend.clone())
        .negotiate_for(&identity)
        .await?;
    Ok((key, identity))
}

async fn stream(config: &ArchiverConfig, renderer: PlainTextRenderer) -> Result<()> {
    let (key, identity) = login(config).await?;
    let api = ChatApi::new(&config.backend, key)?;
    let channels = ChannelDirectory::new(&api).index().await?;
    if channels.is_empty() {
        warn!("no channels visible; live messages will be labelled by channel URL");
    }
    let gateway_url = config
        .backend
        .gateway_url_for(&identity.user_id, &identity.access_token)?;
    let mut console = LiveConsole::new(channels, renderer);
    let session = StreamSession::new(StreamOptions::default());
    let stopped: Error = session.run(&gateway_url, &mut console).await;
    Err(stopped)
}
