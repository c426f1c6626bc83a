//! Configuration for the archiver.
//!
//! This module provides CLI argument parsing via `arrrg`, the environment fallbacks for
//! credentials, and [`BackendConfig`], which carries every endpoint and identifier the backend
//! needs so that a fake backend can be swapped in.

use std::time::Duration;

use arrrg_derive::CommandLine;
use url::Url;

use crate::error::{Error, Result};
use crate::handshake::SessionKey;
use crate::login::{AccessToken, Credentials};

/// Identity-provider login form endpoint.
pub const DEFAULT_LOGIN_URL: &str = "https://www.reddit.com/post/login";

/// Page whose script blob embeds the scoped token and user id.
pub const DEFAULT_CHAT_PAGE_URL: &str = "https://www.reddit.com/chat/";

/// Endpoint that trades the scoped token for a backend access token.
pub const DEFAULT_TOKEN_EXCHANGE_URL: &str = "https://s.reddit.com/api/v1/sendbird/me";

/// REST base for channel and message calls.
pub const DEFAULT_API_URL: &str = "https://sendbirdproxyk8s.chat.redditmedia.com";

/// Streaming gateway.
pub const DEFAULT_GATEWAY_URL: &str = "wss://sendbirdproxyk8s.chat.redditmedia.com/";

/// Reddit's application identifier on the chat backend.
pub const DEFAULT_APP_ID: &str = "2515BDA8-9D3A-47CF-9325-330BC37ADA13";

const DEFAULT_PROTOCOL_VERSION: &str = "29";
const DEFAULT_SDK_VERSION: &str = "3.0.82";
const DEFAULT_USER_AGENT: &str = "Firefox";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub const USERNAME_ENV: &str = "REDDIT_USERNAME";
pub const PASSWORD_ENV: &str = "REDDIT_PASSWORD";
pub const TWOFA_ENV: &str = "REDDIT_2FA";
pub const SESSION_KEY_ENV: &str = "REDDIT_SESSION_KEY";

/// Command-line arguments for the reddit-chat-archiver tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ArchiverArgs {
    /// Reddit username.
    #[arrrg(optional, "Reddit username (default: $REDDIT_USERNAME)", "USER")]
    pub username: Option<String>,

    /// Reddit password.
    #[arrrg(optional, "Reddit password (default: $REDDIT_PASSWORD)", "PASSWORD")]
    pub password: Option<String>,

    /// Second-factor code.
    #[arrrg(optional, "Reddit 2FA code (default: $REDDIT_2FA)", "CODE")]
    pub twofa: Option<String>,

    /// Session key for the REST commands.
    #[arrrg(optional, "Session-Key (default: $REDDIT_SESSION_KEY)", "KEY")]
    pub key: Option<String>,

    #[arrrg(flag, "Print extra traces (INFO level)")]
    pub verbose: bool,

    #[arrrg(flag, "Print debug traces (DEBUG level)")]
    pub debug: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    #[arrrg(optional, "Override the chat REST base URL", "URL")]
    pub api_url: Option<String>,

    #[arrrg(optional, "Override the streaming gateway URL", "URL")]
    pub gateway_url: Option<String>,
}

/// Endpoints and identifiers of the chat backend.
///
/// These are fixed for the real service; tests point them at local fakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub login_url: String,
    pub chat_page_url: String,
    pub token_exchange_url: String,
    pub api_url: String,
    pub gateway_url: String,
    pub app_id: String,
    pub protocol_version: String,
    pub sdk_version: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl BackendConfig {
    /// Creates a configuration pointing at the production service.
    pub fn new() -> Self {
        Self {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            chat_page_url: DEFAULT_CHAT_PAGE_URL.to_string(),
            token_exchange_url: DEFAULT_TOKEN_EXCHANGE_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            app_id: DEFAULT_APP_ID.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            sdk_version: DEFAULT_SDK_VERSION.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the three login-hop endpoints.
    pub fn with_login_urls(
        mut self,
        login_url: impl Into<String>,
        chat_page_url: impl Into<String>,
        token_exchange_url: impl Into<String>,
    ) -> Self {
        self.login_url = login_url.into();
        self.chat_page_url = chat_page_url.into();
        self.token_exchange_url = token_exchange_url.into();
        self
    }

    /// Sets the REST base URL.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Sets the streaming gateway URL.
    pub fn with_gateway_url(mut self, gateway_url: impl Into<String>) -> Self {
        self.gateway_url = gateway_url.into();
        self
    }

    /// Sets the application identifier.
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    /// Sets the HTTP request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the gateway URL for one identity.
    ///
    /// The same URL serves both the one-shot key handshake and the long-lived stream.
    pub fn gateway_url_for(&self, user_id: &str, access_token: &AccessToken) -> Result<Url> {
        let mut url = Url::parse(&self.gateway_url)?;
        url.query_pairs_mut()
            .append_pair("p", "_")
            .append_pair("pv", &self.protocol_version)
            .append_pair("sv", &self.sdk_version)
            .append_pair("ai", &self.app_id)
            .append_pair("user_id", user_id)
            .append_pair("access_token", access_token.as_str());
        Ok(url)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolved configuration after merging flags, environment, and defaults.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub twofa: Option<String>,
    pub session_key: Option<String>,
    /// 0 = warnings, 1 = info, 2 = debug.
    pub verbosity: u8,
    pub use_color: bool,
    pub backend: BackendConfig,
}

impl ArchiverConfig {
    /// Merge parsed flags with values from `env`; flags win.
    pub fn from_args_with_env<F>(args: ArchiverArgs, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |value: Option<String>, var: &str| {
            value
                .or_else(|| env(var))
                .filter(|value| !value.is_empty())
        };
        let mut backend = BackendConfig::new();
        if let Some(api_url) = args.api_url {
            backend = backend.with_api_url(api_url);
        }
        if let Some(gateway_url) = args.gateway_url {
            backend = backend.with_gateway_url(gateway_url);
        }
        let verbosity = if args.debug {
            2
        } else if args.verbose {
            1
        } else {
            0
        };
        ArchiverConfig {
            username: lookup(args.username, USERNAME_ENV),
            password: lookup(args.password, PASSWORD_ENV),
            twofa: lookup(args.twofa, TWOFA_ENV),
            session_key: lookup(args.key, SESSION_KEY_ENV),
            verbosity,
            use_color: !args.no_color,
            backend,
        }
    }

    /// Returns the login credentials, or a configuration error naming what is missing.
    pub fn credentials(&self) -> Result<Credentials> {
        let username = self.username.clone().ok_or_else(|| {
            Error::configuration(
                format!("username required (or set {USERNAME_ENV})"),
                Some("--username".to_string()),
            )
        })?;
        let password = self.password.clone().ok_or_else(|| {
            Error::configuration(
                format!("password required (or set {PASSWORD_ENV})"),
                Some("--password".to_string()),
            )
        })?;
        Ok(Credentials::new(username, password, self.twofa.clone()))
    }

    /// Returns the session key for REST-only commands.
    pub fn session_key(&self) -> Result<SessionKey> {
        self.session_key
            .clone()
            .map(SessionKey::new)
            .ok_or_else(|| {
                Error::configuration(
                    format!("session key required (or set {SESSION_KEY_ENV})"),
                    Some("--key".to_string()),
                )
            })
    }
}

impl From<ArchiverArgs> for ArchiverConfig {
    fn from(args: ArchiverArgs) -> Self {
        Self::from_args_with_env(args, |var| std::env::var(var).ok())
    }
}

/// The operation selected by the first free argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Log in and print live messages until killed.
    Stream,
    /// Log in and print an exportable session key.
    DumpSessionKey,
    /// List the channels visible to a session key.
    ListGroupChannels,
    /// Print the full history of one channel.
    GetGroupChannel { channel_url: String },
}

impl Command {
    /// Parse the free arguments left over after flag parsing.
    pub fn from_free_args(free: &[String]) -> Result<Self> {
        let usage = || {
            Error::configuration(
                "expected one of: stream, dump-session-key, list-group-channels, get-group-channel <channel_url>",
                None,
            )
        };
        let (name, rest) = free.split_first().ok_or_else(usage)?;
        let command = match name.as_str() {
            "stream" => Command::Stream,
            "dump-session-key" => Command::DumpSessionKey,
            "list-group-channels" => Command::ListGroupChannels,
            "get-group-channel" => {
                let channel_url = rest.first().cloned().ok_or_else(|| {
                    Error::configuration(
                        "get-group-channel needs a channel URL",
                        Some("channel_url".to_string()),
                    )
                })?;
                return Ok(Command::GetGroupChannel { channel_url });
            }
            _ => return Err(usage()),
        };
        if !rest.is_empty() {
            return Err(Error::configuration(
                format!("unexpected arguments after {name}: {}", rest.join(" ")),
                None,
            ));
        }
        Ok(command)
    }
}
