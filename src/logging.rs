//! Diagnostic logging to stderr.
//!
//! Console output (messages, listings) goes to stdout through the renderer; everything here is
//! for the operator.

use time::macros::format_description;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;

use crate::error::{Error, Result};

/// Filter directive for a verbosity level: 0 is warnings only, 1 adds info, 2 and up add debug.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when it is set and parses; otherwise `verbosity` picks the level.  Fails if a
/// subscriber is already installed.
pub fn init(verbosity: u8) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let timer = UtcTime::new(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    ));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(timer)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| Error::configuration(format!("cannot install logger: {e}"), None))
}
