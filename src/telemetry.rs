//! Logging setup for the `dynarag` binary.
//!
//! Events go to **stderr** so stdout stays parseable. The filter comes from
//! `RUST_LOG` when set, otherwise [`DEFAULT_FILTER`].

use std::io::{self, IsTerminal};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "dynarag=info";

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_ansi(io::stderr().is_terminal())
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}
