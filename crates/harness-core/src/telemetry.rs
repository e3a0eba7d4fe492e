//! Logging setup shared by the harness binaries.
//!
//! Everything goes to stderr; stdout is reserved for reports.

use std::io;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Directives from `RUST_LOG`, with `level` for anything they leave unset.
/// Malformed directives are dropped rather than rejected.
fn log_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy()
}

/// Install the process-wide subscriber, as plain text or as one JSON object
/// per line. Only the first call in a process has any effect.
pub fn init_tracing(json: bool, level: Level) {
    let (text, structured) = if json {
        let layer = fmt::layer().json().with_writer(io::stderr).with_target(false);
        (None, Some(layer))
    } else {
        let layer = fmt::layer().with_writer(io::stderr).with_target(false);
        (Some(layer), None)
    };

    let installed = tracing_subscriber::registry()
        .with(log_filter(level))
        .with(text)
        .with(structured)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
