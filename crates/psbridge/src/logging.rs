//! Tracing subscriber setup shared by both binaries.
//!
//! Logs always go to stderr: the bridge's stdout is the protocol channel.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Filter directive for a `--log-level` value.
///
/// Unknown levels fall back to `info`; `warning` is accepted for `warn`.
pub fn filter_directive(level: &str) -> String {
    let level = match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        "off" => "off",
        _ => "info",
    };
    format!("psbridge={level}")
}

/// Install the global subscriber. `RUST_LOG`, when set, overrides `level`.
///
/// Calling this more than once keeps the first subscriber.
pub fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("psbridge: logging already initialised: {e}");
    }
}
