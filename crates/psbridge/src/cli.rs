//! Command-line pieces shared by the `psbridge` and `psbridge-listener` binaries.

use std::time::Duration;

use crate::logging::LogFormat;

#[derive(Debug, Clone, clap::Args)]
pub struct LogArgs {
    /// Log level for psbridge targets (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(long, env = "PSBRIDGE_LOG", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl LogArgs {
    pub fn init(&self) {
        crate::logging::init_tracing(&self.log_level, self.log_format);
    }
}

/// Parse a non-negative number of seconds, fractions allowed.
pub fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    Duration::try_from_secs_f64(seconds).map_err(|_| format!("'{value}' is not a valid duration"))
}
