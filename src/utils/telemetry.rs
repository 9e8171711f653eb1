//! Telemetry and structured logging setup.
//!
//! Verbosity comes from RUST_LOG when set. Otherwise the default is INFO
//! for dependencies and DEBUG for this crate, or DEBUG everywhere when
//! debug logging is requested.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "info,kalshi_bot=debug";
const DEBUG_FILTER: &str = "debug";

/// Builds the filter: RUST_LOG wins, then the debug flag, then the default.
pub fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(debug))
}

fn default_filter(debug: bool) -> EnvFilter {
    EnvFilter::new(if debug { DEBUG_FILTER } else { DEFAULT_FILTER })
}

/// Installs the global subscriber. Call once, at startup.
///
/// Example RUST_LOG values:
/// - `info` - all info and above
/// - `kalshi_bot=trace,hyper=warn` - trace for us, warn for the HTTP stack
pub fn init_telemetry(format: LogFormat, debug: bool) {
    let registry = tracing_subscriber::registry().with(env_filter(debug));

    match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_file(false)
                    .with_line_number(false)
                    .compact(),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .init(),
    }
}
