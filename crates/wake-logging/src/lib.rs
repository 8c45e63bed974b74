//! # wake-logging
//!
//! Structured logging with `tracing`.
//!
//! One call to [`init_logging`] at process start wires up a
//! `tracing-subscriber` with env-filter support (`RUST_LOG` or the given
//! default directive) and optional JSON output for log shippers. Library
//! crates only ever emit `tracing` events; they never install subscribers.

#![deny(unsafe_code)]

use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable compact lines (default).
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Initialize the global tracing subscriber.
///
/// `default_directive` is used when `RUST_LOG` is unset (e.g. `"wake=info"`).
/// Returns `false` if a global subscriber was already installed (tests set
/// their own), `true` on success.
pub fn init_logging(default_directive: &str, format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}
