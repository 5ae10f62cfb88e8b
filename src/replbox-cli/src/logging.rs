//! Diagnostic logging.
//!
//! stdout carries the protocol, so every log line goes to stderr.

use tracing_subscriber::EnvFilter;

use crate::args::LogLevel;

/// Crates whose events follow the selected level; everything else logs errors only.
const REPLBOX_CRATES: &[&str] = &[
    "replbox",
    "replbox_cli",
    "replbox_exec",
    "replbox_protocol",
];

/// Filter directives for `level`.
pub fn filter_directives(level: LogLevel) -> String {
    let mut directives = String::from("error");
    for krate in REPLBOX_CRATES {
        directives.push_str(&format!(",{krate}={}", level.as_filter_str()));
    }
    directives
}

/// Build the filter: an explicit level wins, then `RUST_LOG`, then the default.
pub fn build_filter(level: Option<LogLevel>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::new(filter_directives(level)),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_directives(LogLevel::default()))),
    }
}

/// Install the global subscriber.
pub fn init_logging(level: Option<LogLevel>) {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .init();
}
