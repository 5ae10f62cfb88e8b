//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Log verbosity level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Only show errors
    Error,
    /// Show warnings and errors (default)
    #[default]
    Warn,
    /// Also show one line per executed command
    Info,
    /// Show debug messages and above
    Debug,
    /// Show all messages including trace-level details
    Trace,
}

impl LogLevel {
    /// Convert to tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<LogLevel> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// replbox - run untrusted shell commands, one per line, as a confined user.
///
/// Reads commands from stdin and answers each with ` OUTPUT <line>` lines
/// followed by `EOF` on stdout. Diagnostics go to stderr.
#[derive(Debug, Parser)]
#[command(name = "replbox")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', env = "REPLBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Account commands run as
    #[arg(long, short = 'u', help_heading = "Sandbox")]
    pub user: Option<String>,

    /// Wall-clock timeout per command, in milliseconds
    #[arg(long = "timeout-ms", help_heading = "Sandbox")]
    pub timeout_ms: Option<u64>,

    /// Maximum number of processes of the sandbox user
    #[arg(long = "max-processes", help_heading = "Sandbox")]
    pub max_processes: Option<u64>,

    /// Maximum CPU seconds per process
    #[arg(long = "max-cpu-seconds", help_heading = "Sandbox")]
    pub max_cpu_seconds: Option<u64>,

    /// Maximum address space per process, in bytes
    #[arg(long = "max-address-space", help_heading = "Sandbox")]
    pub max_address_space_bytes: Option<u64>,

    /// Maximum characters of output reported per command
    #[arg(long = "max-output", help_heading = "Sandbox")]
    pub max_output_length: Option<usize>,

    /// Do not touch the hosts file, the startup file or the working directory
    #[arg(long = "skip-bootstrap", help_heading = "Startup")]
    pub skip_bootstrap: bool,

    /// Do not harden the supervisor process (debugging only)
    #[arg(long = "no-harden", help_heading = "Startup")]
    pub no_harden: bool,

    /// Set log verbosity level (error, warn, info, debug, trace)
    #[arg(long = "log-level", short = 'L', value_enum, help_heading = "Debugging")]
    pub log_level: Option<LogLevel>,
}

impl Cli {
    /// Log level from the flag, then `REPLBOX_LOG_LEVEL`.
    ///
    /// `None` leaves the choice to `RUST_LOG`.
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        self.log_level.or_else(|| {
            std::env::var("REPLBOX_LOG_LEVEL")
                .ok()
                .and_then(|level| LogLevel::from_str_loose(&level))
        })
    }
}
