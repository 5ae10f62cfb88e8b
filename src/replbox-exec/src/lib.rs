//! Replbox Exec - Confined execution of untrusted shell commands.
//!
//! Every command runs as a fixed unprivileged account, with kernel-enforced
//! ceilings on process count and CPU time, under a wall-clock timeout. When
//! the timeout fires, every process owned by the sandbox account is swept
//! away before the output is collected.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Supervisor                          │
//! ├──────────────┬──────────────────┬────────────┬───────────┤
//! │   Launcher   │  ResourceLimits  │   Reaper   │  output   │
//! │ (sudo+script)│  (pre-exec hook) │ (escalate) │ (collect) │
//! └──────────────┴──────────────────┴────────────┴───────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use replbox_exec::{ResourceLimits, SandboxIdentity, Supervisor};
//!
//! let identity = SandboxIdentity::lookup("katbot")?;
//! let supervisor = Supervisor::new(identity, ResourceLimits::default());
//!
//! let captured = supervisor.execute("echo hi").await;
//! assert_eq!(captured.lines, vec!["hi".to_string()]);
//! ```

mod error;
pub mod identity;
pub mod launcher;
pub mod limits;
pub mod output;
pub mod reaper;
mod supervisor;

#[cfg(test)]
mod tests;

use std::time::Duration;

pub use error::{ExecError, Result};
pub use identity::{Account, SandboxIdentity};
pub use launcher::{Launcher, SudoScriptLauncher, prepare_command};
pub use limits::ResourceLimits;
pub use output::{OutputCapture, collect, sanitize, split_lines};
pub use reaper::{EscalationState, ProcFsSignaller, ProcessSignaller, Reaper, Signal};
pub use supervisor::{CapturedOutput, ExecutionStatus, Supervisor};

/// Wall-clock budget for a single command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum number of characters of sanitized output reported per command.
pub const MAX_OUTPUT_LENGTH: usize = 1000;

/// Maximum number of raw bytes buffered per command (1MB).
///
/// The pipe keeps being drained past this point, but the extra bytes are dropped.
pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// How long to wait for the output pipe to close once escalation has converged.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Name of the account commands run as unless configured otherwise.
pub const DEFAULT_SANDBOX_USER: &str = "katbot";
