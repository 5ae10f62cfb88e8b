//! Error types for Replbox Exec.

use thiserror::Error;

/// Result type alias for execution operations.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Errors raised while resolving accounts or running a confined command.
#[derive(Debug, Error)]
pub enum ExecError {
    // Identity errors
    #[error("Account not found: {name}")]
    UnknownAccount { name: String },

    #[error("Invalid account name: {0:?}")]
    InvalidAccountName(String),

    #[error("Account lookup failed for {name}: {source}")]
    AccountLookup {
        name: String,
        #[source]
        source: std::io::Error,
    },

    // Launch errors
    #[error("Failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{launcher} refused to run the command: {reason}")]
    PrivilegeDrop { launcher: String, reason: String },

    #[error("{launcher} cannot run commands as {user}: {reason}")]
    Preflight {
        launcher: String,
        user: String,
        reason: String,
    },

    // Escalation errors
    #[error("Failed to enumerate processes of uid {uid}: {source}")]
    ProcessScan {
        uid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Escalation task failed: {0}")]
    Escalation(String),
}

impl ExecError {
    /// Create a launch error.
    pub fn launch(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Launch {
            command: command.into(),
            source,
        }
    }

    /// Whether the error happened before the command got a chance to run.
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, Self::Launch { .. } | Self::PrivilegeDrop { .. })
    }
}
