//! Execution supervisor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{ExecError, Result};
use crate::identity::SandboxIdentity;
use crate::launcher::{Launcher, SudoScriptLauncher};
use crate::limits::ResourceLimits;
use crate::output::{OutputCapture, collect};
use crate::reaper::{ProcFsSignaller, ProcessSignaller, Reaper};
use crate::{DEFAULT_TIMEOUT, DRAIN_TIMEOUT, MAX_CAPTURE_BYTES, MAX_OUTPUT_LENGTH};

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The command finished on its own before the timeout.
    Completed { exit_code: Option<i32> },
    /// The timeout fired and the sandbox account was swept clean.
    TimedOut { sweeps: u32 },
    /// The timeout fired but the sweep failed; processes may survive.
    Unreaped { reason: String },
    /// The command could not be started.
    LaunchFailed { reason: String },
}

/// Result of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Sanitized, truncated output lines in order.
    pub lines: Vec<String>,
    /// How the execution ended.
    pub status: ExecutionStatus,
    /// Wall-clock time spent, escalation included.
    pub duration: Duration,
}

impl CapturedOutput {
    /// Whether the command was stopped by the timeout.
    pub fn timed_out(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::TimedOut { .. } | ExecutionStatus::Unreaped { .. }
        )
    }

    /// Whether the command never ran.
    pub fn launch_failed(&self) -> bool {
        matches!(self.status, ExecutionStatus::LaunchFailed { .. })
    }

    /// Reason to report to the caller, if the command never ran or could not
    /// be cleaned up.
    pub fn diagnostic(&self) -> Option<&str> {
        match &self.status {
            ExecutionStatus::LaunchFailed { reason } | ExecutionStatus::Unreaped { reason } => {
                Some(reason.as_str())
            }
            _ => None,
        }
    }
}

/// Runs commands one at a time as the sandbox identity.
///
/// Holds no per-command state: every call to [`Supervisor::execute`] owns its
/// child process from launch to final reap.
pub struct Supervisor {
    identity: SandboxIdentity,
    limits: ResourceLimits,
    launcher: Arc<dyn Launcher>,
    signaller: Arc<dyn ProcessSignaller>,
    timeout: Duration,
    drain_timeout: Duration,
    max_output_length: usize,
}

impl Supervisor {
    /// Create a supervisor using `sudo` + `script` and a `/proc` scan.
    pub fn new(identity: SandboxIdentity, limits: ResourceLimits) -> Self {
        Self {
            identity,
            limits,
            launcher: Arc::new(SudoScriptLauncher::new()),
            signaller: Arc::new(ProcFsSignaller::new()),
            timeout: DEFAULT_TIMEOUT,
            drain_timeout: DRAIN_TIMEOUT,
            max_output_length: MAX_OUTPUT_LENGTH,
        }
    }

    /// Builder: replace the launcher.
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Builder: replace the signaller used during escalation.
    pub fn with_signaller(mut self, signaller: Arc<dyn ProcessSignaller>) -> Self {
        self.signaller = signaller;
        self
    }

    /// Builder: set the wall-clock timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder: set how long to wait for the output pipe after escalation.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Builder: set the output length ceiling in characters.
    pub fn with_max_output_length(mut self, max_output_length: usize) -> Self {
        self.max_output_length = max_output_length;
        self
    }

    pub fn identity(&self) -> &SandboxIdentity {
        &self.identity
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_output_length(&self) -> usize {
        self.max_output_length
    }

    /// Verify that the launcher can reach the sandbox identity.
    ///
    /// Meant to run once at startup; a failure here means every command
    /// would fail to launch.
    pub async fn preflight(&self) -> Result<()> {
        let launcher = Arc::clone(&self.launcher);
        let identity = self.identity.clone();
        tokio::task::spawn_blocking(move || launcher.preflight(&identity))
            .await
            .map_err(|e| ExecError::Preflight {
                launcher: self.launcher.name().to_string(),
                user: self.identity.name().to_string(),
                reason: e.to_string(),
            })?
    }

    /// Run `command` to completion or timeout and collect its output.
    ///
    /// Never fails: a command that cannot be launched yields
    /// [`ExecutionStatus::LaunchFailed`] and the supervisor stays usable.
    pub async fn execute(&self, command: &str) -> CapturedOutput {
        let start = Instant::now();
        let capture = OutputCapture::new(MAX_CAPTURE_BYTES);

        let status = match self.run(command, &capture).await {
            Ok(status) => status,
            Err(e) => {
                warn!(command, error = %e, "launch failed");
                ExecutionStatus::LaunchFailed {
                    reason: e.to_string(),
                }
            }
        };

        let discarded = capture.discarded();
        if discarded > 0 {
            debug!(command, discarded, "output exceeded capture buffer");
        }

        // the launcher's complaint is reported as the diagnostic, not as output
        let raw = capture.take_bytes();
        let lines = match status {
            ExecutionStatus::LaunchFailed { .. } => Vec::new(),
            _ => collect(&raw, self.max_output_length),
        };
        let duration = start.elapsed();
        info!(
            command,
            elapsed_ms = duration.as_millis() as u64,
            lines = lines.len(),
            status = ?status,
            "execution finished"
        );

        CapturedOutput {
            lines,
            status,
            duration,
        }
    }

    async fn run(&self, command: &str, capture: &OutputCapture) -> Result<ExecutionStatus> {
        debug!(command, launcher = self.launcher.name(), "launching");
        let mut child = self.launcher.spawn(command, &self.identity, &self.limits)?;

        let reader = match child.stdout.take() {
            Some(stdout) => Some(tokio::spawn(capture.clone().fill_from(stdout))),
            None => {
                capture.close();
                None
            }
        };

        let waited = timeout(self.timeout, async {
            let status = child.wait().await;
            capture.closed().await;
            status
        })
        .await;

        let status = match waited {
            Ok(status) => {
                let exit_code = match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        warn!(command, error = %e, "failed to wait for command");
                        None
                    }
                };
                if let Some(reason) = self.launcher.launch_failure(exit_code, &capture.bytes()) {
                    return Err(ExecError::PrivilegeDrop {
                        launcher: self.launcher.name().to_string(),
                        reason,
                    });
                }
                ExecutionStatus::Completed { exit_code }
            }
            Err(_) => {
                warn!(
                    command,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "command timed out"
                );
                if let Err(e) = child.start_kill() {
                    debug!(command, error = %e, "spawned process already gone");
                }

                let escalation = self.escalate().await;

                if let Err(e) = child.wait().await {
                    debug!(command, error = %e, "final reap failed");
                }
                if timeout(self.drain_timeout, capture.closed()).await.is_err() {
                    warn!(command, "output still open after escalation, keeping partial output");
                }
                match escalation {
                    Ok(sweeps) => ExecutionStatus::TimedOut { sweeps },
                    Err(e) => ExecutionStatus::Unreaped {
                        reason: e.to_string(),
                    },
                }
            }
        };

        if let Some(handle) = reader {
            handle.abort();
        }

        Ok(status)
    }

    /// Sweep the sandbox account on the blocking pool.
    async fn escalate(&self) -> Result<u32> {
        let uid = self.identity.uid();
        let reaper = Reaper::new(Arc::clone(&self.signaller), uid);

        let result = tokio::task::spawn_blocking(move || reaper.converge())
            .await
            .map_err(|e| ExecError::Escalation(e.to_string()))
            .and_then(|converged| converged);

        if let Err(e) = &result {
            error!(uid, error = %e, "escalation failed, sandbox processes may survive");
        }
        result
    }
}
