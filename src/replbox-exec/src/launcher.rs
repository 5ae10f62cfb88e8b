//! Launching confined commands.
//!
//! A [`Launcher`] turns a shell snippet into a running child process owned
//! by the sandbox identity. Whatever mechanism it uses to switch accounts,
//! the child must be prepared with [`prepare_command`] so that stdin is
//! closed, stderr shares the stdout pipe and the resource limits are in
//! place before the target program starts.

use std::path::PathBuf;
use std::process::Stdio;

use tracing::debug;

use tokio::process::{Child, Command};

use crate::error::{ExecError, Result};
use crate::identity::SandboxIdentity;
use crate::limits::ResourceLimits;

/// Capability to spawn a command as another account.
pub trait Launcher: Send + Sync {
    /// Short name of the privilege-transition mechanism, for logs.
    fn name(&self) -> &str;

    /// Spawn `command` as `identity` with `limits` applied.
    ///
    /// The returned child has its combined output on `stdout`.
    fn spawn(
        &self,
        command: &str,
        identity: &SandboxIdentity,
        limits: &ResourceLimits,
    ) -> Result<Child>;

    /// Check once, before any command is served, that `identity` is reachable.
    ///
    /// Blocking.
    fn preflight(&self, _identity: &SandboxIdentity) -> Result<()> {
        Ok(())
    }

    /// Recognize a run that ended inside the launcher instead of the command.
    ///
    /// Returns the launcher's own complaint, if `output` is one.
    fn launch_failure(&self, _exit_code: Option<i32>, _output: &[u8]) -> Option<String> {
        None
    }
}

/// Configure stdio and the pre-exec hook of a command about to be spawned.
///
/// - stdin is `/dev/null`
/// - stdout is a pipe, and stderr is duplicated onto it in the child
/// - the resource limits are installed as the last step before exec
pub fn prepare_command(cmd: &mut Command, limits: ResourceLimits) {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    // SAFETY: the hook only calls dup2 and setrlimit, both async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            if libc::dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            limits.install()
        });
    }
}

/// Runs commands through `sudo -u <user> script -qfc <command> /dev/null`.
///
/// `script` gives the command a pseudo-terminal so its output looks the way
/// it would on a terminal; `-q` silences the start/done banners, `-f`
/// flushes after every write and `-c` runs the command instead of a shell.
#[derive(Debug, Clone)]
pub struct SudoScriptLauncher {
    sudo: PathBuf,
    script: PathBuf,
}

impl Default for SudoScriptLauncher {
    fn default() -> Self {
        Self {
            sudo: PathBuf::from("sudo"),
            script: PathBuf::from("script"),
        }
    }
}

impl SudoScriptLauncher {
    /// Create a launcher using `sudo` and `script` from `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the `sudo` binary.
    pub fn sudo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sudo = path.into();
        self
    }

    /// Builder: set the `script` binary.
    pub fn script_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.script = path.into();
        self
    }

    /// Build the command line without spawning it.
    pub fn build_command(&self, command: &str, identity: &SandboxIdentity) -> Command {
        let mut cmd = Command::new(&self.sudo);
        // -n: fail instead of prompting for a password
        cmd.arg("-n")
            .arg("-u")
            .arg(identity.name())
            .arg("--")
            .arg(&self.script)
            .arg("-qfc")
            .arg(command)
            .arg("/dev/null");
        cmd
    }
}

impl Launcher for SudoScriptLauncher {
    fn name(&self) -> &str {
        "sudo+script"
    }

    fn spawn(
        &self,
        command: &str,
        identity: &SandboxIdentity,
        limits: &ResourceLimits,
    ) -> Result<Child> {
        let mut cmd = self.build_command(command, identity);
        prepare_command(&mut cmd, *limits);
        cmd.spawn().map_err(|e| ExecError::launch(command, e))
    }

    /// Run `script -qc true` through `sudo -n` as `identity`.
    fn preflight(&self, identity: &SandboxIdentity) -> Result<()> {
        let preflight_error = |reason: String| ExecError::Preflight {
            launcher: self.name().to_string(),
            user: identity.name().to_string(),
            reason,
        };

        let output = std::process::Command::new(&self.sudo)
            .arg("-n")
            .arg("-u")
            .arg(identity.name())
            .arg("--")
            .arg(&self.script)
            .arg("-qc")
            .arg("true")
            .arg("/dev/null")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| preflight_error(format!("cannot run {}: {e}", self.sudo.display())))?;

        if output.status.success() {
            debug!(user = identity.name(), "sudo preflight passed");
            return Ok(());
        }

        let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        let reason = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("exited with {}", output.status));
        Err(preflight_error(reason))
    }

    /// sudo reports its own refusals (password required, unknown user,
    /// missing `script`) with exit status 1 and a `sudo:` message.
    fn launch_failure(&self, exit_code: Option<i32>, output: &[u8]) -> Option<String> {
        if exit_code != Some(1) {
            return None;
        }
        let text = String::from_utf8_lossy(output);
        let first = text.lines().map(str::trim).find(|line| !line.is_empty())?;
        first.starts_with("sudo:").then(|| first.to_string())
    }
}
