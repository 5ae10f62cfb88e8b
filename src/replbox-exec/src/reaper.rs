//! Kill escalation against every process of the sandbox account.
//!
//! A command that outlives its timeout may have forked an arbitrary tree of
//! children, some of them already re-parented away from the process we
//! spawned. The reaper therefore never targets a pid: it repeatedly sweeps
//! all processes owned by the sandbox uid.
//!
//! ```text
//! Running ──begin──▶ Escalating(1) ──SIGKILL hit n>0, SIGSTOP──▶ Escalating(2) ─▶ ...
//!                         │
//!                         └──SIGKILL hit nothing──▶ Converged(sweeps)
//! ```
//!
//! Stopping survivors between kill sweeps keeps them from forking faster
//! than they are killed. The loop terminates because `RLIMIT_NPROC` caps how
//! many processes the account can ever have alive at once.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{ExecError, Result};

/// Log a warning every this many sweeps of a single escalation.
const SWEEP_WARN_INTERVAL: u32 = 1000;

/// Signals used during escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGKILL.
    Kill,
    /// SIGSTOP.
    Stop,
}

impl Signal {
    /// Get signal number.
    pub fn as_raw(&self) -> libc::c_int {
        match self {
            Self::Kill => libc::SIGKILL,
            Self::Stop => libc::SIGSTOP,
        }
    }

    /// Get signal name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Kill => "SIGKILL",
            Self::Stop => "SIGSTOP",
        }
    }
}

/// Delivers signals to all processes of an account.
pub trait ProcessSignaller: Send + Sync {
    /// Send `signal` to every process whose effective uid is `uid`.
    ///
    /// Returns how many processes were signalled.
    fn signal_owned_by(&self, uid: u32, signal: Signal) -> io::Result<usize>;
}

/// Signaller backed by a scan of `/proc`.
#[derive(Debug, Clone)]
pub struct ProcFsSignaller {
    root: PathBuf,
}

impl Default for ProcFsSignaller {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/proc"),
        }
    }
}

impl ProcFsSignaller {
    /// Scan the live `/proc`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan a different procfs mount (or a fake tree in tests).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// List the live pids whose effective uid is `uid`.
    ///
    /// Processes that vanish during the scan are skipped, and so are zombies:
    /// they cannot be killed again and only disappear once reaped.
    pub fn owned_pids(&self, uid: u32) -> io::Result<Vec<libc::pid_t>> {
        let mut pids = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let Ok(entry) = entry else { continue };
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<libc::pid_t>().ok())
            else {
                continue;
            };

            match read_status(&entry.path()) {
                Some(status) if status.euid == uid && !status.zombie => pids.push(pid),
                _ => {}
            }
        }

        pids.sort_unstable();
        Ok(pids)
    }
}

impl ProcessSignaller for ProcFsSignaller {
    fn signal_owned_by(&self, uid: u32, signal: Signal) -> io::Result<usize> {
        let own_pid = std::process::id() as libc::pid_t;
        let mut signalled = 0;

        for pid in self.owned_pids(uid)? {
            if pid == own_pid {
                continue;
            }
            // SAFETY: kill has no memory-safety preconditions.
            let ret_code = unsafe { libc::kill(pid, signal.as_raw()) };
            if ret_code == 0 {
                signalled += 1;
            } else {
                let err = io::Error::last_os_error();
                // ESRCH: exited between the scan and the signal
                if err.raw_os_error() != Some(libc::ESRCH) {
                    debug!(pid, signal = signal.name(), error = %err, "signal not delivered");
                }
            }
        }

        Ok(signalled)
    }
}

/// The parts of `<proc>/<pid>/status` the sweep cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcStatus {
    euid: u32,
    zombie: bool,
}

fn read_status(process_dir: &Path) -> Option<ProcStatus> {
    let status = fs::read_to_string(process_dir.join("status")).ok()?;
    parse_status(&status)
}

/// Parse a status file.
///
/// The `Uid:` row lists the real, effective, saved and filesystem uids; the
/// `State:` row starts with the one-letter state code.
fn parse_status(status: &str) -> Option<ProcStatus> {
    let row = status.lines().find_map(|line| line.strip_prefix("Uid:"))?;
    let euid = row.split_whitespace().nth(1)?.parse().ok()?;
    let zombie = status
        .lines()
        .find_map(|line| line.strip_prefix("State:"))
        .is_some_and(|state| state.trim_start().starts_with('Z'));
    Some(ProcStatus { euid, zombie })
}

/// Progress of one escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    /// The command is still considered running; nothing was signalled yet.
    Running,
    /// The next kill sweep to perform (1-based).
    Escalating { sweep: u32 },
    /// A kill sweep found no process left.
    Converged { sweeps: u32 },
}

/// Drives the kill/stop sweep loop for one sandbox account.
pub struct Reaper {
    signaller: Arc<dyn ProcessSignaller>,
    uid: u32,
    state: EscalationState,
}

impl Reaper {
    /// Create a reaper for the processes of `uid`.
    pub fn new(signaller: Arc<dyn ProcessSignaller>, uid: u32) -> Self {
        Self {
            signaller,
            uid,
            state: EscalationState::Running,
        }
    }

    /// Current state.
    pub fn state(&self) -> EscalationState {
        self.state
    }

    /// Perform one transition of the state machine.
    pub fn step(&mut self) -> Result<EscalationState> {
        self.state = match self.state {
            EscalationState::Running => EscalationState::Escalating { sweep: 1 },
            EscalationState::Escalating { sweep } => {
                let killed = self.signal(Signal::Kill)?;
                trace!(uid = self.uid, sweep, killed, "kill sweep");
                if killed == 0 {
                    EscalationState::Converged { sweeps: sweep }
                } else {
                    // freeze whatever was forked since the scan
                    self.signal(Signal::Stop)?;
                    if sweep % SWEEP_WARN_INTERVAL == 0 {
                        warn!(uid = self.uid, sweep, "escalation has not converged yet");
                    }
                    EscalationState::Escalating { sweep: sweep + 1 }
                }
            }
            converged @ EscalationState::Converged { .. } => converged,
        };
        Ok(self.state)
    }

    /// Sweep until no process of the account is left.
    ///
    /// Blocking; returns the number of kill sweeps performed.
    pub fn converge(mut self) -> Result<u32> {
        loop {
            if let EscalationState::Converged { sweeps } = self.step()? {
                debug!(uid = self.uid, sweeps, "escalation converged");
                return Ok(sweeps);
            }
            std::thread::yield_now();
        }
    }

    fn signal(&self, signal: Signal) -> Result<usize> {
        self.signaller
            .signal_owned_by(self.uid, signal)
            .map_err(|source| ExecError::ProcessScan {
                uid: self.uid,
                source,
            })
    }
}
