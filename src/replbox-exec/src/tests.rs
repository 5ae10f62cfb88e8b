//! Supervisor tests.
//!
//! These run commands as the current user through `sh -c` instead of the
//! sudo launcher, and record escalation signals instead of sending them.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::process::{Child, Command};

use crate::{
    ExecError, ExecutionStatus, Launcher, ProcessSignaller, ResourceLimits, SandboxIdentity,
    Signal, SudoScriptLauncher, Supervisor, prepare_command,
};

/// Runs commands as the current user.
struct ShellLauncher;

impl Launcher for ShellLauncher {
    fn name(&self) -> &str {
        "sh"
    }

    fn spawn(
        &self,
        command: &str,
        _identity: &SandboxIdentity,
        limits: &ResourceLimits,
    ) -> crate::Result<Child> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        prepare_command(&mut cmd, *limits);
        cmd.spawn().map_err(|e| ExecError::launch(command, e))
    }
}

/// Records every sweep; SIGKILL sweeps report the scripted hit counts, then 0.
#[derive(Default)]
struct RecordingSignaller {
    kill_hits: Mutex<Vec<usize>>,
    calls: Mutex<Vec<(u32, Signal)>>,
}

impl RecordingSignaller {
    fn with_kill_hits(hits: &[usize]) -> Self {
        let mut hits = hits.to_vec();
        hits.reverse();
        Self {
            kill_hits: Mutex::new(hits),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn signals(&self) -> Vec<Signal> {
        self.calls.lock().unwrap().iter().map(|(_, s)| *s).collect()
    }
}

impl ProcessSignaller for RecordingSignaller {
    fn signal_owned_by(&self, uid: u32, signal: Signal) -> io::Result<usize> {
        self.calls.lock().unwrap().push((uid, signal));
        match signal {
            Signal::Kill => Ok(self.kill_hits.lock().unwrap().pop().unwrap_or(0)),
            Signal::Stop => Ok(0),
        }
    }
}

struct FailingSignaller;

impl ProcessSignaller for FailingSignaller {
    fn signal_owned_by(&self, _uid: u32, _signal: Signal) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::NotFound, "procfs not mounted"))
    }
}

/// Process ceiling the tests run under, so background jobs can still fork.
fn inherited_process_limit() -> u64 {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rlim is a valid out pointer.
    let ret_code = unsafe { libc::getrlimit(libc::RLIMIT_NPROC, &mut rlim) };
    assert_eq!(ret_code, 0);
    rlim.rlim_cur as u64
}

/// Write an executable shell script standing in for sudo.
fn fake_sudo(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("sudo");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn current_identity() -> SandboxIdentity {
    // SAFETY: getuid/getgid cannot fail.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    SandboxIdentity::new("tester", uid, gid, std::env::temp_dir())
}

fn supervisor() -> (Supervisor, Arc<RecordingSignaller>) {
    let signaller = Arc::new(RecordingSignaller::default());
    let supervisor = Supervisor::new(
        current_identity(),
        ResourceLimits::default().with_max_cpu_seconds(5),
    )
    .with_launcher(Arc::new(ShellLauncher))
    .with_signaller(signaller.clone())
    .with_timeout(Duration::from_secs(5));
    (supervisor, signaller)
}

#[tokio::test]
async fn test_echo() {
    let (supervisor, signaller) = supervisor();
    let captured = supervisor.execute("echo hi").await;

    assert_eq!(captured.lines, vec!["hi".to_string()]);
    assert_eq!(
        captured.status,
        ExecutionStatus::Completed { exit_code: Some(0) }
    );
    assert!(!captured.timed_out());
    assert!(captured.diagnostic().is_none());
    assert!(signaller.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_no_output() {
    let (supervisor, _) = supervisor();
    let captured = supervisor.execute("true").await;
    assert!(captured.lines.is_empty());
}

#[tokio::test]
async fn test_exit_code_reported() {
    let (supervisor, _) = supervisor();
    let captured = supervisor.execute("echo bye; exit 3").await;
    assert_eq!(captured.lines, vec!["bye".to_string()]);
    assert_eq!(
        captured.status,
        ExecutionStatus::Completed { exit_code: Some(3) }
    );
}

#[tokio::test]
async fn test_stderr_is_interleaved() {
    let (supervisor, _) = supervisor();
    let captured = supervisor.execute("echo one; echo two >&2; echo three").await;
    assert_eq!(captured.lines, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_output_truncated_before_splitting() {
    let (supervisor, _) = supervisor();
    let captured = supervisor.execute("printf '%02000d\\n' 0").await;

    assert_eq!(captured.lines.len(), 1);
    assert_eq!(captured.lines[0], "0".repeat(1000));
}

#[tokio::test]
async fn test_custom_output_length() {
    let (supervisor, _) = supervisor();
    let supervisor = supervisor.with_max_output_length(6);
    let captured = supervisor.execute("echo abc; echo def").await;
    assert_eq!(captured.lines, vec!["abc", "de"]);
}

#[tokio::test]
async fn test_timeout_escalates_against_identity_uid() {
    let (supervisor, signaller) = supervisor();
    let supervisor = supervisor
        .with_timeout(Duration::from_millis(200))
        .with_drain_timeout(Duration::from_millis(500));

    let captured = supervisor.execute("echo started; while :; do :; done").await;

    assert_eq!(captured.status, ExecutionStatus::TimedOut { sweeps: 1 });
    assert!(captured.timed_out());
    assert_eq!(captured.lines, vec!["started".to_string()]);
    assert!(captured.duration < Duration::from_secs(4));

    let uid = supervisor.identity().uid();
    assert_eq!(
        *signaller.calls.lock().unwrap(),
        vec![(uid, Signal::Kill)]
    );
}

#[tokio::test]
async fn test_cpu_limit_stops_busy_loop() {
    let signaller = Arc::new(RecordingSignaller::default());
    let supervisor = Supervisor::new(current_identity(), ResourceLimits::default())
        .with_launcher(Arc::new(ShellLauncher))
        .with_signaller(signaller.clone())
        .with_timeout(Duration::from_secs(10));

    let captured = supervisor.execute("while :; do :; done").await;

    // killed by SIGXCPU, well before the wall-clock timeout
    assert_eq!(captured.status, ExecutionStatus::Completed { exit_code: None });
    assert!(captured.duration < Duration::from_secs(8));
    assert!(signaller.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_launch_failure_is_contained() {
    let (supervisor, _) = supervisor();

    // interior NUL cannot be passed to exec
    let failed = supervisor.execute("echo a\0b").await;
    assert!(failed.lines.is_empty());
    assert!(matches!(failed.status, ExecutionStatus::LaunchFailed { .. }));
    assert!(failed.diagnostic().is_some());

    let next = supervisor.execute("echo still here").await;
    assert_eq!(next.lines, vec!["still here".to_string()]);
}

#[tokio::test]
async fn test_sequential_executions_keep_order() {
    let (supervisor, _) = supervisor();
    let mut seen = Vec::new();
    for i in 0..5 {
        let captured = supervisor.execute(&format!("echo {i}")).await;
        seen.extend(captured.lines);
    }
    assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
}

#[tokio::test]
async fn test_timeout_sweeps_until_nothing_is_left() {
    let signaller = Arc::new(RecordingSignaller::with_kill_hits(&[3, 1, 0]));
    let supervisor = Supervisor::new(
        current_identity(),
        ResourceLimits::default().with_max_cpu_seconds(5),
    )
    .with_launcher(Arc::new(ShellLauncher))
    .with_signaller(signaller.clone())
    .with_timeout(Duration::from_millis(200))
    .with_drain_timeout(Duration::from_millis(500));

    let captured = supervisor.execute("while :; do :; done").await;

    assert_eq!(captured.status, ExecutionStatus::TimedOut { sweeps: 3 });
    assert_eq!(
        signaller.signals(),
        vec![
            Signal::Kill,
            Signal::Stop,
            Signal::Kill,
            Signal::Stop,
            Signal::Kill,
        ]
    );
    let uid = supervisor.identity().uid();
    assert!(signaller.calls.lock().unwrap().iter().all(|(u, _)| *u == uid));
}

#[tokio::test]
async fn test_drain_is_bounded_when_background_job_holds_pipe() {
    let signaller = Arc::new(RecordingSignaller::default());
    let limits = ResourceLimits::default()
        .with_max_processes(inherited_process_limit())
        .with_max_cpu_seconds(5);
    let supervisor = Supervisor::new(current_identity(), limits)
        .with_launcher(Arc::new(ShellLauncher))
        .with_signaller(signaller.clone())
        .with_timeout(Duration::from_millis(200))
        .with_drain_timeout(Duration::from_millis(300));

    // the shell exits at once, the orphaned sleep keeps stdout open
    let captured = supervisor.execute("echo x; sleep 3 &").await;

    assert_eq!(captured.status, ExecutionStatus::TimedOut { sweeps: 1 });
    assert_eq!(captured.lines, vec!["x".to_string()]);
    assert!(captured.duration < Duration::from_millis(2500));
}

#[tokio::test]
async fn test_failed_sweep_is_reported() {
    let supervisor = Supervisor::new(
        current_identity(),
        ResourceLimits::default().with_max_cpu_seconds(5),
    )
    .with_launcher(Arc::new(ShellLauncher))
    .with_signaller(Arc::new(FailingSignaller))
    .with_timeout(Duration::from_millis(200))
    .with_drain_timeout(Duration::from_millis(500));

    let captured = supervisor.execute("echo partial; while :; do :; done").await;

    assert!(matches!(captured.status, ExecutionStatus::Unreaped { .. }));
    assert!(captured.timed_out());
    assert!(!captured.launch_failed());
    assert!(captured.diagnostic().unwrap().contains("procfs not mounted"));
    assert_eq!(captured.lines, vec!["partial".to_string()]);
}

#[tokio::test]
async fn test_sudo_refusal_is_launch_failure() {
    let dir = tempfile::tempdir().unwrap();
    let sudo = fake_sudo(dir.path(), "echo 'sudo: a password is required' >&2\nexit 1");
    let (supervisor, _) = supervisor();
    let supervisor =
        supervisor.with_launcher(Arc::new(SudoScriptLauncher::new().sudo_path(sudo)));

    let captured = supervisor.execute("echo hi").await;

    assert!(captured.launch_failed());
    assert!(captured.lines.is_empty());
    assert!(
        captured
            .diagnostic()
            .unwrap()
            .contains("sudo: a password is required")
    );
}

#[tokio::test]
async fn test_preflight_failure_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    let sudo = fake_sudo(dir.path(), "echo 'sudo: unknown user tester' >&2\nexit 1");
    let (supervisor, _) = supervisor();

    supervisor.preflight().await.unwrap();

    let supervisor =
        supervisor.with_launcher(Arc::new(SudoScriptLauncher::new().sudo_path(sudo)));
    let err = supervisor.preflight().await.unwrap_err();
    assert!(matches!(err, ExecError::Preflight { ref reason, .. } if reason.contains("unknown user")));
}
