//! Replbox Process Hardening - Hardening of the supervisor process itself.
//!
//! The supervisor runs privileged and launches untrusted code, so before it
//! starts any thread it:
//! - marks itself non-dumpable, which also blocks ptrace from other users
//! - sets its core file size limit to zero
//! - removes `LD_*` and credential-looking variables from its environment,
//!   so sandboxed commands never inherit them

#![allow(unsafe_code)]

use std::ffi::OsString;

use thiserror::Error;

/// Name fragments marking a variable as sensitive (matched case-insensitively).
const SENSITIVE_PATTERNS: &[&str] = &[
    "KEY",        // API_KEY, SSH_KEY, etc.
    "SECRET",     // AWS_SECRET, etc.
    "TOKEN",      // AUTH_TOKEN, etc.
    "PASSWORD",   // DB_PASSWORD, etc.
    "CREDENTIAL", // GOOGLE_CREDENTIALS, etc.
    "PRIVATE",    // PRIVATE_KEY, etc.
];

/// Result type alias for hardening operations.
pub type Result<T> = std::result::Result<T, HardeningError>;

/// A hardening step that could not be applied.
#[derive(Debug, Error)]
pub enum HardeningError {
    #[error("prctl(PR_SET_DUMPABLE, 0) failed: {0}")]
    Dumpable(#[source] std::io::Error),

    #[error("setrlimit(RLIMIT_CORE) failed: {0}")]
    CoreLimit(#[source] std::io::Error),
}

/// What [`harden`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardeningReport {
    /// Names of the environment variables that were removed.
    pub scrubbed_vars: Vec<String>,
}

/// Apply every hardening measure.
///
/// Must be called before any other thread exists, since it edits the
/// process environment.
pub fn harden() -> Result<HardeningReport> {
    mark_non_dumpable()?;
    disable_core_dumps()?;
    let scrubbed_vars = scrub_environment();
    Ok(HardeningReport { scrubbed_vars })
}

/// Human-readable list of the measures applied by [`harden`].
pub fn description() -> &'static str {
    "non-dumpable, RLIMIT_CORE=0, LD_* and credential variables removed"
}

/// Mark the process non-dumpable.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn mark_non_dumpable() -> Result<()> {
    // SAFETY: PR_SET_DUMPABLE takes plain integer arguments.
    let ret_code = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0) };
    if ret_code != 0 {
        return Err(HardeningError::Dumpable(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn mark_non_dumpable() -> Result<()> {
    Ok(())
}

/// Set the core file size limit to zero.
pub fn disable_core_dumps() -> Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    // SAFETY: rlim is a valid rlimit.
    let ret_code = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &rlim) };
    if ret_code != 0 {
        return Err(HardeningError::CoreLimit(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Whether a variable is removed by [`scrub_environment`].
pub fn is_scrubbed_var(name: &str) -> bool {
    if name.starts_with("LD_") {
        return true;
    }
    let upper = name.to_ascii_uppercase();
    SENSITIVE_PATTERNS.iter().any(|p| upper.contains(p))
}

/// Remove library-injection and credential variables from the environment.
///
/// Returns the removed names.
pub fn scrub_environment() -> Vec<String> {
    let keys: Vec<OsString> = std::env::vars_os()
        .map(|(key, _)| key)
        .filter(|key| is_scrubbed_var(&key.to_string_lossy()))
        .collect();

    let mut removed = Vec::with_capacity(keys.len());
    for key in keys {
        // SAFETY: callers run this before spawning threads.
        unsafe {
            std::env::remove_var(&key);
        }
        removed.push(key.to_string_lossy().into_owned());
    }
    removed.sort();
    removed
}
