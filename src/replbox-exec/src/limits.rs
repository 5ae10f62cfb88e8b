//! Kernel-enforced resource ceilings for sandboxed commands.
//!
//! The limits are installed inside the forked child, right before the
//! target program is exec'd. They cannot be raised again by the sandboxed
//! code and are inherited by everything it spawns:
//!
//! | Limit | Purpose | Default |
//! |-------|---------|---------|
//! | `RLIMIT_NPROC` | Processes owned by the user (fork bombs) | 16 |
//! | `RLIMIT_CPU` | CPU seconds (busy loops) | 1 |
//! | `RLIMIT_AS` | Address space | unset |

use serde::{Deserialize, Serialize};

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Resource = libc::c_int;

/// Default ceiling on concurrently running processes of the sandbox user.
pub const DEFAULT_MAX_PROCESSES: u64 = 16;

/// Default ceiling on CPU seconds per process.
pub const DEFAULT_MAX_CPU_SECONDS: u64 = 1;

/// Resource ceilings applied identically to every execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    /// Maximum number of processes the sandbox user may own at once.
    pub max_processes: u64,
    /// Maximum CPU time in seconds.
    pub max_cpu_seconds: u64,
    /// Maximum address space in bytes, if any.
    pub max_address_space_bytes: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
            max_cpu_seconds: DEFAULT_MAX_CPU_SECONDS,
            max_address_space_bytes: None,
        }
    }
}

impl ResourceLimits {
    /// Builder: set the process ceiling.
    pub fn with_max_processes(mut self, max_processes: u64) -> Self {
        self.max_processes = max_processes;
        self
    }

    /// Builder: set the CPU ceiling.
    pub fn with_max_cpu_seconds(mut self, max_cpu_seconds: u64) -> Self {
        self.max_cpu_seconds = max_cpu_seconds;
        self
    }

    /// Builder: set the address space ceiling.
    pub fn with_max_address_space_bytes(mut self, bytes: Option<u64>) -> Self {
        self.max_address_space_bytes = bytes;
        self
    }

    /// Install the limits on the calling process.
    ///
    /// Only calls `setrlimit`, so it is safe to run between fork and exec.
    /// Any failure must abort the launch: the command never runs unconfined.
    pub fn install(&self) -> std::io::Result<()> {
        set_rlimit(libc::RLIMIT_NPROC, self.max_processes)?;
        set_rlimit(libc::RLIMIT_CPU, self.max_cpu_seconds)?;
        if let Some(bytes) = self.max_address_space_bytes {
            set_rlimit(libc::RLIMIT_AS, bytes)?;
        }
        Ok(())
    }
}

/// Set both the soft and the hard limit of `resource`.
fn set_rlimit(resource: Resource, limit: u64) -> std::io::Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: limit as libc::rlim_t,
        rlim_max: limit as libc::rlim_t,
    };

    // SAFETY: rlim is a valid rlimit and resource is a libc constant.
    let ret_code = unsafe { libc::setrlimit(resource, &rlim) };
    if ret_code != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
