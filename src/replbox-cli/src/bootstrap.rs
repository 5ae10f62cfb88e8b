//! One-time host preparation.
//!
//! Runs before the first command is read:
//! 1. the hosts file maps `127.0.0.1` to the current host name, so tools
//!    that resolve the local host name do not stall on DNS
//! 2. the sandbox user's shell startup file is emptied and handed to a
//!    privileged account, so sandboxed commands cannot plant code in it
//! 3. the working directory becomes the sandbox user's home

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use replbox_exec::{Account, SandboxIdentity};

use crate::config::BootstrapConfig;

/// Prepare the host for `identity`.
pub fn bootstrap(config: &BootstrapConfig, identity: &SandboxIdentity) -> Result<()> {
    let host = hostname::get().context("failed to read host name")?;
    let host = host.to_string_lossy();
    pin_hostname(&config.hosts_file, &host)?;

    let owner = Account::lookup(&config.startup_file_owner).with_context(|| {
        format!(
            "startup file owner {} not found",
            config.startup_file_owner
        )
    })?;
    let startup_file = config.startup_file_for(identity);
    reset_startup_file(&startup_file, owner.uid(), owner.gid())?;

    std::env::set_current_dir(identity.home()).with_context(|| {
        format!(
            "failed to change directory to {}",
            identity.home().display()
        )
    })?;

    info!(
        host = %host,
        startup_file = %startup_file.display(),
        home = %identity.home().display(),
        "bootstrap complete"
    );
    Ok(())
}

/// Replace the hosts file with a single loopback entry for `host`.
pub fn pin_hostname(hosts_file: &Path, host: &str) -> Result<()> {
    let mut file = File::create(hosts_file)
        .with_context(|| format!("failed to open {}", hosts_file.display()))?;
    write!(file, "127.0.0.1 {host}")
        .with_context(|| format!("failed to write {}", hosts_file.display()))?;
    Ok(())
}

/// Truncate (or create) `path` and give it to `uid:gid`.
pub fn reset_startup_file(path: &Path, uid: u32, gid: u32) -> Result<()> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to truncate {}", path.display()))?;
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
        .with_context(|| format!("failed to chown {} to {uid}:{gid}", path.display()))?;
    Ok(())
}
