//! Supervisor configuration.
//!
//! Values come from the built-in defaults, then an optional TOML file, then
//! command-line flags.
//!
//! ```toml
//! user = "katbot"
//! timeout_ms = 1000
//! max_output_length = 1000
//!
//! [limits]
//! max_processes = 16
//! max_cpu_seconds = 1
//!
//! [bootstrap]
//! hosts_file = "/etc/hosts"
//! startup_file_owner = "root"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use replbox_exec::{
    DEFAULT_SANDBOX_USER, DEFAULT_TIMEOUT, MAX_OUTPUT_LENGTH, ResourceLimits, SandboxIdentity,
};

use crate::args::Cli;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplboxConfig {
    /// Account commands run as.
    #[serde(default = "default_user")]
    pub user: String,

    /// Wall-clock timeout per command.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Characters of sanitized output reported per command.
    #[serde(default = "default_max_output_length")]
    pub max_output_length: usize,

    /// Kernel resource ceilings.
    #[serde(default)]
    pub limits: ResourceLimits,

    /// One-time host preparation.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Host preparation performed before the first command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    /// Whether to run the bootstrap at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Hosts file pinned to the local host name.
    #[serde(default = "default_hosts_file")]
    pub hosts_file: PathBuf,

    /// Shell startup file to neutralize (defaults to `~/.bashrc` of the sandbox user).
    #[serde(default)]
    pub startup_file: Option<PathBuf>,

    /// Account that takes ownership of the emptied startup file.
    #[serde(default = "default_startup_file_owner")]
    pub startup_file_owner: String,
}

fn default_user() -> String {
    DEFAULT_SANDBOX_USER.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_max_output_length() -> usize {
    MAX_OUTPUT_LENGTH
}

fn default_enabled() -> bool {
    true
}

fn default_hosts_file() -> PathBuf {
    PathBuf::from("/etc/hosts")
}

fn default_startup_file_owner() -> String {
    "root".to_string()
}

impl Default for ReplboxConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            timeout_ms: default_timeout_ms(),
            max_output_length: default_max_output_length(),
            limits: ResourceLimits::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            hosts_file: default_hosts_file(),
            startup_file: None,
            startup_file_owner: default_startup_file_owner(),
        }
    }
}

impl BootstrapConfig {
    /// Startup file to reset for `identity`.
    pub fn startup_file_for(&self, identity: &SandboxIdentity) -> PathBuf {
        self.startup_file
            .clone()
            .unwrap_or_else(|| identity.home().join(".bashrc"))
    }
}

impl ReplboxConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid replbox configuration")
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in config file {}", path.display()))
    }

    /// Build the effective configuration for a command line.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(cli);
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line flags on top of the current values.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(user) = &cli.user {
            self.user = user.clone();
        }
        if let Some(timeout_ms) = cli.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        if let Some(max_output_length) = cli.max_output_length {
            self.max_output_length = max_output_length;
        }
        if let Some(max_processes) = cli.max_processes {
            self.limits.max_processes = max_processes;
        }
        if let Some(max_cpu_seconds) = cli.max_cpu_seconds {
            self.limits.max_cpu_seconds = max_cpu_seconds;
        }
        if let Some(bytes) = cli.max_address_space_bytes {
            self.limits.max_address_space_bytes = Some(bytes);
        }
        if cli.skip_bootstrap {
            self.bootstrap.enabled = false;
        }
    }

    /// Reject values that would leave commands unconfined or unbounded.
    pub fn validate(&self) -> Result<()> {
        if self.user.trim().is_empty() {
            bail!("user must not be empty");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.max_output_length == 0 {
            bail!("max_output_length must be greater than zero");
        }
        if self.limits.max_processes == 0 {
            bail!("limits.max_processes must be greater than zero");
        }
        if self.limits.max_cpu_seconds == 0 {
            bail!("limits.max_cpu_seconds must be greater than zero");
        }
        if self.limits.max_address_space_bytes == Some(0) {
            bail!("limits.max_address_space_bytes must be greater than zero");
        }
        Ok(())
    }

    /// Wall-clock timeout per command.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
