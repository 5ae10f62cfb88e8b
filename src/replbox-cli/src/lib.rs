//! replbox CLI library.
//!
//! - `args` - command-line parsing
//! - `config` - TOML configuration merged with flags
//! - `logging` - stderr tracing subscriber
//! - `bootstrap` - one-time host preparation
//! - `session` - the read/execute/respond loop

pub mod args;
pub mod bootstrap;
pub mod config;
pub mod logging;
pub mod session;

pub use args::{Cli, LogLevel};
pub use bootstrap::bootstrap;
pub use config::{BootstrapConfig, ReplboxConfig};
pub use logging::init_logging;
pub use session::{ServeStats, serve};

use anyhow::{Context, Result};
use tracing::info;

use replbox_exec::{SandboxIdentity, Supervisor};

/// Resolve the sandbox account, prepare the host, check that commands can
/// run as the account, then serve stdin until it closes.
pub async fn run(config: ReplboxConfig) -> Result<ServeStats> {
    let identity = SandboxIdentity::lookup(&config.user)
        .with_context(|| format!("sandbox account {} is not usable", config.user))?;

    if config.bootstrap.enabled {
        bootstrap(&config.bootstrap, &identity).context("bootstrap failed")?;
    }

    let supervisor = Supervisor::new(identity, config.limits)
        .with_timeout(config.timeout())
        .with_max_output_length(config.max_output_length);
    supervisor
        .preflight()
        .await
        .context("sandbox launcher cannot drop privileges")?;

    let identity = supervisor.identity();
    info!(
        user = identity.name(),
        uid = identity.uid(),
        timeout_ms = config.timeout_ms,
        max_processes = config.limits.max_processes,
        max_cpu_seconds = config.limits.max_cpu_seconds,
        "ready"
    );

    serve(&supervisor, tokio::io::stdin(), tokio::io::stdout()).await
}
