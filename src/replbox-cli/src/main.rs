//! replbox binary entry point.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, warn};

use replbox_cli::{Cli, ReplboxConfig, init_logging};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Hardening edits the environment, so it must run before any thread exists
    let report = if cli.no_harden {
        None
    } else {
        Some(replbox_process_hardening::harden().context("process hardening failed")?)
    };

    init_logging(cli.effective_log_level());
    match &report {
        Some(report) => debug!(
            measures = replbox_process_hardening::description(),
            scrubbed = ?report.scrubbed_vars,
            "process hardened"
        ),
        None => warn!("process hardening disabled"),
    }

    let config = ReplboxConfig::resolve(&cli)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(replbox_cli::run(config))?;
    Ok(())
}
