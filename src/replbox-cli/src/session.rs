//! The command loop.

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use replbox_exec::Supervisor;
use replbox_protocol::{CommandReader, ProtocolWriter};

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    /// Commands actually launched.
    pub executed: u64,
    /// Blank lines answered without launching anything.
    pub skipped: u64,
    /// Commands stopped by the timeout, swept or not.
    pub timed_out: u64,
    /// Commands that could not be launched.
    pub failed: u64,
}

/// Answer every command from `input` on `output` until input ends.
///
/// Commands run strictly one after another; each gets exactly one response.
/// Returns early only if `output` can no longer be written.
pub async fn serve<R, W>(supervisor: &Supervisor, input: R, output: W) -> Result<ServeStats>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = CommandReader::new(input);
    let mut writer = ProtocolWriter::new(output);
    let mut stats = ServeStats::default();

    while let Some(command) = reader
        .next_command()
        .await
        .context("failed to read command")?
    {
        if command.trim().is_empty() {
            debug!("blank command");
            stats.skipped += 1;
            writer
                .write_response(&[], None)
                .await
                .context("failed to write response")?;
            continue;
        }

        let captured = supervisor.execute(&command).await;
        stats.executed += 1;
        if captured.timed_out() {
            stats.timed_out += 1;
        }
        if captured.launch_failed() {
            stats.failed += 1;
        }

        writer
            .write_response(&captured.lines, captured.diagnostic())
            .await
            .context("failed to write response")?;
    }

    info!(
        executed = stats.executed,
        timed_out = stats.timed_out,
        failed = stats.failed,
        "input closed"
    );
    Ok(stats)
}
