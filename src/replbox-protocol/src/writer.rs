//! Response encoding.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::{ERROR_PREFIX, OUTPUT_PREFIX, TERMINATOR};

/// Render one response as protocol lines, without line endings.
///
/// Newlines inside the diagnostic are flattened so it stays one line.
pub fn render_response(lines: &[String], diagnostic: Option<&str>) -> Vec<String> {
    let mut rendered = Vec::with_capacity(lines.len() + 2);
    if let Some(diagnostic) = diagnostic {
        let flat: String = diagnostic
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        rendered.push(format!("{ERROR_PREFIX}{flat}"));
    }
    rendered.extend(lines.iter().map(|line| format!("{OUTPUT_PREFIX}{line}")));
    rendered.push(TERMINATOR.to_string());
    rendered
}

/// Writes responses to the caller.
pub struct ProtocolWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> ProtocolWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one complete response and flush it.
    ///
    /// The caller blocks until it sees the terminator, so nothing may stay
    /// buffered once this returns.
    pub async fn write_response(
        &mut self,
        lines: &[String],
        diagnostic: Option<&str>,
    ) -> Result<()> {
        let mut buf = String::new();
        for line in render_response(lines, diagnostic) {
            buf.push_str(&line);
            buf.push('\n');
        }
        self.inner.write_all(buf.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}
