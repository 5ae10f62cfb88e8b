//! Command decoding.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::Result;

/// Reads one command per line.
pub struct CommandReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> CommandReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Next command, without its line terminator.
    ///
    /// Returns `None` at end of input. A final line without a terminator is
    /// still returned. Invalid UTF-8 is replaced rather than rejected.
    pub async fn next_command(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let read = self.inner.read_until(b'\n', &mut self.buf).await?;
        if read == 0 {
            return Ok(None);
        }

        let mut line = self.buf.as_slice();
        if let Some(rest) = line.strip_suffix(b"\n") {
            line = rest;
        }
        if let Some(rest) = line.strip_suffix(b"\r") {
            line = rest;
        }
        Ok(Some(String::from_utf8_lossy(line).into_owned()))
    }
}
