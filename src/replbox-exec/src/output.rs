//! Output capture and normalization.
//!
//! The raw byte stream of a command is captured by [`OutputCapture`] while it
//! runs. Once it has finished, [`collect`] turns the bytes into the lines
//! that are sent back to the caller.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Read size for the capture pipe.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Captures the combined output stream of one execution.
///
/// Clones share the same buffer. Bytes beyond the capture limit are read
/// and discarded so the writer never blocks on a full pipe.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    inner: Arc<Mutex<CaptureInner>>,
    closed: Arc<watch::Sender<bool>>,
}

#[derive(Debug)]
struct CaptureInner {
    bytes: Vec<u8>,
    limit: usize,
    discarded: usize,
}

impl OutputCapture {
    /// Create a capture keeping at most `limit` bytes.
    pub fn new(limit: usize) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(CaptureInner {
                bytes: Vec::new(),
                limit,
                discarded: 0,
            })),
            closed: Arc::new(closed),
        }
    }

    /// Append data, dropping whatever exceeds the limit.
    pub fn append(&self, data: &[u8]) {
        if let Ok(mut inner) = self.inner.lock() {
            let room = inner.limit.saturating_sub(inner.bytes.len());
            let kept = room.min(data.len());
            inner.bytes.extend_from_slice(&data[..kept]);
            inner.discarded += data.len() - kept;
        }
    }

    /// Read `reader` to end of stream, then mark the capture closed.
    ///
    /// Read errors end the capture like an end of stream does.
    pub async fn fill_from<R>(self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    trace!(bytes = n, "captured output chunk");
                    self.append(&buf[..n]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // script reports EIO once the pty slave side is gone
                    debug!(error = %e, "output stream ended with error");
                    break;
                }
            }
        }
        self.close();
    }

    /// Mark the stream as finished.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Whether the stream has finished.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the stream has finished.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // the sender lives in self, so the channel cannot close under us
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Copy of the captured bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.inner
            .lock()
            .map(|i| i.bytes.clone())
            .unwrap_or_default()
    }

    /// Take the captured bytes, leaving the buffer empty.
    pub fn take_bytes(&self) -> Vec<u8> {
        self.inner
            .lock()
            .map(|mut i| std::mem::take(&mut i.bytes))
            .unwrap_or_default()
    }

    /// Number of bytes dropped because of the limit.
    pub fn discarded(&self) -> usize {
        self.inner.lock().map(|i| i.discarded).unwrap_or_default()
    }
}

/// Keep only ASCII characters.
pub fn sanitize(text: &str) -> String {
    text.chars().filter(char::is_ascii).collect()
}

/// Turn raw output into response lines.
///
/// Decodes leniently, drops non-ASCII, keeps the first `max_len`
/// characters and splits the rest into lines.
pub fn collect(raw: &[u8], max_len: usize) -> Vec<String> {
    let text = sanitize(&String::from_utf8_lossy(raw));
    // ASCII only, so byte and char positions agree
    let cut = text.len().min(max_len);
    split_lines(&text[..cut])
}

/// Split text into lines.
///
/// Line boundaries are `\n`, `\r\n`, `\r`, vertical tab, form feed and the
/// ASCII file, group and record separators. A trailing boundary does not
/// start another line, so `"a\n"` is `["a"]` and `"\n"` is `[""]`.
pub fn split_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        match rest.find(is_line_boundary) {
            Some(pos) => {
                lines.push(rest[..pos].to_string());
                let after = &rest[pos..];
                let width = if after.starts_with("\r\n") { 2 } else { 1 };
                rest = &after[width..];
            }
            None => {
                lines.push(rest.to_string());
                break;
            }
        }
    }

    lines
}

fn is_line_boundary(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e'
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_collect_simple() {
        assert_eq!(collect(b"hi\n", 1000), vec!["hi"]);
        assert_eq!(collect(b"a\nb", 1000), vec!["a", "b"]);
    }

    #[test]
    fn test_collect_empty() {
        assert!(collect(b"", 1000).is_empty());
    }

    #[test]
    fn test_lone_newline_is_one_empty_line() {
        assert_eq!(collect(b"\n", 1000), vec![""]);
        assert_eq!(collect(b"a\n\nb\n", 1000), vec!["a", "", "b"]);
    }

    #[test]
    fn test_collect_drops_non_ascii() {
        assert_eq!(collect("h\u{e9}llo \u{1F600}\n".as_bytes(), 1000), vec!["hllo "]);
        // invalid utf-8 decodes to U+FFFD and is dropped as well
        assert_eq!(collect(b"ok\xff\xfe!\n", 1000), vec!["ok!"]);
    }

    #[test]
    fn test_collect_truncates() {
        let raw = "x".repeat(2000);
        let lines = collect(raw.as_bytes(), 1000);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 1000);
    }

    #[test]
    fn test_truncation_counts_newlines() {
        let lines = collect(b"abc\ndef\n", 5);
        assert_eq!(lines, vec!["abc", "d"]);
    }

    #[test]
    fn test_truncation_happens_after_sanitizing() {
        let raw = format!("{}abcdef", "\u{e9}".repeat(10));
        assert_eq!(collect(raw.as_bytes(), 3), vec!["abc"]);
    }

    #[test]
    fn test_split_terminal_line_endings() {
        assert_eq!(split_lines("a\r\nb\r\n"), vec!["a", "b"]);
        assert_eq!(split_lines("a\rb"), vec!["a", "b"]);
        assert_eq!(split_lines("a\r\rb"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_split_other_separators() {
        assert_eq!(
            split_lines("a\x0bb\x0cc\x1cd\x1de\x1ef"),
            vec!["a", "b", "c", "d", "e", "f"]
        );
        assert_eq!(split_lines("tab\tstays"), vec!["tab\tstays"]);
    }

    #[test]
    fn test_sanitize_idempotent() {
        let once = sanitize("caf\u{e9} \x1b[0m ok");
        assert_eq!(once, "caf \x1b[0m ok");
        assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn test_capture_limit() {
        let capture = OutputCapture::new(4);
        capture.append(b"abc");
        capture.append(b"def");
        assert_eq!(capture.bytes(), b"abcd");
        assert_eq!(capture.discarded(), 2);
        assert_eq!(capture.take_bytes(), b"abcd");
        assert!(capture.bytes().is_empty());
    }

    #[tokio::test]
    async fn test_fill_from_closes_on_eof() {
        let capture = OutputCapture::new(1024);
        assert!(!capture.is_closed());

        let reader: &[u8] = b"hello\nworld\n";
        capture.clone().fill_from(reader).await;

        capture.closed().await;
        assert!(capture.is_closed());
        assert_eq!(capture.bytes(), b"hello\nworld\n");
    }

    #[tokio::test]
    async fn test_fill_from_drains_past_limit() {
        let capture = OutputCapture::new(10);
        let data = vec![b'y'; 100_000];
        capture.clone().fill_from(data.as_slice()).await;

        assert!(capture.is_closed());
        assert_eq!(capture.bytes().len(), 10);
        assert_eq!(capture.discarded(), 99_990);
    }

    #[tokio::test]
    async fn test_closed_wakes_waiter() {
        let capture = OutputCapture::new(16);
        let waiter = {
            let capture = capture.clone();
            tokio::spawn(async move { capture.closed().await })
        };
        capture.close();
        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
