//! The caller's side of the protocol.

use tracing::trace;

use crate::{ERROR_PREFIX, OUTPUT_PREFIX, TERMINATOR};

/// A complete response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Output lines, each followed by `\n`, capped at the reader's limit.
    pub output: String,
    /// Launch failure reported instead of output, if any.
    pub diagnostic: Option<String>,
}

/// Accumulates protocol lines into responses.
///
/// Output lines are appended only while the text is below the limit, and the
/// text is cut at the limit. Lines that are neither output, diagnostic nor
/// terminator are skipped.
#[derive(Debug, Clone)]
pub struct ResponseReader {
    limit: usize,
    current: ParsedResponse,
}

impl ResponseReader {
    /// Create a reader keeping at most `limit` characters of output.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            current: ParsedResponse::default(),
        }
    }

    /// Feed one line, without its line ending.
    ///
    /// Returns the finished response when `line` is the terminator.
    pub fn push_line(&mut self, line: &str) -> Option<ParsedResponse> {
        if line == TERMINATOR {
            return Some(std::mem::take(&mut self.current));
        }

        if let Some(text) = line.strip_prefix(OUTPUT_PREFIX) {
            let output = &mut self.current.output;
            if output.chars().count() < self.limit {
                output.push_str(text);
                output.push('\n');
                if let Some((cut, _)) = output.char_indices().nth(self.limit) {
                    output.truncate(cut);
                }
                return None;
            }
        } else if let Some(reason) = line.strip_prefix(ERROR_PREFIX) {
            self.current.diagnostic = Some(reason.to_string());
            return None;
        }

        trace!(line, "discarded output");
        None
    }
}

/// Prepare a command for sending: keep printable ASCII only.
///
/// This also removes line breaks, so the command is always a single line.
pub fn encode_command(command: &str) -> String {
    command.chars().filter(|c| (' '..='~').contains(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed(reader: &mut ResponseReader, lines: &[&str]) -> Option<ParsedResponse> {
        let mut last = None;
        for line in lines {
            last = reader.push_line(line);
        }
        last
    }

    #[test]
    fn test_simple_response() {
        let mut reader = ResponseReader::new(1000);
        assert_eq!(reader.push_line(" OUTPUT hi"), None);
        let response = reader.push_line("EOF").unwrap();
        assert_eq!(response.output, "hi\n");
        assert_eq!(response.diagnostic, None);
    }

    #[test]
    fn test_empty_response() {
        let mut reader = ResponseReader::new(1000);
        assert_eq!(reader.push_line("EOF"), Some(ParsedResponse::default()));
    }

    #[test]
    fn test_unknown_lines_ignored() {
        let mut reader = ResponseReader::new(1000);
        let response = feed(
            &mut reader,
            &["$ echo hi", " OUTPUT hi", "garbage", "OUTPUT nope", "EOF"],
        )
        .unwrap();
        assert_eq!(response.output, "hi\n");
    }

    #[test]
    fn test_output_capped() {
        let mut reader = ResponseReader::new(10);
        let response = feed(
            &mut reader,
            &[" OUTPUT 12345", " OUTPUT 67890", " OUTPUT dropped", "EOF"],
        )
        .unwrap();
        assert_eq!(response.output, "12345\n6789");
    }

    #[test]
    fn test_diagnostic() {
        let mut reader = ResponseReader::new(1000);
        let response = feed(&mut reader, &[" ERROR Failed to launch", "EOF"]).unwrap();
        assert_eq!(response.output, "");
        assert_eq!(response.diagnostic.as_deref(), Some("Failed to launch"));
    }

    #[test]
    fn test_responses_are_independent() {
        let mut reader = ResponseReader::new(1000);
        let first = feed(&mut reader, &[" ERROR boom", " OUTPUT a", "EOF"]).unwrap();
        let second = feed(&mut reader, &[" OUTPUT b", "EOF"]).unwrap();

        assert_eq!(first.output, "a\n");
        assert_eq!(second.output, "b\n");
        assert_eq!(second.diagnostic, None);
    }

    #[test]
    fn test_encode_command() {
        assert_eq!(encode_command("echo hi"), "echo hi");
        assert_eq!(encode_command("echo h\u{e9}\nrm -rf /\t"), "echo hrm -rf /");
    }
}
