//! Replbox Protocol - the line protocol between replbox and its caller.
//!
//! The caller writes one shell command per line. For every command replbox
//! answers with zero or more output lines and exactly one terminator:
//!
//! ```text
//! > echo hi
//! <  OUTPUT hi
//! < EOF
//! ```
//!
//! A command that could not be started is answered with a single
//! `" ERROR "` line before the terminator. So is a timed-out command whose
//! processes could not be swept, ahead of whatever output it produced. Callers
//! that only look for `" OUTPUT "` lines and `"EOF"` can ignore it.

mod error;
mod reader;
mod response;
mod writer;

pub use error::{ProtocolError, Result};
pub use reader::CommandReader;
pub use response::{ParsedResponse, ResponseReader, encode_command};
pub use writer::{ProtocolWriter, render_response};

/// Prefix of every output line.
pub const OUTPUT_PREFIX: &str = " OUTPUT ";

/// Prefix of the launch-failure diagnostic line.
pub const ERROR_PREFIX: &str = " ERROR ";

/// Line closing every response.
pub const TERMINATOR: &str = "EOF";
