//! Error types for the line protocol.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Protocol stream error: {0}")]
    Io(#[from] std::io::Error),
}
