//! Error types for node operations.

use mosaic_core::{WalError, WireError};
use thiserror::Error;

/// Result type for node operations.
pub type NodeResult<T> = std::result::Result<T, NodeError>;

/// Errors that can occur while running a coordinator or participant.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Write-ahead log failure. On the write path this is fatal: the
    /// protocol's durability claim is void and the node refuses to continue.
    #[error("write-ahead log failure: {0}")]
    Wal(#[from] WalError),

    /// A frame could not be encoded; only possible for oversized strings.
    #[error("codec failure: {0}")]
    Wire(#[from] WireError),

    /// Non-WAL file system failure (destination publish, blob restore).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
