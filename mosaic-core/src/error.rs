//! Error types for the core protocol building blocks.

use thiserror::Error;

/// Errors produced by the wire codec.
///
/// Every variant means the frame is malformed; the receiving node drops the
/// frame and carries on. Decoding must never crash the receiver.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer ended before a fixed-width field could be read.
    #[error("frame truncated: needed {needed} more byte(s) at offset {offset}")]
    Truncated {
        /// Bytes missing to complete the read.
        needed: usize,
        /// Offset at which the read was attempted.
        offset: usize,
    },

    /// A length prefix declares more bytes than the frame still holds.
    #[error("declared length {declared} exceeds {remaining} remaining byte(s)")]
    LengthOverrun {
        /// The declared field length.
        declared: usize,
        /// Bytes actually remaining in the frame.
        remaining: usize,
    },

    /// The message type tag is not part of the protocol.
    #[error("unknown message type {0}")]
    UnknownKind(u32),

    /// A string field holds invalid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// A string is too long for its two-byte length prefix.
    #[error("string of {0} bytes exceeds the u16 length prefix")]
    StringTooLong(usize),

    /// Trailing garbage after a complete message body.
    #[error("{0} trailing byte(s) after message body")]
    TrailingBytes(usize),
}

/// Errors produced by the write-ahead log.
///
/// A failed append or sync on the write path voids the durability claim of
/// the commit protocol; callers must treat it as fatal for the node.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying file system failure.
    #[error("wal i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Another process holds the log file.
    #[error("wal file {path} is locked by another process")]
    Locked {
        /// Path of the contended log file.
        path: String,
    },
}

/// Result alias for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Result alias for codec operations.
pub type WireResult<T> = Result<T, WireError>;
