//! Write-ahead log for the commit protocol.
//!
//! Both node kinds persist their intentions here before acting on them:
//!
//! ```text
//! <working dir>/
//! ├── wal.log        # line-oriented record log, append-only
//! └── <tid>_img.bin  # coordinator-side image blob per committed txn
//! ```
//!
//! The log is a text file with one record per line, comma-separated fields
//! terminated by the literal token `EOL`. A line without the terminator is
//! a torn tail from a crash mid-write and is ignored on replay; that rule is
//! the only protection against partial writes, so records must never contain
//! embedded newlines.
//!
//! Appends go through a single process-wide mutex. Durability is explicit:
//! the caller invokes [`Wal::sync`] after logically linked appends, mirroring
//! the protocol's fsync barriers.

mod reader;
mod record;
mod writer;

pub use reader::WalReader;
pub use record::WalRecord;
pub use writer::{blob_name, Wal};

/// Name of the log file inside a node's working directory.
pub const WAL_FILE: &str = "wal.log";

/// Suffix of coordinator-side image blob files.
pub const BLOB_SUFFIX: &str = "_img.bin";
