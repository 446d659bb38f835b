//! WAL reader for recovery.

use super::record::WalRecord;
use super::WAL_FILE;
use crate::error::WalResult;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// Replays the records of a node working directory.
///
/// A missing log file simply yields no records: a node starting with a
/// clean directory has nothing to recover.
pub struct WalReader {
    dir: PathBuf,
}

impl WalReader {
    /// Create a reader over the given working directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Read every intact record, in append order.
    ///
    /// Torn tails (lines without the `EOL` terminator) and garbled lines are
    /// skipped; a torn tail is the expected artifact of a crash mid-append.
    ///
    /// # Errors
    ///
    /// Fails only on I/O errors other than the log file being absent.
    pub fn read_all(&self) -> WalResult<Vec<WalRecord>> {
        let path = self.dir.join(WAL_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            match WalRecord::parse_line(&line) {
                Some(record) => records.push(record),
                None => {
                    tracing::debug!(line = index + 1, "skipping torn or garbled wal line");
                }
            }
        }
        Ok(records)
    }
}
