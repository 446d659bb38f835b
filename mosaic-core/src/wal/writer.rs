//! WAL writer: appends, blob side-files and the explicit sync barrier.

use super::record::WalRecord;
use super::{BLOB_SUFFIX, WAL_FILE};
use crate::error::{WalError, WalResult};
use crate::types::TxnId;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write-ahead log bound to one node's working directory.
///
/// All appends funnel through one mutex; durability is explicit via
/// [`Wal::sync`], which the protocol invokes after each logically linked
/// group of appends. The log file is held under an exclusive advisory lock
/// so two node processes cannot share a working directory.
pub struct Wal {
    file: Mutex<File>,
    dir: PathBuf,
}

impl Wal {
    /// Create or open the log in the given working directory.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created, the log file cannot be
    /// opened, or another process already holds the lock.
    pub fn open(dir: impl Into<PathBuf>) -> WalResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(WAL_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.try_lock_exclusive().map_err(|_| WalError::Locked {
            path: path.display().to_string(),
        })?;

        Ok(Self {
            file: Mutex::new(file),
            dir,
        })
    }

    /// Append one record. Durability requires a subsequent [`Wal::sync`].
    ///
    /// # Errors
    ///
    /// An I/O failure here voids the protocol's durability claim; callers
    /// treat it as fatal for the node.
    pub fn append(&self, record: &WalRecord) -> WalResult<()> {
        let mut file = self.file.lock();
        let mut line = record.to_line();
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Durability barrier over all previous appends.
    ///
    /// # Errors
    ///
    /// Same fatality as [`Wal::append`].
    pub fn sync(&self) -> WalResult<()> {
        let file = self.file.lock();
        file.sync_data()?;
        Ok(())
    }

    /// Append a record and immediately sync it.
    ///
    /// # Errors
    ///
    /// Same fatality as [`Wal::append`].
    pub fn append_durable(&self, record: &WalRecord) -> WalResult<()> {
        self.append(record)?;
        self.sync()
    }

    /// Write the image blob side-file for a transaction and make it durable.
    ///
    /// Must complete before the decision record referring to it is appended.
    /// Returns the blob's file name (relative to the working directory), the
    /// form stored in the decision record.
    ///
    /// # Errors
    ///
    /// Propagates file system failures; the caller decides fatality.
    pub fn write_blob(&self, txn: TxnId, image: &[u8]) -> WalResult<String> {
        let name = blob_name(txn);
        let path = self.dir.join(&name);
        let mut file = File::create(&path)?;
        file.write_all(image)?;
        file.sync_all()?;
        Ok(name)
    }

    /// Read a blob side-file back, if it still exists.
    ///
    /// # Errors
    ///
    /// Propagates failures other than the file being absent.
    pub fn read_blob(&self, blob: &str) -> WalResult<Option<Vec<u8>>> {
        let path = self.dir.join(blob);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The node working directory this log lives in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Blob side-file name for a transaction: `<tid>_img.bin`.
#[must_use]
pub fn blob_name(txn: TxnId) -> String {
    format!("{}{}", txn.as_u32(), BLOB_SUFFIX)
}
