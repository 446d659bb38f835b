//! Participant crash recovery.

use super::Participant;
use crate::error::NodeResult;
use mosaic_core::wal::{WalReader, WalRecord};
use mosaic_core::{Message, TxnId};
use std::collections::HashMap;
use tracing::{debug, info};

/// The participant-side reading of a transaction's WAL history: the latest
/// record wins.
enum Latest {
    Staged(Vec<String>),
    Applied,
}

/// Fold the records into per-transaction latest state. Coordinator-typed
/// records are ignored; they belong to a different node kind.
fn scan(records: Vec<WalRecord>) -> HashMap<TxnId, Latest> {
    let mut latest = HashMap::new();
    for record in records {
        match record {
            WalRecord::Staged { txn, files } => {
                latest.insert(txn, Latest::Staged(files));
            }
            WalRecord::Applied { txn } => {
                latest.insert(txn, Latest::Applied);
            }
            other => {
                debug!(txn = %other.txn(), code = other.type_code(), "ignoring foreign wal record");
            }
        }
    }
    latest
}

impl Participant {
    /// Replay the WAL and reconstruct staged state.
    ///
    /// Every transaction whose latest record is a staged-commit gets its
    /// files re-locked and its YES vote re-sent, so the coordinator's
    /// retransmitted outcome can converge. Applied transactions need
    /// nothing. Running recovery twice without intervening traffic is a
    /// no-op the second time.
    ///
    /// # Errors
    ///
    /// Fails when the WAL cannot be read.
    pub fn recover(&self) -> NodeResult<()> {
        let records = WalReader::new(&self.config.data_dir).read_all()?;
        let mut restored = 0usize;

        for (txn, latest) in scan(records) {
            match latest {
                Latest::Applied => {}
                Latest::Staged(files) => {
                    {
                        let mut table = self.table.lock();
                        for file in &files {
                            table.locked.insert(file.clone());
                        }
                        table.staged.insert(txn, files);
                    }
                    // The staged record is already durable; just re-vote.
                    self.send(&Message::VoteResponse { txn, granted: true });
                    restored += 1;
                }
            }
        }

        info!(
            participant = %self.config.id,
            restored,
            "participant recovery complete"
        );
        Ok(())
    }
}
