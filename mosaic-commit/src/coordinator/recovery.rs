//! Coordinator crash recovery.

use super::txn::TxnDriver;
use super::{Coordinator, TxnHandle};
use crate::error::NodeResult;
use mosaic_core::wal::{WalReader, WalRecord};
use mosaic_core::{Message, TxnId};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Parsed payload of a decision record.
struct DecisionRecord {
    commit: bool,
    filename: String,
    blob: String,
}

/// Per-transaction summary of the WAL: the latest record type wins, with
/// the participant-list and decision payloads retained along the way.
#[derive(Default)]
struct TxnScan {
    latest: u8,
    participants: Vec<String>,
    decision: Option<DecisionRecord>,
}

/// Fold the log into per-transaction summaries. Participant-typed records
/// are ignored; they belong to a different node kind.
fn scan(records: Vec<WalRecord>) -> HashMap<TxnId, TxnScan> {
    let mut scans: HashMap<TxnId, TxnScan> = HashMap::new();
    for record in records {
        match record {
            WalRecord::Participants { txn, participants } => {
                let entry = scans.entry(txn).or_default();
                entry.latest = 0;
                entry.participants = participants;
            }
            WalRecord::Decision {
                txn,
                commit,
                filename,
                blob,
            } => {
                let entry = scans.entry(txn).or_default();
                entry.latest = 1;
                entry.decision = Some(DecisionRecord {
                    commit,
                    filename,
                    blob,
                });
            }
            WalRecord::Completed { txn } => {
                scans.entry(txn).or_default().latest = 2;
            }
            other => {
                debug!(txn = %other.txn(), code = other.type_code(), "ignoring foreign wal record");
            }
        }
    }
    scans
}

impl Coordinator {
    /// Replay the WAL and finish what the previous run started.
    ///
    /// - Completed transactions need nothing.
    /// - Transactions with only a participant list, or with an abort
    ///   decision, are effectively aborted: the abort outcome is re-sent so
    ///   participants release their locks, and no acks are collected.
    /// - Transactions with a commit decision get the destination restored
    ///   from the blob snapshot, the commit outcome re-sent, and a fresh
    ///   ack-collection round with the full retry budget.
    ///
    /// Also re-seeds the TID allocator above every logged id. Must be
    /// invoked from within a tokio runtime, with the transport already
    /// constructed so the re-sent outcomes can leave the node.
    ///
    /// # Errors
    ///
    /// Fails when the WAL or a blob cannot be read.
    pub fn recover(self: &Arc<Self>) -> NodeResult<()> {
        let records = WalReader::new(&self.config.data_dir).read_all()?;

        if let Some(max) = records.iter().map(|r| r.txn().as_u32()).max() {
            self.next_txn.store(max + 1, Ordering::SeqCst);
        }

        let mut aborts = 0usize;
        let mut commits = 0usize;
        for (txn, state) in scan(records) {
            match (state.latest, &state.decision) {
                // Finished; nothing to do.
                (2, _) => {}

                // Commit decided but never marked completed.
                (1, Some(decision)) if decision.commit => {
                    match self.wal.read_blob(&decision.blob)? {
                        Some(image) => self.publish(&decision.filename, &image),
                        None => warn!(
                            %txn,
                            blob = %decision.blob,
                            "blob missing; destination not restored"
                        ),
                    }
                    self.resume_commit(txn, state.participants);
                    commits += 1;
                }

                // Never decided, or decided abort: either way the outcome
                // participants must hear is abort, and acks are not owed.
                _ => {
                    for participant in &state.participants {
                        self.send_message(
                            participant,
                            &Message::VoteOutcome {
                                txn,
                                commit: false,
                            },
                        );
                    }
                    aborts += 1;
                }
            }
        }

        info!(
            resumed_commits = commits,
            reannounced_aborts = aborts,
            next_txn = self.next_txn.load(Ordering::SeqCst),
            "coordinator recovery complete"
        );
        Ok(())
    }

    /// Re-enter ack collection for a recovered commit, with a fresh ack
    /// tracker; re-acking is idempotent on the participants.
    fn resume_commit(self: &Arc<Self>, txn: TxnId, participants: Vec<String>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.inflight
            .lock()
            .insert(txn, TxnHandle { events: events_tx });

        let groups = participants
            .into_iter()
            .map(|p| (p, Vec::new()))
            .collect();
        let driver = TxnDriver::new(
            Arc::clone(self),
            txn,
            String::new(),
            Vec::new(),
            groups,
            events_rx,
        );
        tokio::spawn(driver.run_resumed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_keeps_latest_record_and_payloads() {
        let records = vec![
            WalRecord::Participants {
                txn: TxnId::new(1),
                participants: vec!["a".to_string()],
            },
            WalRecord::Decision {
                txn: TxnId::new(1),
                commit: true,
                filename: "out.png".to_string(),
                blob: "1_img.bin".to_string(),
            },
            WalRecord::Participants {
                txn: TxnId::new(2),
                participants: vec!["b".to_string()],
            },
            WalRecord::Completed { txn: TxnId::new(1) },
        ];

        let scans = scan(records);
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[&TxnId::new(1)].latest, 2);
        assert!(scans[&TxnId::new(1)].decision.as_ref().is_some_and(|d| d.commit));
        assert_eq!(scans[&TxnId::new(2)].latest, 0);
        assert_eq!(scans[&TxnId::new(2)].participants, vec!["b"]);
    }

    #[test]
    fn scan_is_deterministic() {
        let records = || {
            vec![
                WalRecord::Participants {
                    txn: TxnId::new(4),
                    participants: vec!["a".to_string(), "b".to_string()],
                },
                WalRecord::Decision {
                    txn: TxnId::new(4),
                    commit: false,
                    filename: "out.png".to_string(),
                    blob: "4_img.bin".to_string(),
                },
            ]
        };

        let first = scan(records());
        let second = scan(records());
        assert_eq!(first.len(), second.len());
        assert_eq!(first[&TxnId::new(4)].latest, second[&TxnId::new(4)].latest);
        assert_eq!(
            first[&TxnId::new(4)].participants,
            second[&TxnId::new(4)].participants
        );
    }
}
