//! Per-transaction driver: the four protocol phases on one task.

use super::{Coordinator, TxnEvent};
use crate::error::NodeResult;
use mosaic_core::wal::{blob_name, WalRecord};
use mosaic_core::{Decision, Message, TxnId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Drives one transaction through prepare, decide, notify and ack-collect.
pub(crate) struct TxnDriver {
    node: Arc<Coordinator>,
    txn: TxnId,
    filename: String,
    image: Vec<u8>,
    /// Participant address → the files it contributes.
    groups: HashMap<String, Vec<String>>,
    events: mpsc::UnboundedReceiver<TxnEvent>,
}

impl TxnDriver {
    pub(crate) fn new(
        node: Arc<Coordinator>,
        txn: TxnId,
        filename: String,
        image: Vec<u8>,
        groups: HashMap<String, Vec<String>>,
        events: mpsc::UnboundedReceiver<TxnEvent>,
    ) -> Self {
        Self {
            node,
            txn,
            filename,
            image,
            groups,
            events,
        }
    }

    /// Run a fresh transaction to completion.
    pub(crate) async fn run(mut self) {
        let result = self.drive().await;
        self.node.inflight.lock().remove(&self.txn);
        if let Err(e) = result {
            self.node.fail(&e);
        }
    }

    /// Run a transaction recovered in the committed-but-unfinished state:
    /// the decision is already durable, only notify and ack-collect remain.
    pub(crate) async fn run_resumed(mut self) {
        let result = self.resume().await;
        self.node.inflight.lock().remove(&self.txn);
        if let Err(e) = result {
            self.node.fail(&e);
        }
    }

    async fn drive(&mut self) -> NodeResult<()> {
        // The participant list must be durable before the first prepare
        // leaves the node.
        self.node.wal.append_durable(&WalRecord::Participants {
            txn: self.txn,
            participants: self.participant_list(),
        })?;

        self.send_vote_requests();
        let decision = self.collect_votes().await;

        // Commit durability order: blob snapshot, decision record, then
        // publish; the outcome broadcast comes after all three.
        let blob = if decision.is_commit() {
            self.node.wal.write_blob(self.txn, &self.image)?
        } else {
            blob_name(self.txn)
        };
        self.node.wal.append_durable(&WalRecord::Decision {
            txn: self.txn,
            commit: decision.is_commit(),
            filename: self.filename.clone(),
            blob,
        })?;

        if decision.is_commit() {
            self.node.publish(&self.filename, &self.image);
        }

        self.broadcast_outcome(decision, None);
        self.collect_acks(decision).await;

        self.node
            .wal
            .append_durable(&WalRecord::Completed { txn: self.txn })?;
        info!(txn = %self.txn, %decision, "transaction completed");
        Ok(())
    }

    async fn resume(&mut self) -> NodeResult<()> {
        self.broadcast_outcome(Decision::Commit, None);
        self.collect_acks(Decision::Commit).await;
        self.node
            .wal
            .append_durable(&WalRecord::Completed { txn: self.txn })?;
        info!(txn = %self.txn, "recovered transaction completed");
        Ok(())
    }

    /// Sorted participant addresses, for a deterministic WAL record.
    fn participant_list(&self) -> Vec<String> {
        let mut participants: Vec<String> = self.groups.keys().cloned().collect();
        participants.sort();
        participants
    }

    /// One vote request per participant, carrying only its files.
    fn send_vote_requests(&self) {
        for (participant, files) in &self.groups {
            self.node.send_message(
                participant,
                &Message::VoteRequest {
                    txn: self.txn,
                    image: self.image.clone(),
                    files: files.clone(),
                },
            );
        }
    }

    /// Await votes until every participant said yes or the deadline passes.
    ///
    /// Duplicate yes votes are collapsed by sender identity; any no vote or
    /// the deadline converts the decision to abort. Votes arriving after the
    /// deadline are dropped by the caller's later phases.
    async fn collect_votes(&mut self) -> Decision {
        let deadline = Instant::now() + self.node.config.timing.vote_timeout();
        let mut granted: HashSet<String> = HashSet::new();

        while granted.len() < self.groups.len() {
            match timeout_at(deadline, self.events.recv()).await {
                Err(_) => {
                    info!(
                        txn = %self.txn,
                        granted = granted.len(),
                        needed = self.groups.len(),
                        "vote phase timed out; aborting"
                    );
                    return Decision::Abort;
                }
                // Channel closed: the node is going away.
                Ok(None) => return Decision::Abort,
                Ok(Some(TxnEvent::Vote { from, granted: vote })) => {
                    if !vote {
                        info!(txn = %self.txn, participant = %from, "participant refused; aborting");
                        return Decision::Abort;
                    }
                    if self.groups.contains_key(&from) {
                        granted.insert(from);
                    } else {
                        debug!(txn = %self.txn, participant = %from, "yes vote from unknown participant");
                    }
                }
                Ok(Some(TxnEvent::Ack { participant })) => {
                    debug!(txn = %self.txn, %participant, "ack before decision ignored");
                }
            }
        }

        Decision::Commit
    }

    /// Send the outcome to every participant, or only the listed subset.
    ///
    /// Abort notifications go to all participants too — a no-voter may hold
    /// no locks, but the yes-voters must release theirs.
    fn broadcast_outcome(&self, decision: Decision, only: Option<&HashSet<String>>) {
        for participant in self.groups.keys() {
            if let Some(subset) = only {
                if !subset.contains(participant) {
                    continue;
                }
            }
            self.node.send_message(
                participant,
                &Message::VoteOutcome {
                    txn: self.txn,
                    commit: decision.is_commit(),
                },
            );
        }
    }

    /// Collect acks, retransmitting the outcome to the silent participants
    /// each window, up to the configured number of rounds.
    async fn collect_acks(&mut self, decision: Decision) {
        let total = self.groups.len();
        let mut acked: HashSet<String> = HashSet::new();
        let mut rounds = 0u32;

        loop {
            let deadline = Instant::now() + self.node.config.timing.ack_timeout();
            while acked.len() < total {
                match timeout_at(deadline, self.events.recv()).await {
                    Err(_) => break,
                    Ok(None) => return,
                    Ok(Some(TxnEvent::Ack { participant })) => {
                        if self.groups.contains_key(&participant) {
                            acked.insert(participant);
                        } else {
                            debug!(txn = %self.txn, %participant, "ack from unknown participant");
                        }
                    }
                    Ok(Some(TxnEvent::Vote { from, .. })) => {
                        debug!(txn = %self.txn, participant = %from, "vote after deadline dropped");
                    }
                }
            }

            if acked.len() == total {
                return;
            }
            if rounds >= self.node.config.timing.max_outcome_rounds {
                let missing: Vec<&String> = self
                    .groups
                    .keys()
                    .filter(|p| !acked.contains(*p))
                    .collect();
                warn!(
                    txn = %self.txn,
                    ?missing,
                    rounds,
                    "giving up on outcome acks after retry budget"
                );
                self.node.abandoned.fetch_add(1, Ordering::Relaxed);
                return;
            }

            rounds += 1;
            let pending: HashSet<String> = self
                .groups
                .keys()
                .filter(|p| !acked.contains(*p))
                .cloned()
                .collect();
            debug!(txn = %self.txn, round = rounds, pending = pending.len(), "retransmitting outcome");
            self.broadcast_outcome(decision, Some(&pending));
        }
    }
}
