//! Participant node: file guarding, voting and outcome application.
//!
//! Per transaction the participant moves through `IDLE → STAGED →
//! {APPLIED_COMMIT | APPLIED_ABORT}`. A yes vote is only ever sent after
//! the staged file list is durable in the WAL and the files are locked;
//! applying an outcome is idempotent so the coordinator may retransmit
//! freely.

mod recovery;

use crate::config::ParticipantConfig;
use crate::error::NodeResult;
use crate::transport::{MessageHandler, Transport, COORDINATOR_ADDR};
use bytes::Bytes;
use mosaic_core::wal::{Wal, WalRecord};
use mosaic_core::{Message, TxnId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Decides whether the listed files may be consumed to build an image.
///
/// Invoked inside vote handling, before the lock check. Implementations may
/// block (ask a human, consult policy); the dispatch task waits.
pub trait ApprovalHook: Send + Sync + 'static {
    /// Return `true` to allow the files to be relinquished.
    fn approve(&self, image: &[u8], files: &[String]) -> bool;
}

/// Hook that approves every request, for non-interactive deployments.
pub struct AutoApprove;

impl ApprovalHook for AutoApprove {
    fn approve(&self, _image: &[u8], _files: &[String]) -> bool {
        true
    }
}

/// Runtime state guarded by the participant's single mutex.
#[derive(Default)]
struct FileTable {
    /// Paths currently reserved by some staged transaction.
    locked: HashSet<String>,
    /// Staged transactions and the files they locked.
    staged: HashMap<TxnId, Vec<String>>,
}

/// A participant node.
pub struct Participant {
    config: ParticipantConfig,
    wal: Wal,
    transport: Arc<dyn Transport>,
    hook: Arc<dyn ApprovalHook>,
    table: Mutex<FileTable>,
    fatal: watch::Sender<bool>,
}

impl Participant {
    /// Create a participant over an existing transport.
    ///
    /// Call [`Participant::recover`] before feeding it live traffic.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the WAL cannot be opened.
    pub fn new(
        config: ParticipantConfig,
        transport: Arc<dyn Transport>,
        hook: Arc<dyn ApprovalHook>,
    ) -> NodeResult<Arc<Self>> {
        config.validate()?;
        let wal = Wal::open(&config.data_dir)?;
        let (fatal, _) = watch::channel(false);

        Ok(Arc::new(Self {
            config,
            wal,
            transport,
            hook,
            table: Mutex::new(FileTable::default()),
            fatal,
        }))
    }

    /// This participant's identity.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Paths currently locked, sorted for stable assertions.
    #[must_use]
    pub fn locked_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.table.lock().locked.iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of staged transactions awaiting an outcome.
    #[must_use]
    pub fn staged_transactions(&self) -> usize {
        self.table.lock().staged.len()
    }

    /// Receiver that flips to `true` when a WAL write fails and the node
    /// refuses to continue.
    #[must_use]
    pub fn fatal_signal(&self) -> watch::Receiver<bool> {
        self.fatal.subscribe()
    }

    /// Handle a vote request: ask the hook, check the locks, stage and vote.
    fn handle_vote_request(&self, txn: TxnId, image: &[u8], files: Vec<String>) -> NodeResult<()> {
        let approved = self.hook.approve(image, &files);

        let granted = approved && {
            let mut table = self.table.lock();
            let free = files.iter().all(|file| !table.locked.contains(file));
            if free {
                // The yes vote must never outrun its staged record.
                self.wal.append_durable(&WalRecord::Staged {
                    txn,
                    files: files.clone(),
                })?;
                for file in &files {
                    table.locked.insert(file.clone());
                }
                table.staged.insert(txn, files.clone());
            }
            free
        };

        info!(%txn, granted, files = files.len(), "answering vote request");
        self.send(&Message::VoteResponse { txn, granted });
        Ok(())
    }

    /// Handle an outcome: apply it locally, persist completion, then ack.
    fn handle_outcome(&self, txn: TxnId, commit: bool) -> NodeResult<()> {
        {
            let mut table = self.table.lock();
            match table.staged.remove(&txn) {
                Some(files) => {
                    if commit {
                        for file in &files {
                            self.remove_file(file);
                        }
                    }
                    for file in &files {
                        table.locked.remove(file);
                    }
                    info!(%txn, commit, files = files.len(), "applied outcome");
                }
                None => {
                    // Unknown or already-applied transaction: ack anyway so
                    // the coordinator stops retransmitting.
                    debug!(%txn, commit, "outcome for unknown transaction");
                }
            }
        }

        // The ack must never outrun the persistent apply.
        self.wal.append_durable(&WalRecord::Applied { txn })?;
        self.send(&Message::VoteAck {
            txn,
            participant: self.config.id.clone(),
        });
        Ok(())
    }

    /// Delete a guarded file if it still exists. Idempotent.
    fn remove_file(&self, file: &str) {
        let path = self.resolve(file);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(file, "deleted committed source file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                // Not fatal: a retransmitted outcome retries the delete.
                error!(file, error = %e, "failed to delete source file");
            }
        }
    }

    /// Resolve a protocol file path against the working directory.
    fn resolve(&self, file: &str) -> PathBuf {
        let path = PathBuf::from(file);
        if path.is_absolute() {
            path
        } else {
            self.config.data_dir.join(path)
        }
    }

    fn send(&self, message: &Message) {
        match message.encode() {
            Ok(frame) => self.transport.send(COORDINATOR_ADDR, Bytes::from(frame)),
            Err(e) => error!(kind = message.name(), error = %e, "failed to encode message"),
        }
    }

    /// Record a fatal failure and refuse further work.
    fn fail(&self, error: &crate::error::NodeError) {
        error!(error = %error, "wal write failed; node refusing to continue");
        self.fatal.send_replace(true);
    }

    fn poisoned(&self) -> bool {
        *self.fatal.borrow()
    }
}

impl MessageHandler for Participant {
    fn on_message(&self, src: &str, frame: &[u8]) -> bool {
        if self.poisoned() {
            debug!(%src, "dropping frame on poisoned node");
            return true;
        }

        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                // Accepted and discarded; a bad frame must not crash us.
                warn!(%src, error = %e, "dropping malformed frame");
                return true;
            }
        };

        let result = match message {
            Message::VoteRequest { txn, image, files } => {
                self.handle_vote_request(txn, &image, files)
            }
            Message::VoteOutcome { txn, commit } => self.handle_outcome(txn, commit),
            other => {
                debug!(%src, kind = other.name(), "unexpected message kind at participant");
                Ok(())
            }
        };

        if let Err(e) = result {
            self.fail(&e);
        }
        true
    }
}
