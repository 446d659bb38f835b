//! Coordinator node: transaction lifecycle and message routing.
//!
//! Each commit runs on its own task as a [`txn::TxnDriver`], moving through
//! `INIT → PREPARING → {DECIDE_COMMIT | DECIDE_ABORT} → AWAITING_ACKS →
//! COMPLETED`. The dispatch path here is thin: decode the frame, look up the
//! per-transaction channel by TID and forward the event; everything
//! stateful happens inside the driver.

mod recovery;
mod txn;

use crate::config::CoordinatorConfig;
use crate::error::{NodeError, NodeResult};
use crate::transport::{MessageHandler, Transport};
use bytes::Bytes;
use mosaic_core::wal::Wal;
use mosaic_core::{Message, SourceRef, TxnId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use txn::TxnDriver;

/// A participant reply routed to the owning transaction task.
#[derive(Debug)]
pub(crate) enum TxnEvent {
    /// A `VoteResponse`; `from` is the transport-level sender identity,
    /// used to collapse duplicate yes votes.
    Vote {
        /// Sending participant.
        from: String,
        /// The vote itself.
        granted: bool,
    },
    /// A `VoteAck`, keyed by the participant id carried in the message.
    Ack {
        /// Acknowledging participant.
        participant: String,
    },
}

/// Routing entry for an in-flight transaction.
struct TxnHandle {
    events: mpsc::UnboundedSender<TxnEvent>,
}

/// The coordinator node.
pub struct Coordinator {
    config: CoordinatorConfig,
    wal: Wal,
    transport: Arc<dyn Transport>,
    /// Next transaction id to allocate; re-seeded above the WAL on recovery.
    next_txn: AtomicU32,
    inflight: Mutex<HashMap<TxnId, TxnHandle>>,
    /// Transactions that exhausted the ack retry budget.
    abandoned: AtomicU64,
    fatal: watch::Sender<bool>,
}

impl Coordinator {
    /// Create a coordinator over an existing transport.
    ///
    /// Call [`Coordinator::recover`] before accepting new commits.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the WAL cannot be opened.
    pub fn new(
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
    ) -> NodeResult<Arc<Self>> {
        config.validate()?;
        let wal = Wal::open(&config.data_dir)?;
        let (fatal, _) = watch::channel(false);

        Ok(Arc::new(Self {
            config,
            wal,
            transport,
            next_txn: AtomicU32::new(1),
            inflight: Mutex::new(HashMap::new()),
            abandoned: AtomicU64::new(0),
            fatal,
        }))
    }

    /// Begin committing a collage built from the named sources.
    ///
    /// Each source is `<address>:<filepath>`, split at the first colon;
    /// unparseable sources are skipped with a warning. The call enqueues the
    /// transaction on its own task and returns immediately — it never fails
    /// to its caller. Must be invoked from within a tokio runtime.
    pub fn start_commit(
        self: &Arc<Self>,
        filename: impl Into<String>,
        image: Vec<u8>,
        sources: &[String],
    ) {
        let filename = filename.into();
        let groups = SourceRef::group_by_participant(sources);
        let parsed: usize = groups.values().map(Vec::len).sum();
        if parsed < sources.len() {
            warn!(skipped = sources.len() - parsed, "skipping unparseable sources");
        }

        let txn = TxnId::new(self.next_txn.fetch_add(1, Ordering::SeqCst));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.inflight
            .lock()
            .insert(txn, TxnHandle { events: events_tx });

        info!(
            %txn,
            destination = %filename,
            participants = groups.len(),
            "starting commit"
        );

        let driver = TxnDriver::new(Arc::clone(self), txn, filename, image, groups, events_rx);
        tokio::spawn(driver.run());
    }

    /// Number of transactions still in flight.
    #[must_use]
    pub fn pending_transactions(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Number of transactions that gave up waiting for acks.
    #[must_use]
    pub fn abandoned_outcomes(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Receiver that flips to `true` when a WAL write fails and the node
    /// refuses to continue.
    #[must_use]
    pub fn fatal_signal(&self) -> watch::Receiver<bool> {
        self.fatal.subscribe()
    }

    /// Write the destination artifact. Failures are logged, not fatal: the
    /// decision record is already durable, so the next recovery republishes
    /// from the blob.
    pub(crate) fn publish(&self, filename: &str, image: &[u8]) {
        let path = self.resolve(filename);
        match std::fs::write(&path, image) {
            Ok(()) => info!(destination = %path.display(), bytes = image.len(), "published artifact"),
            Err(e) => error!(destination = %path.display(), error = %e, "failed to publish artifact"),
        }
    }

    /// Resolve a destination path against the working directory.
    fn resolve(&self, filename: &str) -> PathBuf {
        let path = PathBuf::from(filename);
        if path.is_absolute() {
            path
        } else {
            self.config.data_dir.join(path)
        }
    }

    /// Encode and send one message, best-effort.
    pub(crate) fn send_message(&self, dest: &str, message: &Message) {
        match message.encode() {
            Ok(frame) => self.transport.send(dest, Bytes::from(frame)),
            Err(e) => error!(kind = message.name(), error = %e, "failed to encode message"),
        }
    }

    /// Forward an event to the owning transaction, dropping it when the
    /// transaction is unknown or already completed.
    fn route(&self, txn: TxnId, event: TxnEvent) {
        let inflight = self.inflight.lock();
        match inflight.get(&txn) {
            Some(handle) => {
                let _ = handle.events.send(event);
            }
            None => debug!(%txn, ?event, "event for unknown transaction dropped"),
        }
    }

    /// Record a fatal failure and refuse further work.
    pub(crate) fn fail(&self, error: &NodeError) {
        error!(error = %error, "wal write failed; node refusing to continue");
        self.fatal.send_replace(true);
    }

    fn poisoned(&self) -> bool {
        *self.fatal.borrow()
    }
}

impl MessageHandler for Coordinator {
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

        match message {
            Message::VoteResponse { txn, granted } => self.route(
                txn,
                TxnEvent::Vote {
                    from: src.to_string(),
                    granted,
                },
            ),
            Message::VoteAck { txn, participant } => {
                self.route(txn, TxnEvent::Ack { participant });
            }
            other => {
                debug!(%src, kind = other.name(), "unexpected message kind at coordinator");
            }
        }
        true
    }
}
