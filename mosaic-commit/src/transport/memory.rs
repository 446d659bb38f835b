//! In-memory transport for tests and single-process experiments.

use super::{MessageHandler, Transport};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Decides whether a frame is delivered: `(src, dest, frame) -> deliver?`.
pub type DropFilter = Box<dyn Fn(&str, &str, &[u8]) -> bool + Send + Sync>;

/// An in-process message hub.
///
/// Nodes register their [`MessageHandler`] under their address and obtain
/// per-node [`MemoryTransport`] endpoints for sending. Delivery happens on a
/// spawned task, so it is asynchronous and unordered like the real thing;
/// frames to unregistered addresses are silently dropped, which doubles as
/// the crash simulation for tests.
#[derive(Default)]
pub struct MemoryNetwork {
    nodes: Mutex<HashMap<String, Arc<dyn MessageHandler>>>,
    filter: Mutex<Option<DropFilter>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node's inbound handler under its address.
    pub fn register(&self, id: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.nodes.lock().insert(id.into(), handler);
    }

    /// Detach a node; subsequent frames to it are dropped.
    pub fn unregister(&self, id: &str) {
        self.nodes.lock().remove(id);
    }

    /// Install a drop filter. The filter returns `true` to deliver.
    pub fn set_filter(&self, filter: DropFilter) {
        *self.filter.lock() = Some(filter);
    }

    /// Remove the drop filter.
    pub fn clear_filter(&self) {
        *self.filter.lock() = None;
    }

    /// Create a sending endpoint bound to a local address.
    #[must_use]
    pub fn endpoint(self: &Arc<Self>, local_id: impl Into<String>) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            network: Arc::clone(self),
            local_id: local_id.into(),
        })
    }

    fn deliver(&self, src: String, dest: &str, frame: Bytes) {
        if let Some(filter) = self.filter.lock().as_ref() {
            if !filter(&src, dest, &frame) {
                tracing::debug!(%src, %dest, "drop filter discarded frame");
                return;
            }
        }

        let handler = match self.nodes.lock().get(dest) {
            Some(handler) => Arc::clone(handler),
            None => {
                tracing::debug!(%src, %dest, "frame to unregistered node dropped");
                return;
            }
        };

        // Deliver off the sender's stack so in-handler sends cannot recurse.
        tokio::spawn(async move {
            if !handler.on_message(&src, &frame) {
                tracing::debug!(%src, "handler declined frame; dropping");
            }
        });
    }
}

/// Sending endpoint bound to one node of a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    local_id: String,
}

impl Transport for MemoryTransport {
    fn send(&self, dest: &str, frame: Bytes) {
        self.network.deliver(self.local_id.clone(), dest, frame);
    }
}
