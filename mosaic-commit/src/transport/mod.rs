//! Transport seam: outbound sends and inbound dispatch.
//!
//! The protocol only assumes best-effort, unordered delivery of
//! self-contained frames; correctness comes from idempotence and per-TID
//! state, never from the transport. Two implementations ship with the
//! crate:
//!
//! - [`memory::MemoryNetwork`] — in-process hub for tests, with a
//!   programmable drop filter to exercise loss and retransmission.
//! - [`tcp`] — length-prefixed frames over short-lived TCP connections,
//!   used by the binaries.

pub mod memory;
pub mod tcp;

use bytes::Bytes;

/// Well-known address of the single coordinator in a deployment.
pub const COORDINATOR_ADDR: &str = "coordinator";

/// Outbound half of the transport.
pub trait Transport: Send + Sync + 'static {
    /// Send one frame to the named destination.
    ///
    /// Non-blocking and best-effort: the frame may be dropped or reordered,
    /// and failures surface nowhere — the protocol's timers drive retries.
    fn send(&self, dest: &str, frame: Bytes);
}

/// Inbound half of the transport.
pub trait MessageHandler: Send + Sync + 'static {
    /// Deliver one inbound frame from `src`.
    ///
    /// Return `true` to consume the frame (including the case of a
    /// malformed frame that was accepted and discarded), `false` to ask the
    /// transport to requeue it.
    fn on_message(&self, src: &str, frame: &[u8]) -> bool;
}
