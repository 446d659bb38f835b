//! Crash-tolerant two-phase commit runtime for collage artifacts.
//!
//! One coordinator drives each commit through four phases — prepare, decide,
//! notify, ack-collect — against a set of participants that own the source
//! files. Every state transition that matters for atomicity is made durable
//! in a write-ahead log before the message announcing it leaves the node, so
//! either side can crash at any point and converge after replay.
//!
//! ```text
//! ┌─────────────┐  VoteRequest   ┌──────────────┐
//! │ Coordinator │───────────────►│ Participant  │  lock files,
//! │             │◄───────────────│              │  stage durably
//! │  wal.log    │  VoteResponse  │   wal.log    │
//! │  <tid>_img  │                └──────────────┘
//! │             │  VoteOutcome   ┌──────────────┐
//! │  publish    │───────────────►│ Participant  │  delete on commit,
//! │  artifact   │◄───────────────│              │  unlock on abort
//! └─────────────┘    VoteAck     └──────────────┘
//! ```
//!
//! The transport is a seam: [`transport::Transport`] for outbound frames and
//! [`transport::MessageHandler`] for inbound dispatch. The crate ships an
//! in-memory network for tests and a TCP transport for the
//! `mosaic-coordinator` / `mosaic-participant` binaries.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod participant;
pub mod transport;

pub use config::{CoordinatorConfig, ParticipantConfig, TimingConfig};
pub use coordinator::Coordinator;
pub use error::{NodeError, NodeResult};
pub use participant::{ApprovalHook, AutoApprove, Participant};
pub use transport::{MessageHandler, Transport, COORDINATOR_ADDR};
