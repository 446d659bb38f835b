//! Core building blocks for the Mosaic distributed commit protocol.
//!
//! This crate provides the pieces shared by the coordinator and the
//! participants:
//!
//! - [`types`] — strongly-typed identifiers and source references
//! - [`wire`] — the binary message codec used on the transport
//! - [`wal`] — the write-ahead log that makes protocol decisions durable
//!
//! The runtime state machines live in the `mosaic-commit` crate; everything
//! here is deliberately free of async and networking so it can be unit
//! tested in isolation.

pub mod error;
pub mod types;
pub mod wal;
pub mod wire;

pub use error::{WalError, WireError};
pub use types::{Decision, SourceRef, TxnId};
pub use wire::Message;
