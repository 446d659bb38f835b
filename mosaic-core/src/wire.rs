//! Binary message codec shared by coordinator and participants.
//!
//! Every message body starts with a fixed header:
//!
//! ```text
//! +---------------------+---------------------+----------------------+
//! | message type (u32)  | transaction id (u32)| type-specific fields |
//! +---------------------+---------------------+----------------------+
//! ```
//!
//! All integers are big-endian. Strings are encoded as a two-byte
//! big-endian length followed by the UTF-8 bytes, matching the Java
//! data-stream encoding so cross-language peers stay bit-compatible.
//! Booleans are a single byte, nonzero meaning `true`.
//!
//! Decoding performs bounded reads only: every length prefix is validated
//! against the remaining buffer before any allocation, and any shortfall
//! yields a [`WireError`]. A malformed frame is dropped by the receiver,
//! never propagated as a crash.

use crate::error::{WireError, WireResult};
use crate::types::TxnId;

/// Wire tag for a coordinator→participant vote request.
pub const KIND_VOTE_REQUEST: u32 = 0;
/// Wire tag for a coordinator→participant decision broadcast.
pub const KIND_VOTE_OUTCOME: u32 = 1;
/// Wire tag for a participant→coordinator vote reply.
pub const KIND_VOTE_RESPONSE: u32 = 2;
/// Wire tag for a participant→coordinator outcome acknowledgement.
pub const KIND_VOTE_ACK: u32 = 3;

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Coordinator asks a participant to stage the listed files.
    VoteRequest {
        /// Transaction this request belongs to.
        txn: TxnId,
        /// The composite image being committed.
        image: Vec<u8>,
        /// Files this participant would relinquish.
        files: Vec<String>,
    },

    /// Coordinator broadcasts its binding decision.
    VoteOutcome {
        /// Transaction the decision is for.
        txn: TxnId,
        /// `true` to commit, `false` to abort.
        commit: bool,
    },

    /// Participant replies to a vote request.
    VoteResponse {
        /// Transaction the vote is for.
        txn: TxnId,
        /// `true` when the participant staged the files.
        granted: bool,
    },

    /// Participant confirms it applied the outcome locally.
    VoteAck {
        /// Transaction the acknowledgement is for.
        txn: TxnId,
        /// Identity of the acknowledging participant.
        participant: String,
    },
}

impl Message {
    /// The transaction this message belongs to.
    #[must_use]
    pub fn txn(&self) -> TxnId {
        match self {
            Self::VoteRequest { txn, .. }
            | Self::VoteOutcome { txn, .. }
            | Self::VoteResponse { txn, .. }
            | Self::VoteAck { txn, .. } => *txn,
        }
    }

    /// The wire tag of this message.
    #[must_use]
    pub fn kind(&self) -> u32 {
        match self {
            Self::VoteRequest { .. } => KIND_VOTE_REQUEST,
            Self::VoteOutcome { .. } => KIND_VOTE_OUTCOME,
            Self::VoteResponse { .. } => KIND_VOTE_RESPONSE,
            Self::VoteAck { .. } => KIND_VOTE_ACK,
        }
    }

    /// Human-readable name, used in log fields.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::VoteRequest { .. } => "VoteRequest",
            Self::VoteOutcome { .. } => "VoteOutcome",
            Self::VoteResponse { .. } => "VoteResponse",
            Self::VoteAck { .. } => "VoteAck",
        }
    }

    /// Serialize the message into a frame body.
    ///
    /// # Errors
    ///
    /// Fails only when a string field exceeds the two-byte length prefix.
    pub fn encode(&self) -> WireResult<Vec<u8>> {
        let mut frame = FrameBuilder::new();
        frame.put_u32(self.kind());
        frame.put_u32(self.txn().as_u32());

        match self {
            Self::VoteRequest { image, files, .. } => {
                frame.put_u32(image.len() as u32);
                frame.put_bytes(image);
                frame.put_u32(files.len() as u32);
                for file in files {
                    frame.put_utf(file)?;
                }
            }
            Self::VoteOutcome { commit, .. } => frame.put_bool(*commit),
            Self::VoteResponse { granted, .. } => frame.put_bool(*granted),
            Self::VoteAck { participant, .. } => frame.put_utf(participant)?,
        }

        Ok(frame.into_bytes())
    }

    /// Parse a frame body into a message.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] when the header or any length-prefixed field
    /// is truncated, declares a length past the end of the frame, carries an
    /// unknown type tag, or leaves trailing bytes.
    pub fn decode(frame: &[u8]) -> WireResult<Self> {
        let mut reader = FrameReader::new(frame);
        let kind = reader.get_u32()?;
        let txn = TxnId::new(reader.get_u32()?);

        let message = match kind {
            KIND_VOTE_REQUEST => {
                let image_len = reader.get_u32()? as usize;
                let image = reader.get_bytes(image_len)?.to_vec();
                let n_files = reader.get_u32()? as usize;
                // Each file needs at least its two length bytes; bound the
                // allocation before trusting the declared count.
                if n_files > reader.remaining() / 2 {
                    return Err(WireError::LengthOverrun {
                        declared: n_files,
                        remaining: reader.remaining() / 2,
                    });
                }
                let mut files = Vec::with_capacity(n_files);
                for _ in 0..n_files {
                    files.push(reader.get_utf()?);
                }
                Self::VoteRequest { txn, image, files }
            }
            KIND_VOTE_OUTCOME => Self::VoteOutcome {
                txn,
                commit: reader.get_bool()?,
            },
            KIND_VOTE_RESPONSE => Self::VoteResponse {
                txn,
                granted: reader.get_bool()?,
            },
            KIND_VOTE_ACK => Self::VoteAck {
                txn,
                participant: reader.get_utf()?,
            },
            other => return Err(WireError::UnknownKind(other)),
        };

        reader.finish()?;
        Ok(message)
    }
}

/// Append-only builder for an outgoing frame.
struct FrameBuilder {
    buf: Vec<u8>,
}

impl FrameBuilder {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn put_utf(&mut self, s: &str) -> WireResult<()> {
        let len = s.len();
        let prefix =
            u16::try_from(len).map_err(|_| WireError::StringTooLong(len))?;
        self.buf.extend_from_slice(&prefix.to_be_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Checked cursor over an incoming frame.
struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn get_bytes(&mut self, len: usize) -> WireResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(WireError::LengthOverrun {
                declared: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn get_fixed<const N: usize>(&mut self) -> WireResult<[u8; N]> {
        if N > self.remaining() {
            return Err(WireError::Truncated {
                needed: N - self.remaining(),
                offset: self.pos,
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn get_u32(&mut self) -> WireResult<u32> {
        Ok(u32::from_be_bytes(self.get_fixed::<4>()?))
    }

    fn get_u16(&mut self) -> WireResult<u16> {
        Ok(u16::from_be_bytes(self.get_fixed::<2>()?))
    }

    fn get_bool(&mut self) -> WireResult<bool> {
        Ok(self.get_fixed::<1>()?[0] != 0)
    }

    fn get_utf(&mut self) -> WireResult<String> {
        let len = self.get_u16()? as usize;
        let bytes = self.get_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    /// Assert the frame has been fully consumed.
    fn finish(&self) -> WireResult<()> {
        if self.remaining() > 0 {
            return Err(WireError::TrailingBytes(self.remaining()));
        }
        Ok(())
    }
}
