//! WAL record types and their line encoding.

use crate::types::TxnId;

/// Line terminator token. A line that does not end with it is a torn tail.
const EOL_TOKEN: &str = "EOL";

/// A single write-ahead log record.
///
/// The first two comma-separated fields of every line are the transaction id
/// and the record type code; the remainder is type-specific. Types 0–2 are
/// written by the coordinator, 3–4 by participants. Both sides share the
/// format so the replay code can stay common.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Coordinator: participant list for a transaction, logged before any
    /// prepare message leaves the node.
    ///
    /// Line: `tid,0,n,p1,...,pN,EOL`
    Participants {
        /// The transaction.
        txn: TxnId,
        /// Addresses of every participant in the transaction.
        participants: Vec<String>,
    },

    /// Coordinator: the binding decision, logged before any outcome message
    /// and before the destination file is published.
    ///
    /// Line: `tid,1,commit,filename,imgpath,EOL`
    Decision {
        /// The transaction.
        txn: TxnId,
        /// `true` for commit, `false` for abort.
        commit: bool,
        /// Destination filename supplied by the caller.
        filename: String,
        /// Name of the blob side-file holding the image snapshot.
        blob: String,
    },

    /// Coordinator: the transaction is fully finished.
    ///
    /// Line: `tid,2,EOL`
    Completed {
        /// The transaction.
        txn: TxnId,
    },

    /// Participant: files staged and locked, logged before the YES vote.
    ///
    /// Line: `tid,3,n,f1,...,fN,EOL`
    Staged {
        /// The transaction.
        txn: TxnId,
        /// Paths locked for this transaction.
        files: Vec<String>,
    },

    /// Participant: the outcome has been applied locally.
    ///
    /// Line: `tid,4,EOL`
    Applied {
        /// The transaction.
        txn: TxnId,
    },
}

impl WalRecord {
    /// The transaction this record belongs to.
    #[must_use]
    pub fn txn(&self) -> TxnId {
        match self {
            Self::Participants { txn, .. }
            | Self::Decision { txn, .. }
            | Self::Completed { txn }
            | Self::Staged { txn, .. }
            | Self::Applied { txn } => *txn,
        }
    }

    /// The on-disk type code.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Participants { .. } => 0,
            Self::Decision { .. } => 1,
            Self::Completed { .. } => 2,
            Self::Staged { .. } => 3,
            Self::Applied { .. } => 4,
        }
    }

    /// Render the record as a log line (without trailing newline).
    #[must_use]
    pub fn to_line(&self) -> String {
        let mut fields: Vec<String> =
            vec![self.txn().as_u32().to_string(), self.type_code().to_string()];

        match self {
            Self::Participants { participants, .. } => {
                fields.push(participants.len().to_string());
                fields.extend(participants.iter().cloned());
            }
            Self::Decision {
                commit,
                filename,
                blob,
                ..
            } => {
                fields.push(commit.to_string());
                fields.push(filename.clone());
                fields.push(blob.clone());
            }
            Self::Staged { files, .. } => {
                fields.push(files.len().to_string());
                fields.extend(files.iter().cloned());
            }
            Self::Completed { .. } | Self::Applied { .. } => {}
        }

        fields.push(EOL_TOKEN.to_string());
        fields.join(",")
    }

    /// Parse a log line back into a record.
    ///
    /// Returns `None` for torn tails (no `EOL` terminator) and for lines
    /// that do not parse as any known record shape; replay skips both.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.last() != Some(&EOL_TOKEN) {
            return None;
        }
        // Everything between the header and the terminator.
        let body = &parts[..parts.len() - 1];
        if body.len() < 2 {
            return None;
        }

        let txn = TxnId::new(body[0].parse().ok()?);
        let type_code: u8 = body[1].parse().ok()?;
        let rest = &body[2..];

        match type_code {
            0 => {
                let participants = parse_counted_list(rest)?;
                Some(Self::Participants { txn, participants })
            }
            1 => {
                if rest.len() != 3 {
                    return None;
                }
                let commit = rest[0].parse().ok()?;
                Some(Self::Decision {
                    txn,
                    commit,
                    filename: rest[1].to_string(),
                    blob: rest[2].to_string(),
                })
            }
            2 => rest.is_empty().then_some(Self::Completed { txn }),
            3 => {
                let files = parse_counted_list(rest)?;
                Some(Self::Staged { txn, files })
            }
            4 => rest.is_empty().then_some(Self::Applied { txn }),
            _ => None,
        }
    }
}

/// Parse `n,item1,...,itemN` where the count must match the items present.
fn parse_counted_list(fields: &[&str]) -> Option<Vec<String>> {
    let (count, items) = fields.split_first()?;
    let count: usize = count.parse().ok()?;
    if items.len() != count {
        return None;
    }
    Some(items.iter().map(|s| s.to_string()).collect())
}
