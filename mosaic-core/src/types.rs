//! Strongly-typed identifiers and source references.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a commit transaction.
///
/// Allocated by the coordinator, monotonically increasing and never reused
/// within a run. After a restart the allocator is re-seeded above every
/// identifier found in the write-ahead log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TxnId(u32);

impl TxnId {
    /// Create a transaction id from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// The coordinator's binding decision for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Every participant voted yes within the deadline.
    Commit,
    /// At least one participant refused, or the vote phase timed out.
    Abort,
}

impl Decision {
    /// Wire and log representation: `true` means commit.
    #[must_use]
    pub const fn is_commit(&self) -> bool {
        matches!(self, Self::Commit)
    }

    /// Build a decision from its wire representation.
    #[must_use]
    pub const fn from_commit(commit: bool) -> Self {
        if commit {
            Self::Commit
        } else {
            Self::Abort
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit => write!(f, "commit"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// A reference to one source file held by a participant.
///
/// The textual form is `<address>:<filepath>`. Splitting happens at the
/// FIRST colon only; file paths may contain further colons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Address of the participant holding the file.
    pub participant: String,
    /// Path of the file in the participant's namespace.
    pub path: String,
}

impl SourceRef {
    /// Parse a `<address>:<filepath>` source string.
    ///
    /// Returns `None` when the string has no colon or an empty address.
    #[must_use]
    pub fn parse(source: &str) -> Option<Self> {
        let (participant, path) = source.split_once(':')?;
        if participant.is_empty() {
            return None;
        }
        Some(Self {
            participant: participant.to_string(),
            path: path.to_string(),
        })
    }

    /// Group a list of source strings by participant address.
    ///
    /// Strings that fail to parse are skipped; the caller is expected to log
    /// them. Order of files within a participant follows input order.
    #[must_use]
    pub fn group_by_participant(sources: &[String]) -> HashMap<String, Vec<String>> {
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for source in sources {
            if let Some(parsed) = Self::parse(source) {
                groups.entry(parsed.participant).or_default().push(parsed.path);
            }
        }
        groups
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.participant, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_ref_splits_at_first_colon() {
        let parsed = SourceRef::parse("node-a:dir:with:colons/img.png").expect("parse");
        assert_eq!(parsed.participant, "node-a");
        assert_eq!(parsed.path, "dir:with:colons/img.png");
    }

    #[test]
    fn source_ref_rejects_missing_colon() {
        assert!(SourceRef::parse("no-colon-here").is_none());
        assert!(SourceRef::parse(":missing-address").is_none());
    }

    #[test]
    fn group_by_participant_merges_files() {
        let sources = vec![
            "a:1.png".to_string(),
            "b:2.png".to_string(),
            "a:3.png".to_string(),
            "garbled".to_string(),
        ];
        let groups = SourceRef::group_by_participant(&sources);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["a"], vec!["1.png", "3.png"]);
        assert_eq!(groups["b"], vec!["2.png"]);
    }

    #[test]
    fn decision_wire_mapping() {
        assert!(Decision::Commit.is_commit());
        assert!(!Decision::Abort.is_commit());
        assert_eq!(Decision::from_commit(true), Decision::Commit);
        assert_eq!(Decision::from_commit(false), Decision::Abort);
    }
}
