//! Reporting of peers that supplied bad diffs.

use std::fmt;

use dsync_types::BlockHash;

/// Misbehaviour attributable to the peer that sent a diff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiffFault {
    /// A second, different diff for a block we already had one for.
    Conflicting,
    /// The diff did not reproduce the header's state or receipts.
    StateMismatch,
    /// The payload failed to decode or was not canonical.
    Malformed,
    /// A response carried a diff for a different block than requested.
    HashMismatch,
    /// A response nobody asked for.
    Unsolicited,
}

impl DiffFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conflicting => "conflicting",
            Self::StateMismatch => "state_mismatch",
            Self::Malformed => "malformed",
            Self::HashMismatch => "hash_mismatch",
            Self::Unsolicited => "unsolicited",
        }
    }
}

impl fmt::Display for DiffFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for diff faults. The node scores and bans peers through it; the
/// chain only ever calls it and never waits on the result.
pub trait DiffFaultReporter: Send + Sync {
    fn report(&self, peer_id: &str, block: BlockHash, fault: DiffFault);
}
