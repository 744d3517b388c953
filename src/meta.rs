use serde::{Deserialize, Serialize};
use std::fmt;

/// Raft log index.
pub type Index = u64;

/// Raft term.
pub type Term = u64;

/// Opaque byte string naming one Raft participant on this host.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uid(Vec<u8>);

impl Uid {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Uid {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Uid {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", String::from_utf8_lossy(&self.0))
    }
}

/// The `(index, term)` pair identifying a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdxTerm {
    pub index: Index,
    pub term: Term,
}

impl IdxTerm {
    pub fn new(index: Index, term: Term) -> Self {
        Self { index, term }
    }
}

impl fmt::Display for IdxTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index {} term {}", self.index, self.term)
    }
}

/// Snapshot metadata persisted alongside the machine payload. The
/// cluster membership value is opaque to this crate and stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub index: Index,
    pub term: Term,
    pub cluster: Vec<u8>,
}

impl SnapshotMeta {
    pub fn new(index: Index, term: Term, cluster: Vec<u8>) -> Self {
        Self {
            index,
            term,
            cluster,
        }
    }

    pub fn idxterm(&self) -> IdxTerm {
        IdxTerm::new(self.index, self.term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_renders_printable_bytes() {
        let uid = Uid::from("participant-1");
        assert_eq!(uid.to_string(), "participant-1");
        assert_eq!(uid.as_bytes(), b"participant-1");
    }

    #[test]
    fn meta_exposes_its_idxterm() {
        let meta = SnapshotMeta::new(100, 3, vec![1, 2]);
        assert_eq!(meta.idxterm(), IdxTerm::new(100, 3));
    }
}
