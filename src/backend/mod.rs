//! Pluggable persistence strategy for snapshot bytes.
//!
//! The manager sequences the snapshot lifecycle; a [`SnapshotBackend`]
//! owns the bytes inside one snapshot directory, including checksum
//! verification on inbound transfers.

mod file;

pub use file::{AcceptFile, ChunkCursor, FileBackend};

use crate::meta::SnapshotMeta;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Side-effecting operations over a snapshot directory. Every method
/// takes a concrete directory path; the manager decides which directory
/// is current.
pub trait SnapshotBackend {
    /// Live machine state as held by the participant.
    type Machine;
    /// Release cursor: an immutable capture of machine state, safe to
    /// serialize from another thread.
    type Ref: Send + 'static;
    /// State threaded through one inbound transfer.
    type Accept;
    /// Cursor threaded through one outbound stream.
    type Cursor;

    /// Capture live machine state. Pure and synchronous; must run on
    /// the participant's own task.
    fn prepare(&self, meta: &SnapshotMeta, machine: &Self::Machine) -> Self::Ref;

    /// Serialize `snap` and `meta` into `dir`. Atomic from the caller's
    /// perspective: afterwards the directory holds a complete snapshot
    /// or remains deletable. Runs on a worker thread.
    fn write(&self, dir: &Path, meta: &SnapshotMeta, snap: Self::Ref) -> Result<(), BackendError>;

    /// Open `dir` for outbound streaming in chunks of `chunk_size` bytes.
    fn read(&self, chunk_size: usize, dir: &Path) -> Result<SnapshotRead<Self::Cursor>, BackendError>;

    /// Produce the next outbound chunk, or `None` when drained.
    fn next_chunk(
        &self,
        cursor: Self::Cursor,
    ) -> Result<Option<(Vec<u8>, Self::Cursor)>, BackendError>;

    /// Initialize an inbound transfer into `dir`. `crc` is the payload
    /// checksum declared by the sender, verified on completion.
    fn begin_accept(
        &self,
        dir: &Path,
        crc: u32,
        meta: &SnapshotMeta,
    ) -> Result<Self::Accept, BackendError>;

    /// Append a non-terminal chunk.
    fn accept_chunk(&self, data: &[u8], state: Self::Accept) -> Result<Self::Accept, BackendError>;

    /// Append the final chunk, fsync, and verify the declared checksum.
    fn complete_accept(&self, data: &[u8], state: Self::Accept) -> Result<(), BackendError>;

    /// Reconstruct machine state from `dir`.
    fn recover(&self, dir: &Path) -> Result<(SnapshotMeta, Self::Machine), BackendError>;

    /// Parse only the metadata header of the snapshot in `dir`.
    fn read_meta(&self, dir: &Path) -> Result<SnapshotMeta, BackendError>;
}

/// Header of an outbound snapshot stream.
#[derive(Debug)]
pub struct SnapshotRead<C> {
    pub crc: u32,
    pub meta: SnapshotMeta,
    pub num_chunks: u64,
    pub cursor: C,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid snapshot format")]
    InvalidFormat,
    #[error("unsupported snapshot version {0}")]
    InvalidVersion(u32),
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumError { stored: u32, computed: u32 },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
