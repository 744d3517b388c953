//! Snapshot lifecycle management for Raft participants.
//!
//! Each participant owns a [`SnapshotState`]: it persists machine state
//! at a committed log index through a background writer, assembles
//! snapshots streamed from a peer leader chunk by chunk, recovers the
//! youngest snapshot at startup, and publishes the latest snapshot index
//! to the process-wide [`registry`]. Snapshot bytes are delegated to a
//! pluggable [`SnapshotBackend`]; a file-based backend ships in-crate.
#![deny(unreachable_pub)]
#![deny(unused_must_use)]

pub mod backend;
pub mod config;
pub mod event;
pub mod layout;
pub mod manager;
pub mod meta;
pub mod registry;
pub mod worker;

pub use backend::{BackendError, FileBackend, SnapshotBackend, SnapshotRead};
pub use config::SnapshotConfig;
pub use event::{channel, EventReceiver, EventSender, SnapshotEvent};
pub use layout::{LayoutError, SnapshotDirEntry, SnapshotLayout};
pub use manager::{AcceptOutcome, Effect, ManagerError, SnapshotChunks, SnapshotState};
pub use meta::{IdxTerm, Index, SnapshotMeta, Term, Uid};
pub use registry::{last_snapshot_index, SnapshotIndexRegistry};
pub use worker::{dispatch_monitor, DownReason, WorkerId, WorkerMonitor};
