use crate::meta::IdxTerm;
use crate::worker::{DownReason, WorkerId};
use std::sync::mpsc;

pub type EventSender = mpsc::Sender<SnapshotEvent>;
pub type EventReceiver = mpsc::Receiver<SnapshotEvent>;

/// Messages delivered to the owning participant's inbox. The inbox is
/// the single linearization point for snapshot state transitions.
#[derive(Debug)]
pub enum SnapshotEvent {
    /// A background writer finished persisting the snapshot.
    Written(IdxTerm),
    /// The transport delivered chunk `num` of an inbound transfer.
    ChunkReceived { data: Vec<u8>, num: u64 },
    /// A monitored worker terminated.
    WorkerDown { id: WorkerId, reason: DownReason },
}

/// Inbox channel for one participant.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel()
}
