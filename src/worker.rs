//! Background snapshot writers and the monitoring seam.
//!
//! A writer is a detached thread that owns nothing beyond the files in
//! its target directory. Success is reported as a [`SnapshotEvent::Written`]
//! message; any failure surfaces as thread termination, observed through
//! the worker's monitor.

use crate::backend::{BackendError, SnapshotBackend};
use crate::event::{EventSender, SnapshotEvent};
use crate::meta::SnapshotMeta;
use log::{debug, error};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one background writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn next() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "writer-{}", self.0)
    }
}

/// Why a monitored worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownReason {
    /// Ran to completion; its written notification was already delivered.
    Completed,
    Failed(String),
    Panicked,
}

/// Identity plus join handle for a spawned writer. Emitted inside a
/// monitor effect; the dispatcher that realizes the effect consumes it.
#[derive(Debug)]
pub struct WorkerMonitor {
    id: WorkerId,
    join: JoinHandle<Result<(), BackendError>>,
}

impl WorkerMonitor {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Block until the worker exits and classify the outcome.
    pub fn wait(self) -> DownReason {
        match self.join.join() {
            Ok(Ok(())) => DownReason::Completed,
            Ok(Err(err)) => DownReason::Failed(err.to_string()),
            Err(_) => DownReason::Panicked,
        }
    }
}

/// Realize a monitor effect: watch the worker from its own thread and
/// post `WorkerDown` to the participant inbox once it exits.
pub fn dispatch_monitor(monitor: WorkerMonitor, events: EventSender) -> JoinHandle<()> {
    thread::spawn(move || {
        let id = monitor.id();
        let reason = monitor.wait();
        let _ = events.send(SnapshotEvent::WorkerDown { id, reason });
    })
}

pub(crate) fn spawn_write_worker<B>(
    backend: Arc<B>,
    dir: PathBuf,
    meta: SnapshotMeta,
    snap: B::Ref,
    events: EventSender,
) -> io::Result<WorkerMonitor>
where
    B: SnapshotBackend + Send + Sync + 'static,
{
    let id = WorkerId::next();
    let idxterm = meta.idxterm();
    let join = thread::Builder::new()
        .name("snapshot-writer".into())
        .spawn(move || {
            debug!("{id}: writing snapshot {idxterm} to {:?}", dir);
            match backend.write(&dir, &meta, snap) {
                Ok(()) => {
                    let _ = events.send(SnapshotEvent::Written(idxterm));
                    Ok(())
                }
                Err(err) => {
                    error!("{id}: snapshot write to {:?} failed: {err}", dir);
                    Err(err)
                }
            }
        })?;
    Ok(WorkerMonitor { id, join })
}
