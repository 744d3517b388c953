//! The per-participant snapshot lifecycle state machine.
//!
//! One [`SnapshotState`] exists per participant and is mutated only by
//! the participant's own task. A background write runs off-thread and
//! reports back through the participant inbox; an inbound transfer is
//! sequenced chunk by chunk. At most one of the two is in flight.

use crate::backend::{BackendError, SnapshotBackend, SnapshotRead};
use crate::config::SnapshotConfig;
use crate::event::EventSender;
use crate::layout::{LayoutError, SnapshotLayout};
use crate::meta::{IdxTerm, SnapshotMeta, Uid};
use crate::registry::{self, SnapshotIndexRegistry};
use crate::worker::{self, DownReason, WorkerId, WorkerMonitor};
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Side effects the state machine requests but does not perform. An
/// external dispatcher realizes them.
#[derive(Debug)]
pub enum Effect {
    /// Watch the worker and deliver `WorkerDown` when it terminates.
    MonitorWorker(WorkerMonitor),
}

/// Outcome of feeding one chunk to an inbound transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Non-terminal chunk appended.
    Accepted,
    /// Resend of an already-applied chunk; ignored.
    Duplicate,
    /// Final chunk committed; the snapshot is now current.
    Completed(IdxTerm),
}

struct PendingWrite {
    worker: WorkerId,
    idxterm: IdxTerm,
}

struct AcceptCtx<A> {
    num_chunks: u64,
    next: u64,
    idxterm: IdxTerm,
    backend_state: A,
}

/// Snapshot lifecycle state for one participant.
pub struct SnapshotState<B: SnapshotBackend> {
    uid: Uid,
    backend: Arc<B>,
    layout: SnapshotLayout,
    registry: SnapshotIndexRegistry,
    events: EventSender,
    current: Option<IdxTerm>,
    pending: Option<PendingWrite>,
    accepting: Option<AcceptCtx<B::Accept>>,
}

impl<B: SnapshotBackend> std::fmt::Debug for SnapshotState<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotState")
            .field("uid", &self.uid)
            .field("layout", &self.layout)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl<B> SnapshotState<B>
where
    B: SnapshotBackend + Send + Sync + 'static,
{
    /// Build the manager for `uid`, scanning `root` for an existing
    /// snapshot and publishing its index process-wide.
    pub fn init(
        uid: Uid,
        backend: B,
        root: impl Into<PathBuf>,
        events: EventSender,
    ) -> Result<Self, ManagerError> {
        Self::init_with_registry(uid, backend, root, events, registry::global())
    }

    /// As [`SnapshotState::init`], publishing into an explicit registry
    /// handle instead of the process-wide one.
    pub fn init_with_registry(
        uid: Uid,
        backend: B,
        root: impl Into<PathBuf>,
        events: EventSender,
        registry: SnapshotIndexRegistry,
    ) -> Result<Self, ManagerError> {
        let layout = SnapshotLayout::new(root);
        layout.ensure()?;
        let backend = Arc::new(backend);

        // Only the youngest directory can be a partial write, so a
        // candidate whose meta is corrupt is reclaimed and the next
        // oldest becomes the candidate. I/O failures are not corruption
        // and abort the scan without touching the directory.
        let mut entries = layout.discover()?;
        let mut current = None;
        while let Some(candidate) = entries.pop() {
            match backend.read_meta(&candidate.path) {
                Ok(meta) if meta.idxterm() == candidate.idxterm => {
                    let idxterm = meta.idxterm();
                    registry.publish(&uid, idxterm.index);
                    info!("participant {uid}: restored snapshot at {idxterm}");
                    current = Some(idxterm);
                    break;
                }
                Ok(meta) => {
                    warn!(
                        "participant {uid}: snapshot dir {:?} names {} but its meta says {}; reclaiming",
                        candidate.path,
                        candidate.idxterm,
                        meta.idxterm()
                    );
                    fs::remove_dir_all(&candidate.path)?;
                }
                Err(
                    err @ (BackendError::InvalidFormat
                    | BackendError::InvalidVersion(_)
                    | BackendError::ChecksumError { .. }),
                ) => {
                    warn!(
                        "participant {uid}: corrupt snapshot {:?} ({err}); reclaiming",
                        candidate.path
                    );
                    fs::remove_dir_all(&candidate.path)?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        for stale in entries {
            debug!("participant {uid}: removing stale snapshot {:?}", stale.path);
            fs::remove_dir_all(&stale.path)?;
        }

        Ok(Self {
            uid,
            backend,
            layout,
            registry,
            events,
            current,
            pending: None,
            accepting: None,
        })
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    /// The snapshot known to be complete on disk, if any.
    pub fn current(&self) -> Option<IdxTerm> {
        self.current
    }

    /// The snapshot a background writer is persisting, if any.
    pub fn pending(&self) -> Option<IdxTerm> {
        self.pending.as_ref().map(|pending| pending.idxterm)
    }

    /// The snapshot an inbound transfer is assembling, if any.
    pub fn accepting(&self) -> Option<IdxTerm> {
        self.accepting.as_ref().map(|ctx| ctx.idxterm)
    }

    /// Capture machine state at `meta` and persist it in the background.
    /// The returned effects must be handed to the dispatcher; completion
    /// arrives as a `Written` event on the participant inbox.
    pub fn begin_snapshot(
        &mut self,
        meta: SnapshotMeta,
        machine: &B::Machine,
    ) -> Result<Vec<Effect>, ManagerError> {
        self.ensure_idle()?;
        let idxterm = meta.idxterm();
        let dir = self.layout.dir_for(idxterm);
        // The directory must exist before the worker starts so the
        // worker never creates its own target.
        fs::create_dir_all(&dir)?;
        let snap = self.backend.prepare(&meta, machine);
        let monitor = worker::spawn_write_worker(
            Arc::clone(&self.backend),
            dir,
            meta,
            snap,
            self.events.clone(),
        )?;
        debug!(
            "participant {}: snapshot at {idxterm} started on {}",
            self.uid,
            monitor.id()
        );
        self.pending = Some(PendingWrite {
            worker: monitor.id(),
            idxterm,
        });
        Ok(vec![Effect::MonitorWorker(monitor)])
    }

    /// Apply a `Written` event matching the pending write.
    pub fn complete_snapshot(&mut self, idxterm: IdxTerm) -> Result<(), ManagerError> {
        match self.pending.take() {
            Some(pending) if pending.idxterm == idxterm => {
                self.promote(idxterm)?;
                info!("participant {}: snapshot at {idxterm} is current", self.uid);
                Ok(())
            }
            other => {
                self.pending = other;
                Err(ManagerError::UnexpectedCompletion(idxterm))
            }
        }
    }

    /// Start receiving a snapshot from a peer in `num_chunks` chunks.
    pub fn begin_accept(
        &mut self,
        crc: u32,
        meta: SnapshotMeta,
        num_chunks: u64,
    ) -> Result<(), ManagerError> {
        self.ensure_idle()?;
        if num_chunks == 0 {
            return Err(ManagerError::EmptyTransfer);
        }
        let idxterm = meta.idxterm();
        let dir = self.layout.dir_for(idxterm);
        fs::create_dir_all(&dir)?;
        let backend_state = self.backend.begin_accept(&dir, crc, &meta)?;
        debug!(
            "participant {}: accepting snapshot at {idxterm} in {num_chunks} chunks",
            self.uid
        );
        self.accepting = Some(AcceptCtx {
            num_chunks,
            next: 1,
            idxterm,
            backend_state,
        });
        Ok(())
    }

    /// Feed chunk `num` of the transfer started by `begin_accept`.
    /// Chunks strictly before the expected one are tolerated as resends;
    /// a chunk past the expected one is a protocol violation and the
    /// caller must reset the transfer via [`SnapshotState::discard_accept`].
    pub fn accept_chunk(&mut self, data: &[u8], num: u64) -> Result<AcceptOutcome, ManagerError> {
        let (next, num_chunks) = match &self.accepting {
            Some(ctx) => (ctx.next, ctx.num_chunks),
            None => return Err(ManagerError::NoAcceptInProgress),
        };
        if num < next {
            debug!(
                "participant {}: ignoring resent chunk {num} (expecting {next})",
                self.uid
            );
            return Ok(AcceptOutcome::Duplicate);
        }
        if num > next {
            return Err(ManagerError::OutOfOrderChunk {
                expected: next,
                received: num,
            });
        }

        let mut ctx = match self.accepting.take() {
            Some(ctx) => ctx,
            None => return Err(ManagerError::NoAcceptInProgress),
        };
        if num == num_chunks {
            self.backend.complete_accept(data, ctx.backend_state)?;
            let idxterm = ctx.idxterm;
            self.promote(idxterm)?;
            info!(
                "participant {}: installed snapshot at {idxterm} from peer",
                self.uid
            );
            Ok(AcceptOutcome::Completed(idxterm))
        } else {
            ctx.backend_state = self.backend.accept_chunk(data, ctx.backend_state)?;
            ctx.next += 1;
            self.accepting = Some(ctx);
            Ok(AcceptOutcome::Accepted)
        }
    }

    /// Abandon an inbound transfer, closing its backend state and
    /// removing the partial directory. No-op when none is in progress.
    pub fn discard_accept(&mut self) -> Result<(), ManagerError> {
        if let Some(ctx) = self.accepting.take() {
            let dir = self.layout.dir_for(ctx.idxterm);
            // Backend handles must close before the files go away.
            drop(ctx);
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
            info!(
                "participant {}: discarded inbound snapshot transfer",
                self.uid
            );
        }
        Ok(())
    }

    /// Apply a `WorkerDown` event. A death of the pending writer
    /// reclaims its partial directory; anything else is ignored.
    pub fn handle_down(&mut self, worker: WorkerId, reason: DownReason) -> Result<(), ManagerError> {
        let matches_pending = self
            .pending
            .as_ref()
            .map(|pending| pending.worker == worker)
            .unwrap_or(false);
        if !matches_pending {
            debug!(
                "participant {}: ignoring down of unmonitored {worker} ({reason:?})",
                self.uid
            );
            return Ok(());
        }
        if let Some(pending) = self.pending.take() {
            warn!(
                "participant {}: {worker} died ({reason:?}); reclaiming snapshot at {}",
                self.uid, pending.idxterm
            );
            let dir = self.layout.dir_for(pending.idxterm);
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
        }
        Ok(())
    }

    /// Open the current snapshot for streaming to a peer.
    pub fn read(&self, chunk_size: usize) -> Result<SnapshotRead<B::Cursor>, ManagerError> {
        let current = self.current.ok_or(ManagerError::NoSnapshot)?;
        Ok(self.backend.read(chunk_size, &self.layout.dir_for(current))?)
    }

    /// As [`SnapshotState::read`], taking the chunk size from config.
    pub fn read_with(&self, config: &SnapshotConfig) -> Result<SnapshotRead<B::Cursor>, ManagerError> {
        self.read(config.chunk_size())
    }

    /// Produce the next outbound chunk for a stream opened by `read`.
    pub fn next_chunk(
        &self,
        cursor: B::Cursor,
    ) -> Result<Option<(Vec<u8>, B::Cursor)>, ManagerError> {
        Ok(self.backend.next_chunk(cursor)?)
    }

    /// Iterate the chunks of a stream opened by `read`, consuming its
    /// cursor. Chunk production stays lazy; each step pulls one chunk.
    pub fn chunks(&self, read: SnapshotRead<B::Cursor>) -> SnapshotChunks<'_, B> {
        SnapshotChunks {
            state: self,
            cursor: Some(read.cursor),
        }
    }

    /// Reconstruct machine state from the current snapshot.
    pub fn recover(&self) -> Result<(SnapshotMeta, B::Machine), ManagerError> {
        let current = self.current.ok_or(ManagerError::NoSnapshot)?;
        Ok(self.backend.recover(&self.layout.dir_for(current))?)
    }

    fn ensure_idle(&self) -> Result<(), ManagerError> {
        if let Some(pending) = &self.pending {
            return Err(ManagerError::SnapshotInProgress(pending.idxterm));
        }
        if let Some(ctx) = &self.accepting {
            return Err(ManagerError::AcceptInProgress(ctx.idxterm));
        }
        Ok(())
    }

    /// Make `idxterm` current: drop the previous snapshot directory
    /// first, then publish and reassign.
    fn promote(&mut self, idxterm: IdxTerm) -> Result<(), ManagerError> {
        if let Some(previous) = self.current {
            if previous != idxterm {
                let dir = self.layout.dir_for(previous);
                if dir.exists() {
                    debug!(
                        "participant {}: removing superseded snapshot at {previous}",
                        self.uid
                    );
                    fs::remove_dir_all(&dir)?;
                }
            }
        }
        self.registry.publish(&self.uid, idxterm.index);
        self.current = Some(idxterm);
        Ok(())
    }
}

/// Lazy chunk producer for one outbound stream. Ends after the final
/// chunk or the first error.
pub struct SnapshotChunks<'a, B: SnapshotBackend> {
    state: &'a SnapshotState<B>,
    cursor: Option<B::Cursor>,
}

impl<B> Iterator for SnapshotChunks<'_, B>
where
    B: SnapshotBackend + Send + Sync + 'static,
{
    type Item = Result<Vec<u8>, ManagerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.take()?;
        match self.state.next_chunk(cursor) {
            Ok(Some((chunk, next))) => {
                self.cursor = Some(next);
                Some(Ok(chunk))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("snapshot write already in progress at {0}")]
    SnapshotInProgress(IdxTerm),
    #[error("inbound snapshot transfer already in progress at {0}")]
    AcceptInProgress(IdxTerm),
    #[error("no inbound snapshot transfer in progress")]
    NoAcceptInProgress,
    #[error("inbound transfer declared zero chunks")]
    EmptyTransfer,
    #[error("received chunk {received} while expecting chunk {expected}")]
    OutOfOrderChunk { expected: u64, received: u64 },
    #[error("completion at {0} does not match the pending write")]
    UnexpectedCompletion(IdxTerm),
    #[error("no snapshot is current")]
    NoSnapshot,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
