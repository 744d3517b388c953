#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use snapstore::backend::{AcceptFile, ChunkCursor};
use snapstore::{BackendError, FileBackend, SnapshotBackend, SnapshotMeta, SnapshotRead};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

/// Small key-value machine standing in for a participant's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TestMachine {
    pub applied_index: u64,
    pub entries: BTreeMap<String, String>,
}

pub fn sample_machine(applied_index: u64) -> TestMachine {
    let mut entries = BTreeMap::new();
    for i in 0..8 {
        entries.insert(format!("key-{i}"), format!("value-{i}"));
    }
    TestMachine {
        applied_index,
        entries,
    }
}

pub fn meta(index: u64, term: u64) -> SnapshotMeta {
    SnapshotMeta::new(index, term, Vec::new())
}

/// Delegates to the file backend except that every write fails, standing
/// in for a writer that dies mid-snapshot.
#[derive(Default, Clone)]
pub struct FailingWriteBackend {
    inner: FileBackend<TestMachine>,
}

impl SnapshotBackend for FailingWriteBackend {
    type Machine = TestMachine;
    type Ref = TestMachine;
    type Accept = AcceptFile;
    type Cursor = ChunkCursor;

    fn prepare(&self, meta: &SnapshotMeta, machine: &TestMachine) -> TestMachine {
        self.inner.prepare(meta, machine)
    }

    fn write(
        &self,
        _dir: &Path,
        _meta: &SnapshotMeta,
        _snap: TestMachine,
    ) -> Result<(), BackendError> {
        Err(BackendError::Io(io::Error::other(
            "injected write failure",
        )))
    }

    fn read(&self, chunk_size: usize, dir: &Path) -> Result<SnapshotRead<ChunkCursor>, BackendError> {
        self.inner.read(chunk_size, dir)
    }

    fn next_chunk(
        &self,
        cursor: ChunkCursor,
    ) -> Result<Option<(Vec<u8>, ChunkCursor)>, BackendError> {
        self.inner.next_chunk(cursor)
    }

    fn begin_accept(
        &self,
        dir: &Path,
        crc: u32,
        meta: &SnapshotMeta,
    ) -> Result<AcceptFile, BackendError> {
        self.inner.begin_accept(dir, crc, meta)
    }

    fn accept_chunk(&self, data: &[u8], state: AcceptFile) -> Result<AcceptFile, BackendError> {
        self.inner.accept_chunk(data, state)
    }

    fn complete_accept(&self, data: &[u8], state: AcceptFile) -> Result<(), BackendError> {
        self.inner.complete_accept(data, state)
    }

    fn recover(&self, dir: &Path) -> Result<(SnapshotMeta, TestMachine), BackendError> {
        self.inner.recover(dir)
    }

    fn read_meta(&self, dir: &Path) -> Result<SnapshotMeta, BackendError> {
        self.inner.read_meta(dir)
    }
}
