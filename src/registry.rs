//! Process-wide table of last persisted snapshot indexes.
//!
//! The on-disk directory is authoritative; this table is a hot cache
//! consulted by log-truncation and peer-catchup paths. Each entry is
//! written only by the manager owning the corresponding participant.

use crate::meta::{Index, Uid};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const REGISTRY_SHARD_COUNT: usize = 8;

static GLOBAL: Lazy<SnapshotIndexRegistry> = Lazy::new(SnapshotIndexRegistry::new);

/// Last snapshot index published for `uid`, readable from any thread.
pub fn last_snapshot_index(uid: &Uid) -> Option<Index> {
    GLOBAL.last_snapshot_index(uid)
}

/// Handle to the process-wide registry instance.
pub fn global() -> SnapshotIndexRegistry {
    GLOBAL.clone()
}

/// Sharded `uid -> index` map; cloneable handle over shared shards.
#[derive(Debug, Clone)]
pub struct SnapshotIndexRegistry {
    shards: Arc<Vec<Mutex<HashMap<Uid, Index>>>>,
}

impl SnapshotIndexRegistry {
    pub fn new() -> Self {
        let shards = (0..REGISTRY_SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards: Arc::new(shards),
        }
    }

    pub fn publish(&self, uid: &Uid, index: Index) {
        self.shard_for(uid).lock().insert(uid.clone(), index);
    }

    pub fn last_snapshot_index(&self, uid: &Uid) -> Option<Index> {
        self.shard_for(uid).lock().get(uid).copied()
    }

    pub fn remove(&self, uid: &Uid) {
        self.shard_for(uid).lock().remove(uid);
    }

    fn shard_for(&self, uid: &Uid) -> &Mutex<HashMap<Uid, Index>> {
        let mut hasher = DefaultHasher::new();
        uid.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }
}

impl Default for SnapshotIndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}
