//! On-disk naming and startup discovery for snapshot directories.
//!
//! Each snapshot lives in `<root>/snapshots/<term_hex>_<index_hex>/`.
//! Both integers are lowercase hex, zero-padded to 16 characters, so
//! lexicographic ordering of directory names equals numeric ordering.

use crate::meta::IdxTerm;
use log::warn;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SNAPSHOTS_SUBDIR: &str = "snapshots";
const HEX_WIDTH: usize = 16;

/// Filesystem layout rooted at one participant's data directory.
#[derive(Debug, Clone)]
pub struct SnapshotLayout {
    root: PathBuf,
}

impl SnapshotLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_SUBDIR)
    }

    pub fn ensure(&self) -> Result<(), LayoutError> {
        fs::create_dir_all(self.snapshots_dir())?;
        Ok(())
    }

    pub fn dir_for(&self, idxterm: IdxTerm) -> PathBuf {
        self.snapshots_dir().join(dir_name(idxterm))
    }

    /// Enumerate snapshot directories sorted ascending, youngest last.
    /// Children whose names do not parse as snapshot directories are
    /// skipped with a warning.
    pub fn discover(&self) -> Result<Vec<SnapshotDirEntry>, LayoutError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.snapshots_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(parse_dir_name) {
                Some(idxterm) => entries.push(SnapshotDirEntry {
                    idxterm,
                    path: entry.path(),
                }),
                None => warn!("skipping foreign entry in snapshot dir: {:?}", entry.path()),
            }
        }
        entries.sort_by_key(|entry| (entry.idxterm.term, entry.idxterm.index));
        Ok(entries)
    }
}

/// One discovered snapshot directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDirEntry {
    pub idxterm: IdxTerm,
    pub path: PathBuf,
}

pub fn dir_name(idxterm: IdxTerm) -> String {
    format!("{:016x}_{:016x}", idxterm.term, idxterm.index)
}

pub fn parse_dir_name(name: &str) -> Option<IdxTerm> {
    let (term_hex, index_hex) = name.split_once('_')?;
    if term_hex.len() < HEX_WIDTH || index_hex.len() < HEX_WIDTH {
        return None;
    }
    let term = u64::from_str_radix(term_hex, 16).ok()?;
    let index = u64::from_str_radix(index_hex, 16).ok()?;
    Some(IdxTerm::new(index, term))
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
