use super::{BackendError, SnapshotBackend, SnapshotRead};
use crate::meta::SnapshotMeta;
use crc32fast::Hasher;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

// snapshot.dat layout:
//   "SNAP" | version u32 | meta_crc u32 | payload_crc u32 | meta_len u32
//   | meta JSON | machine JSON
// All integers little-endian. meta_crc covers the meta JSON bytes,
// payload_crc covers the machine JSON bytes.
const MAGIC: &[u8; 4] = b"SNAP";
const VERSION: u32 = 1;
const HEADER_FIXED_LEN: usize = 20;
const META_LEN_CAP: u32 = 16 * 1024 * 1024;
const SNAPSHOT_FILE: &str = "snapshot.dat";

/// File-per-directory backend storing the machine payload as JSON with
/// crc32 integrity over both header and payload.
pub struct FileBackend<M> {
    _machine: PhantomData<fn() -> M>,
}

impl<M> FileBackend<M> {
    pub fn new() -> Self {
        Self {
            _machine: PhantomData,
        }
    }
}

impl<M> Default for FileBackend<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for FileBackend<M> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

/// Open inbound transfer: the target file plus the checksum the sender
/// declared up front.
pub struct AcceptFile {
    path: PathBuf,
    file: File,
    declared_crc: u32,
}

/// Sequential outbound read over the snapshot file.
pub struct ChunkCursor {
    file: File,
    chunk_size: usize,
}

impl<M> SnapshotBackend for FileBackend<M>
where
    M: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    type Machine = M;
    type Ref = M;
    type Accept = AcceptFile;
    type Cursor = ChunkCursor;

    fn prepare(&self, _meta: &SnapshotMeta, machine: &M) -> M {
        machine.clone()
    }

    fn write(&self, dir: &Path, meta: &SnapshotMeta, snap: M) -> Result<(), BackendError> {
        let meta_bytes = serde_json::to_vec(meta)?;
        let payload = serde_json::to_vec(&snap)?;

        let mut buf = Vec::with_capacity(HEADER_FIXED_LEN + meta_bytes.len() + payload.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&crc32(&meta_bytes).to_le_bytes());
        buf.extend_from_slice(&crc32(&payload).to_le_bytes());
        buf.extend_from_slice(&(meta_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&meta_bytes);
        buf.extend_from_slice(&payload);

        let path = dir.join(SNAPSHOT_FILE);
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    fn read(&self, chunk_size: usize, dir: &Path) -> Result<SnapshotRead<ChunkCursor>, BackendError> {
        let chunk_size = chunk_size.max(1);
        let path = dir.join(SNAPSHOT_FILE);
        let mut file = File::open(path)?;
        let header = read_header(&mut file)?;
        let len = file.metadata()?.len();
        // The stream replicates the file verbatim, header included.
        file.seek(SeekFrom::Start(0))?;
        Ok(SnapshotRead {
            crc: header.payload_crc,
            meta: header.meta,
            num_chunks: len.div_ceil(chunk_size as u64),
            cursor: ChunkCursor { file, chunk_size },
        })
    }

    fn next_chunk(
        &self,
        mut cursor: ChunkCursor,
    ) -> Result<Option<(Vec<u8>, ChunkCursor)>, BackendError> {
        let mut buf = vec![0u8; cursor.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            let n = cursor.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some((buf, cursor)))
    }

    fn begin_accept(
        &self,
        dir: &Path,
        crc: u32,
        _meta: &SnapshotMeta,
    ) -> Result<AcceptFile, BackendError> {
        let path = dir.join(SNAPSHOT_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(AcceptFile {
            path,
            file,
            declared_crc: crc,
        })
    }

    fn accept_chunk(&self, data: &[u8], mut state: AcceptFile) -> Result<AcceptFile, BackendError> {
        state.file.write_all(data)?;
        Ok(state)
    }

    fn complete_accept(&self, data: &[u8], state: AcceptFile) -> Result<(), BackendError> {
        let AcceptFile {
            path,
            mut file,
            declared_crc,
        } = state;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        let mut file = File::open(&path)?;
        let header = read_header(&mut file)?;
        let mut payload = Vec::new();
        file.read_to_end(&mut payload)?;
        let computed = crc32(&payload);
        if computed != header.payload_crc {
            return Err(BackendError::ChecksumError {
                stored: header.payload_crc,
                computed,
            });
        }
        if computed != declared_crc {
            return Err(BackendError::ChecksumError {
                stored: declared_crc,
                computed,
            });
        }
        Ok(())
    }

    fn recover(&self, dir: &Path) -> Result<(SnapshotMeta, M), BackendError> {
        let mut file = File::open(dir.join(SNAPSHOT_FILE))?;
        let header = read_header(&mut file)?;
        let mut payload = Vec::new();
        file.read_to_end(&mut payload)?;
        let computed = crc32(&payload);
        if computed != header.payload_crc {
            return Err(BackendError::ChecksumError {
                stored: header.payload_crc,
                computed,
            });
        }
        let machine = serde_json::from_slice(&payload).map_err(|_| BackendError::InvalidFormat)?;
        Ok((header.meta, machine))
    }

    fn read_meta(&self, dir: &Path) -> Result<SnapshotMeta, BackendError> {
        let mut file = File::open(dir.join(SNAPSHOT_FILE))?;
        Ok(read_header(&mut file)?.meta)
    }
}

struct Header {
    payload_crc: u32,
    meta: SnapshotMeta,
}

/// Parse the header, leaving the reader positioned at the payload.
fn read_header<R: Read>(reader: &mut R) -> Result<Header, BackendError> {
    let mut fixed = [0u8; HEADER_FIXED_LEN];
    reader.read_exact(&mut fixed).map_err(map_truncation)?;
    if &fixed[..4] != MAGIC {
        return Err(BackendError::InvalidFormat);
    }
    let version = read_u32(&fixed, 4);
    if version != VERSION {
        return Err(BackendError::InvalidVersion(version));
    }
    let meta_crc = read_u32(&fixed, 8);
    let payload_crc = read_u32(&fixed, 12);
    let meta_len = read_u32(&fixed, 16);
    if meta_len > META_LEN_CAP {
        return Err(BackendError::InvalidFormat);
    }

    let mut meta_bytes = vec![0u8; meta_len as usize];
    reader.read_exact(&mut meta_bytes).map_err(map_truncation)?;
    let computed = crc32(&meta_bytes);
    if computed != meta_crc {
        return Err(BackendError::ChecksumError {
            stored: meta_crc,
            computed,
        });
    }
    let meta = serde_json::from_slice(&meta_bytes).map_err(|_| BackendError::InvalidFormat)?;
    Ok(Header { payload_crc, meta })
}

fn map_truncation(err: io::Error) -> BackendError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        BackendError::InvalidFormat
    } else {
        BackendError::Io(err)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
