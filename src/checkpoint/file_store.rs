//! File-backed checkpoint store
//!
//! One file per owner: `<dir>/owner-<id>.ckpt`, laid out exactly like the
//! remote region (metadata region, then blocks). Every write is followed by
//! `sync_data` before it returns.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::errors::{CheckpointError, CheckpointResult};
use super::meta::{CheckpointMeta, META_ENCODED_LEN};
use super::store::{check_block_offset, CheckpointStore};

/// Checkpoint store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Opens (and creates if missing) the store directory.
    pub fn open(dir: &Path) -> CheckpointResult<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| {
                CheckpointError::io(format!("create {}", dir.display()), e)
            })?;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Path of an owner's region file
    pub fn owner_path(&self, owner_id: u32) -> PathBuf {
        self.dir.join(format!("owner-{}.ckpt", owner_id))
    }

    fn open_for_write(&self, owner_id: u32) -> CheckpointResult<File> {
        let path = self.owner_path(owner_id);
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CheckpointError::io(format!("open {}", path.display()), e))
    }

    fn write_at(&self, owner_id: u32, offset: u64, bytes: &[u8]) -> CheckpointResult<()> {
        let path = self.owner_path(owner_id);
        let mut file = self.open_for_write(owner_id)?;
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(bytes))
            .and_then(|_| file.sync_data())
            .map_err(|e| CheckpointError::io(format!("write {}", path.display()), e))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn write_block(&self, owner_id: u32, offset: u64, bytes: &[u8]) -> CheckpointResult<()> {
        check_block_offset(offset)?;
        self.write_at(owner_id, offset, bytes)
    }

    fn read_block(&self, owner_id: u32, offset: u64, len: usize) -> CheckpointResult<Vec<u8>> {
        let path = self.owner_path(owner_id);
        let mut file = File::open(&path)
            .map_err(|e| CheckpointError::io(format!("open {}", path.display()), e))?;
        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => CheckpointError::corrupt(format!(
                    "Read of {} bytes at {} runs past {}",
                    len,
                    offset,
                    path.display()
                )),
                _ => CheckpointError::io(format!("read {}", path.display()), e),
            })?;
        Ok(buf)
    }

    fn write_meta(&self, meta: &CheckpointMeta) -> CheckpointResult<()> {
        self.write_at(meta.owner_id, 0, &meta.encode())
    }

    fn read_meta(&self, owner_id: u32) -> CheckpointResult<Option<CheckpointMeta>> {
        let path = self.owner_path(owner_id);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(format!("open {}", path.display()), e)),
        };
        let mut buf = Vec::with_capacity(META_ENCODED_LEN);
        Read::by_ref(&mut file)
            .take(META_ENCODED_LEN as u64)
            .read_to_end(&mut buf)
            .map_err(|e| CheckpointError::io(format!("read {}", path.display()), e))?;
        if buf.is_empty() {
            return Ok(None);
        }
        // A file that holds only blocks has a zero-filled metadata region
        buf.resize(META_ENCODED_LEN, 0);
        CheckpointMeta::decode(&buf)
    }
}
