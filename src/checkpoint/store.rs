//! Checkpoint store interface and in-memory store

use std::collections::HashMap;
use std::sync::Mutex;

use super::errors::{CheckpointError, CheckpointResult};
use super::meta::{CheckpointMeta, META_REGION_SIZE};

/// Remote store of opaque checkpoint blocks, one region per owner.
///
/// All calls are synchronous. Blocks live at offsets `>= META_REGION_SIZE`.
pub trait CheckpointStore: Send + Sync {
    fn write_block(&self, owner_id: u32, offset: u64, bytes: &[u8]) -> CheckpointResult<()>;

    /// Reads exactly `len` bytes; a short region is corruption.
    fn read_block(&self, owner_id: u32, offset: u64, len: usize) -> CheckpointResult<Vec<u8>>;

    fn write_meta(&self, meta: &CheckpointMeta) -> CheckpointResult<()>;

    fn read_meta(&self, owner_id: u32) -> CheckpointResult<Option<CheckpointMeta>>;
}

pub(crate) fn check_block_offset(offset: u64) -> CheckpointResult<()> {
    if offset < META_REGION_SIZE {
        return Err(CheckpointError::Store(format!(
            "Block offset {} overlaps the metadata region",
            offset
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct MemoryState {
    regions: HashMap<u32, Vec<u8>>,
    block_writes: u64,
    /// Block writes still allowed before failures are injected
    write_budget: Option<u64>,
}

/// Store that keeps each owner's region in a byte vector.
///
/// Supports write-failure injection and byte corruption for tests of the
/// writer and resume paths.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    state: Mutex<MemoryState>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CheckpointResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| CheckpointError::Store("Memory store lock poisoned".into()))
    }

    /// Fails every block write after the next `n`.
    pub fn fail_block_writes_after(&self, n: u64) {
        if let Ok(mut state) = self.lock() {
            state.write_budget = Some(n);
        }
    }

    /// Number of successful block writes.
    pub fn block_writes(&self) -> u64 {
        self.lock().map(|s| s.block_writes).unwrap_or(0)
    }

    /// Flips bits of one byte in an owner's region.
    pub fn corrupt_byte(&self, owner_id: u32, offset: u64, mask: u8) {
        if let Ok(mut state) = self.lock() {
            if let Some(byte) = state
                .regions
                .get_mut(&owner_id)
                .and_then(|r| r.get_mut(offset as usize))
            {
                *byte ^= mask;
            }
        }
    }

    fn write_at(region: &mut Vec<u8>, offset: usize, bytes: &[u8]) {
        let end = offset + bytes.len();
        if region.len() < end {
            region.resize(end, 0);
        }
        region[offset..end].copy_from_slice(bytes);
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn write_block(&self, owner_id: u32, offset: u64, bytes: &[u8]) -> CheckpointResult<()> {
        check_block_offset(offset)?;
        let mut state = self.lock()?;
        if let Some(budget) = state.write_budget.as_mut() {
            if *budget == 0 {
                return Err(CheckpointError::Store("Injected block write failure".into()));
            }
            *budget -= 1;
        }
        let region = state.regions.entry(owner_id).or_default();
        Self::write_at(region, offset as usize, bytes);
        state.block_writes += 1;
        Ok(())
    }

    fn read_block(&self, owner_id: u32, offset: u64, len: usize) -> CheckpointResult<Vec<u8>> {
        let state = self.lock()?;
        let region = state.regions.get(&owner_id).map(Vec::as_slice).unwrap_or(&[]);
        let start = offset as usize;
        region
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                CheckpointError::corrupt(format!(
                    "Read of {} bytes at {} exceeds region of {} bytes",
                    len,
                    offset,
                    region.len()
                ))
            })
    }

    fn write_meta(&self, meta: &CheckpointMeta) -> CheckpointResult<()> {
        let mut state = self.lock()?;
        let region = state.regions.entry(meta.owner_id).or_default();
        if region.len() < META_REGION_SIZE as usize {
            region.resize(META_REGION_SIZE as usize, 0);
        }
        Self::write_at(region, 0, &meta.encode());
        Ok(())
    }

    fn read_meta(&self, owner_id: u32) -> CheckpointResult<Option<CheckpointMeta>> {
        let state = self.lock()?;
        match state.regions.get(&owner_id) {
            Some(region) if region.len() >= META_REGION_SIZE as usize => {
                CheckpointMeta::decode(&region[..META_REGION_SIZE as usize])
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_round_trip() {
        let store = MemoryCheckpointStore::new();
        store.write_block(1, META_REGION_SIZE, b"hello").unwrap();
        assert_eq!(store.read_block(1, META_REGION_SIZE, 5).unwrap(), b"hello");
        assert_eq!(store.block_writes(), 1);
    }

    #[test]
    fn test_block_cannot_overlap_meta() {
        let store = MemoryCheckpointStore::new();
        assert!(store.write_block(1, 10, b"x").is_err());
    }

    #[test]
    fn test_short_read_is_corrupt() {
        let store = MemoryCheckpointStore::new();
        store.write_block(1, META_REGION_SIZE, b"abc").unwrap();
        let err = store.read_block(1, META_REGION_SIZE, 10).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_meta_survives_block_writes() {
        let store = MemoryCheckpointStore::new();
        let mut meta = CheckpointMeta::empty(3);
        meta.record_flush(4, 1.0);
        store.write_block(3, META_REGION_SIZE, b"data").unwrap();
        store.write_meta(&meta).unwrap();
        assert_eq!(store.read_meta(3).unwrap(), Some(meta));
        assert_eq!(store.read_meta(4).unwrap(), None);
    }

    #[test]
    fn test_injected_failure() {
        let store = MemoryCheckpointStore::new();
        store.fail_block_writes_after(1);
        assert!(store.write_block(1, META_REGION_SIZE, b"a").is_ok());
        assert!(store.write_block(1, META_REGION_SIZE + 1, b"b").is_err());
    }
}
