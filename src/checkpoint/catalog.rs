//! Catalog of an owner's persisted checkpoint blocks
//!
//! Block boundaries are not stored anywhere: they are recovered by walking
//! `checkpoint_count` envelopes from the start of the block area and trusting
//! each envelope's declared payload size. The walk must land exactly on
//! `total_bytes`; anything else is corruption.

use super::errors::{CheckpointError, CheckpointResult};
use super::meta::{CheckpointMeta, META_REGION_SIZE};
use super::store::CheckpointStore;
use crate::state::{OperatorState, StateReader};

/// One decoded block. `seq` is its position in flush order.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub seq: u64,
    pub offset: u64,
    pub state: OperatorState,
    pub bytes: Vec<u8>,
}

impl CatalogEntry {
    pub fn operator_id(&self) -> u32 {
        self.state.operator_id()
    }
}

/// All blocks of one owner in flush order
#[derive(Debug, Clone, Default)]
pub struct CheckpointCatalog {
    meta: Option<CheckpointMeta>,
    entries: Vec<CatalogEntry>,
}

impl CheckpointCatalog {
    /// Reads and decodes every block the metadata accounts for.
    pub fn read(store: &dyn CheckpointStore, owner_id: u32) -> CheckpointResult<Self> {
        let Some(meta) = store.read_meta(owner_id)? else {
            return Ok(Self::default());
        };
        if meta.checkpoint_count == 0 {
            return Ok(Self {
                meta: Some(meta),
                entries: Vec::new(),
            });
        }

        let total = usize::try_from(meta.total_bytes)
            .map_err(|_| CheckpointError::corrupt("Checkpoint region overflows usize"))?;
        let region = store.read_block(owner_id, META_REGION_SIZE, total)?;

        let mut reader = StateReader::new(&region);
        let mut entries = Vec::with_capacity(meta.checkpoint_count as usize);
        for seq in 0..u64::from(meta.checkpoint_count) {
            let start = reader.position();
            let (header, _) = reader.read_record()?;
            if header.sql_id != owner_id {
                return Err(CheckpointError::corrupt(format!(
                    "Block {} belongs to query {}, expected {}",
                    seq, header.sql_id, owner_id
                )));
            }
            let bytes = region[start..reader.position()].to_vec();
            let state = OperatorState::decode(&bytes)?;
            entries.push(CatalogEntry {
                seq,
                offset: META_REGION_SIZE + start as u64,
                state,
                bytes,
            });
        }
        reader.expect_exhausted("Checkpoint region")?;

        Ok(Self {
            meta: Some(meta),
            entries,
        })
    }

    pub fn meta(&self) -> Option<&CheckpointMeta> {
        self.meta.as_ref()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, seq: u64) -> Option<&CatalogEntry> {
        self.entries.get(seq as usize)
    }

    /// Blocks of one operator in flush order
    pub fn entries_for(&self, operator_id: u32) -> impl Iterator<Item = &CatalogEntry> {
        self.entries
            .iter()
            .filter(move |e| e.operator_id() == operator_id)
    }

    /// Latest block of `operator_id` flushed no later than `max_seq` whose
    /// state had produced at most `max_produced` tuples.
    pub fn latest_for(
        &self,
        operator_id: u32,
        max_seq: Option<u64>,
        max_produced: Option<u64>,
    ) -> Option<&CatalogEntry> {
        self.entries_for(operator_id)
            .filter(|e| max_seq.map_or(true, |bound| e.seq <= bound))
            .filter(|e| max_produced.map_or(true, |bound| e.state.produced() <= bound))
            .last()
    }
}
