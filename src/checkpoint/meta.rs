//! Fixed-size metadata record
//!
//! Encoded layout (little-endian):
//!
//! | field                    | type |
//! |--------------------------|------|
//! | magic                    | u32  |
//! | owner_id                 | u32  |
//! | checkpoint_count         | u32  |
//! | total_bytes              | u64  |
//! | cumulative_cost_estimate | f64  |
//! | crc32 of the above       | u32  |

use crc32fast::Hasher;

use super::errors::{CheckpointError, CheckpointResult};

/// Bytes reserved for metadata before the first block
pub const META_REGION_SIZE: u64 = 4096;

/// Bytes of the encoded metadata record
pub const META_ENCODED_LEN: usize = 32;

const META_MAGIC: u32 = 0x5244_4243;

/// Store metadata for one owner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointMeta {
    pub owner_id: u32,
    pub checkpoint_count: u32,
    pub total_bytes: u64,
    pub cumulative_cost_estimate: f64,
}

impl CheckpointMeta {
    pub fn empty(owner_id: u32) -> Self {
        Self {
            owner_id,
            checkpoint_count: 0,
            total_bytes: 0,
            cumulative_cost_estimate: 0.0,
        }
    }

    /// Offset at which the next block is written
    pub fn next_offset(&self) -> u64 {
        META_REGION_SIZE + self.total_bytes
    }

    /// Accounts for one durable block.
    pub fn record_flush(&mut self, len: usize, cost_estimate: f64) {
        self.checkpoint_count += 1;
        self.total_bytes += len as u64;
        self.cumulative_cost_estimate += cost_estimate;
    }

    pub fn encode(&self) -> [u8; META_ENCODED_LEN] {
        let mut out = [0u8; META_ENCODED_LEN];
        out[0..4].copy_from_slice(&META_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&self.owner_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.checkpoint_count.to_le_bytes());
        out[12..20].copy_from_slice(&self.total_bytes.to_le_bytes());
        out[20..28].copy_from_slice(&self.cumulative_cost_estimate.to_le_bytes());
        let crc = checksum(&out[..28]);
        out[28..32].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Decodes metadata; an all-zero region means "never written".
    pub fn decode(bytes: &[u8]) -> CheckpointResult<Option<Self>> {
        if bytes.len() < META_ENCODED_LEN {
            return Err(CheckpointError::corrupt(format!(
                "Metadata needs {} bytes, got {}",
                META_ENCODED_LEN,
                bytes.len()
            )));
        }
        let bytes = &bytes[..META_ENCODED_LEN];
        if bytes.iter().all(|b| *b == 0) {
            return Ok(None);
        }

        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf)
        };

        if u32_at(0) != META_MAGIC {
            return Err(CheckpointError::corrupt("Metadata magic mismatch"));
        }
        if checksum(&bytes[..28]) != u32_at(28) {
            return Err(CheckpointError::corrupt("Metadata checksum mismatch"));
        }
        Ok(Some(Self {
            owner_id: u32_at(4),
            checkpoint_count: u32_at(8),
            total_bytes: u64_at(12),
            cumulative_cost_estimate: f64::from_bits(u64_at(20)),
        }))
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
