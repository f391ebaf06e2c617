//! Common record envelope

use std::fmt;

use crate::checkpoint::{CheckpointError, CheckpointResult};

/// Size of the envelope in bytes
pub const ENVELOPE_SIZE: usize = 27;

/// Byte offset of the operator-kind tag inside the envelope
pub const KIND_OFFSET: usize = 24;

/// Byte offset of the payload size inside the envelope
pub(crate) const PAYLOAD_SIZE_OFFSET: usize = 8;

/// Operator kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OperatorKind {
    IndexScan = 1,
    BlockJoin = 2,
    HashJoin = 3,
    Sort = 4,
    Projection = 5,
}

impl OperatorKind {
    pub fn from_u16(value: u16) -> CheckpointResult<Self> {
        match value {
            1 => Ok(OperatorKind::IndexScan),
            2 => Ok(OperatorKind::BlockJoin),
            3 => Ok(OperatorKind::HashJoin),
            4 => Ok(OperatorKind::Sort),
            5 => Ok(OperatorKind::Projection),
            other => Err(CheckpointError::corrupt(format!(
                "Unknown operator kind tag {}",
                other
            ))),
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Kinds whose state travels inside the parent's record
    pub fn is_embedded(self) -> bool {
        matches!(self, OperatorKind::IndexScan | OperatorKind::Projection)
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperatorKind::IndexScan => "index_scan",
            OperatorKind::BlockJoin => "block_join",
            OperatorKind::HashJoin => "hash_join",
            OperatorKind::Sort => "sort",
            OperatorKind::Projection => "projection",
        };
        write!(f, "{}", s)
    }
}

/// Envelope fields other than the payload size, which the writer computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub sql_id: u32,
    pub operator_id: u32,
    pub wall_clock_micros: i64,
    pub kind: OperatorKind,
    pub begin_complete: bool,
}

impl RecordHeader {
    /// Header stamped with the current wall-clock time.
    pub fn now(sql_id: u32, operator_id: u32, kind: OperatorKind, begin_complete: bool) -> Self {
        Self {
            sql_id,
            operator_id,
            wall_clock_micros: chrono::Utc::now().timestamp_micros(),
            kind,
            begin_complete,
        }
    }
}
