//! Operator-state codec
//!
//! Every checkpoint record starts with a fixed envelope:
//!
//! | offset | field                  | type |
//! |--------|------------------------|------|
//! | 0      | sql_id                 | u32  |
//! | 4      | operator_id            | u32  |
//! | 8      | payload_size           | u64  |
//! | 16     | wall_clock_time (µs)   | i64  |
//! | 24     | operator_kind          | u16  |
//! | 26     | begin_phase_complete   | u8   |
//!
//! followed by exactly `payload_size` bytes of kind-specific payload. The kind
//! tag sits at a fixed offset so a composite operator can embed a child's
//! record and the reader can pick the child's decoder without a registry.
//!
//! # Rules
//!
//! - Declared payload size must equal the bytes consumed on decode
//! - Reading past the buffer is corruption, never a silent truncation
//! - Incremental kinds carry only the delta since the previous checkpoint;
//!   overlay kinds carry their full current value

mod codec;
mod envelope;
mod records;

pub use codec::{RecordMark, StateReader, StateWriter};
pub use envelope::{OperatorKind, RecordHeader, ENVELOPE_SIZE, KIND_OFFSET};
pub use records::{
    BlockJoinState, BucketIncrement, ChildState, HashJoinState, OperatorState, ProbeCursor,
    ProjectionState, ScanState, SortState, StateBody,
};
