//! Per-kind operator states
//!
//! Composite operators record their children in one of three ways:
//!
//! - `Embedded`: the child's full record nested in the payload (scans and
//!   projections, which are never checkpointed on their own)
//! - `Position`: the number of tuples the parent has taken from a child that
//!   owns its checkpoints; resume restores that child independently and
//!   fast-forwards it to the position
//! - `Absent`: the child has not been started yet

use super::codec::{StateReader, StateWriter};
use super::envelope::{OperatorKind, RecordHeader};
use crate::checkpoint::{CheckpointError, CheckpointResult};
use crate::executor::{Rid, Tuple};

const CHILD_ABSENT: u8 = 0;
const CHILD_POSITION: u8 = 1;
const CHILD_EMBEDDED: u8 = 2;

/// How a parent's record refers to one child.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildState {
    Absent,
    Position(u64),
    Embedded(Box<OperatorState>),
}

impl ChildState {
    fn write(&self, w: &mut StateWriter) {
        match self {
            ChildState::Absent => w.put_u8(CHILD_ABSENT),
            ChildState::Position(pos) => {
                w.put_u8(CHILD_POSITION);
                w.put_u64(*pos);
            }
            ChildState::Embedded(state) => {
                w.put_u8(CHILD_EMBEDDED);
                state.write(w);
            }
        }
    }

    fn read(r: &mut StateReader<'_>) -> CheckpointResult<Self> {
        match r.get_u8()? {
            CHILD_ABSENT => Ok(ChildState::Absent),
            CHILD_POSITION => Ok(ChildState::Position(r.get_u64()?)),
            CHILD_EMBEDDED => {
                let kind = r.peek_kind()?;
                if !kind.is_embedded() {
                    return Err(CheckpointError::corrupt(format!(
                        "Operator kind {} cannot be embedded",
                        kind
                    )));
                }
                Ok(ChildState::Embedded(Box::new(OperatorState::read(r)?)))
            }
            other => Err(CheckpointError::corrupt(format!("Invalid child tag {}", other))),
        }
    }
}

/// Index scan: overlay of range bounds and cursor.
///
/// `last_delivered` is the row handed out most recently, not the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanState {
    pub lower: Rid,
    pub upper: Rid,
    pub last_delivered: Option<Rid>,
    pub is_full_scan: bool,
    pub produced: u64,
}

impl ScanState {
    fn write(&self, w: &mut StateWriter) {
        w.put_rid(self.lower);
        w.put_rid(self.upper);
        w.put_opt_rid(self.last_delivered);
        w.put_bool(self.is_full_scan);
        w.put_u64(self.produced);
    }

    fn read(r: &mut StateReader<'_>) -> CheckpointResult<Self> {
        Ok(Self {
            lower: r.get_rid()?,
            upper: r.get_rid()?,
            last_delivered: r.get_opt_rid()?,
            is_full_scan: r.get_bool()?,
            produced: r.get_u64()?,
        })
    }
}

/// Block nested loop join: block delta plus overlay cursors.
///
/// `delta` holds block rows `delta_start..delta_start + delta.len()` of block
/// `block_id`, whose full length is `block_len`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockJoinState {
    pub block_id: u64,
    pub block_len: u32,
    pub delta_start: u32,
    pub delta: Vec<Tuple>,
    pub block_cursor: u32,
    pub searching: bool,
    pub left_exhausted: bool,
    pub finished: bool,
    pub produced: u64,
    pub left_consumed: u64,
    pub left: ChildState,
    pub right: ChildState,
}

impl BlockJoinState {
    fn write(&self, w: &mut StateWriter) {
        w.put_u64(self.block_id);
        w.put_u32(self.block_len);
        w.put_u32(self.delta_start);
        w.put_tuples(self.delta.iter());
        w.put_u32(self.block_cursor);
        w.put_bool(self.searching);
        w.put_bool(self.left_exhausted);
        w.put_bool(self.finished);
        w.put_u64(self.produced);
        w.put_u64(self.left_consumed);
        self.left.write(w);
        self.right.write(w);
    }

    fn read(r: &mut StateReader<'_>) -> CheckpointResult<Self> {
        Ok(Self {
            block_id: r.get_u64()?,
            block_len: r.get_u32()?,
            delta_start: r.get_u32()?,
            delta: r.get_tuples()?,
            block_cursor: r.get_u32()?,
            searching: r.get_bool()?,
            left_exhausted: r.get_bool()?,
            finished: r.get_bool()?,
            produced: r.get_u64()?,
            left_consumed: r.get_u64()?,
            left: ChildState::read(r)?,
            right: ChildState::read(r)?,
        })
    }
}

/// Rows appended to one bucket since its last checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketIncrement {
    pub key: Vec<u8>,
    /// Bucket length before these rows
    pub base: u32,
    pub rows: Vec<Tuple>,
}

/// Probe position: bucket of the current right tuple and row within it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeCursor {
    pub key: Vec<u8>,
    pub index: u32,
}

/// Hash join: per-bucket increments plus the probe cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct HashJoinState {
    pub increments: Vec<BucketIncrement>,
    pub build_complete: bool,
    pub probe: Option<ProbeCursor>,
    pub finished: bool,
    pub produced: u64,
    pub left_consumed: u64,
    pub left: ChildState,
    pub right: ChildState,
}

impl HashJoinState {
    fn write(&self, w: &mut StateWriter) {
        w.put_u32(self.increments.len() as u32);
        for inc in &self.increments {
            w.put_bytes(&inc.key);
            w.put_u32(inc.base);
            w.put_tuples(inc.rows.iter());
        }
        w.put_bool(self.build_complete);
        match &self.probe {
            Some(cursor) => {
                w.put_u8(1);
                w.put_bytes(&cursor.key);
                w.put_u32(cursor.index);
            }
            None => w.put_u8(0),
        }
        w.put_bool(self.finished);
        w.put_u64(self.produced);
        w.put_u64(self.left_consumed);
        self.left.write(w);
        self.right.write(w);
    }

    fn read(r: &mut StateReader<'_>) -> CheckpointResult<Self> {
        let count = r.get_u32()?;
        let mut increments = Vec::new();
        for _ in 0..count {
            increments.push(BucketIncrement {
                key: r.get_bytes()?,
                base: r.get_u32()?,
                rows: r.get_tuples()?,
            });
        }
        let build_complete = r.get_bool()?;
        let probe = if r.get_bool()? {
            Some(ProbeCursor {
                key: r.get_bytes()?,
                index: r.get_u32()?,
            })
        } else {
            None
        };
        Ok(Self {
            increments,
            build_complete,
            probe,
            finished: r.get_bool()?,
            produced: r.get_u64()?,
            left_consumed: r.get_u64()?,
            left: ChildState::read(r)?,
            right: ChildState::read(r)?,
        })
    }
}

/// Sort: materialization delta, one-shot permutation, output cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct SortState {
    /// Buffer length before `tuples`
    pub base_count: u32,
    pub tuples: Vec<Tuple>,
    pub materialized: bool,
    pub permutation: Option<Vec<u32>>,
    pub output_pos: u32,
    pub produced: u64,
    pub child_consumed: u64,
    pub child: ChildState,
}

impl SortState {
    fn write(&self, w: &mut StateWriter) {
        w.put_u32(self.base_count);
        w.put_tuples(self.tuples.iter());
        w.put_bool(self.materialized);
        match &self.permutation {
            Some(perm) => {
                w.put_u8(1);
                w.put_u32s(perm);
            }
            None => w.put_u8(0),
        }
        w.put_u32(self.output_pos);
        w.put_u64(self.produced);
        w.put_u64(self.child_consumed);
        self.child.write(w);
    }

    fn read(r: &mut StateReader<'_>) -> CheckpointResult<Self> {
        let base_count = r.get_u32()?;
        let tuples = r.get_tuples()?;
        let materialized = r.get_bool()?;
        let permutation = if r.get_bool()? {
            Some(r.get_u32s()?)
        } else {
            None
        };
        Ok(Self {
            base_count,
            tuples,
            materialized,
            permutation,
            output_pos: r.get_u32()?,
            produced: r.get_u64()?,
            child_consumed: r.get_u64()?,
            child: ChildState::read(r)?,
        })
    }
}

/// Projection: counters and the child reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionState {
    /// Tuples handed to the client (root only)
    pub delivered: u64,
    pub produced: u64,
    pub child: ChildState,
}

impl ProjectionState {
    fn write(&self, w: &mut StateWriter) {
        w.put_u64(self.delivered);
        w.put_u64(self.produced);
        self.child.write(w);
    }

    fn read(r: &mut StateReader<'_>) -> CheckpointResult<Self> {
        Ok(Self {
            delivered: r.get_u64()?,
            produced: r.get_u64()?,
            child: ChildState::read(r)?,
        })
    }
}

/// Kind-specific payload
#[derive(Debug, Clone, PartialEq)]
pub enum StateBody {
    IndexScan(ScanState),
    BlockJoin(BlockJoinState),
    HashJoin(HashJoinState),
    Sort(SortState),
    Projection(ProjectionState),
}

impl StateBody {
    pub fn kind(&self) -> OperatorKind {
        match self {
            StateBody::IndexScan(_) => OperatorKind::IndexScan,
            StateBody::BlockJoin(_) => OperatorKind::BlockJoin,
            StateBody::HashJoin(_) => OperatorKind::HashJoin,
            StateBody::Sort(_) => OperatorKind::Sort,
            StateBody::Projection(_) => OperatorKind::Projection,
        }
    }
}

/// One operator's checkpoint record.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorState {
    pub header: RecordHeader,
    pub body: StateBody,
}

impl OperatorState {
    /// State stamped with the current time; the kind follows the body.
    pub fn new(sql_id: u32, operator_id: u32, begin_complete: bool, body: StateBody) -> Self {
        Self {
            header: RecordHeader::now(sql_id, operator_id, body.kind(), begin_complete),
            body,
        }
    }

    pub fn operator_id(&self) -> u32 {
        self.header.operator_id
    }

    pub fn kind(&self) -> OperatorKind {
        self.body.kind()
    }

    /// Tuples the operator had produced when the state was taken.
    pub fn produced(&self) -> u64 {
        match &self.body {
            StateBody::IndexScan(s) => s.produced,
            StateBody::BlockJoin(s) => s.produced,
            StateBody::HashJoin(s) => s.produced,
            StateBody::Sort(s) => s.produced,
            StateBody::Projection(s) => s.produced,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = StateWriter::new();
        self.write(&mut w);
        w.into_bytes()
    }

    /// Decodes exactly one record occupying all of `bytes`.
    pub fn decode(bytes: &[u8]) -> CheckpointResult<Self> {
        let mut r = StateReader::new(bytes);
        let state = Self::read(&mut r)?;
        r.expect_exhausted("Checkpoint block")?;
        Ok(state)
    }

    pub fn write(&self, w: &mut StateWriter) {
        let mut header = self.header;
        header.kind = self.body.kind();
        let mark = w.begin_record(&header);
        match &self.body {
            StateBody::IndexScan(s) => s.write(w),
            StateBody::BlockJoin(s) => s.write(w),
            StateBody::HashJoin(s) => s.write(w),
            StateBody::Sort(s) => s.write(w),
            StateBody::Projection(s) => s.write(w),
        }
        w.finish_record(mark);
    }

    pub fn read(r: &mut StateReader<'_>) -> CheckpointResult<Self> {
        let (header, mut payload) = r.read_record()?;
        let body = match header.kind {
            OperatorKind::IndexScan => StateBody::IndexScan(ScanState::read(&mut payload)?),
            OperatorKind::BlockJoin => StateBody::BlockJoin(BlockJoinState::read(&mut payload)?),
            OperatorKind::HashJoin => StateBody::HashJoin(HashJoinState::read(&mut payload)?),
            OperatorKind::Sort => StateBody::Sort(SortState::read(&mut payload)?),
            OperatorKind::Projection => {
                StateBody::Projection(ProjectionState::read(&mut payload)?)
            }
        };
        payload.expect_exhausted(&format!(
            "Operator {} ({}) payload",
            header.operator_id, header.kind
        ))?;
        Ok(Self { header, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::envelope::ENVELOPE_SIZE;

    fn header(operator_id: u32, kind: OperatorKind) -> RecordHeader {
        RecordHeader {
            sql_id: 11,
            operator_id,
            wall_clock_micros: 1_700_000_000_000_000,
            kind,
            begin_complete: true,
        }
    }

    fn tuple(byte: u8) -> Tuple {
        Tuple::new(vec![byte; 6])
    }

    fn scan_state() -> OperatorState {
        OperatorState {
            header: header(4, OperatorKind::IndexScan),
            body: StateBody::IndexScan(ScanState {
                lower: Rid::new(0, 1),
                upper: Rid::new(0, 9),
                last_delivered: Some(Rid::new(0, 4)),
                is_full_scan: false,
                produced: 3,
            }),
        }
    }

    fn all_kinds() -> Vec<OperatorState> {
        vec![
            scan_state(),
            OperatorState {
                header: header(2, OperatorKind::BlockJoin),
                body: StateBody::BlockJoin(BlockJoinState {
                    block_id: 2,
                    block_len: 2,
                    delta_start: 0,
                    delta: vec![tuple(1), tuple(2)],
                    block_cursor: 1,
                    searching: false,
                    left_exhausted: false,
                    finished: false,
                    produced: 5,
                    left_consumed: 4,
                    left: ChildState::Embedded(Box::new(scan_state())),
                    right: ChildState::Position(2),
                }),
            },
            OperatorState {
                header: header(3, OperatorKind::HashJoin),
                body: StateBody::HashJoin(HashJoinState {
                    increments: vec![BucketIncrement {
                        key: vec![1, 0, 0, 0],
                        base: 1,
                        rows: vec![tuple(7)],
                    }],
                    build_complete: true,
                    probe: Some(ProbeCursor {
                        key: vec![1, 0, 0, 0],
                        index: 1,
                    }),
                    finished: false,
                    produced: 9,
                    left_consumed: 3,
                    left: ChildState::Absent,
                    right: ChildState::Embedded(Box::new(scan_state())),
                }),
            },
            OperatorState {
                header: header(5, OperatorKind::Sort),
                body: StateBody::Sort(SortState {
                    base_count: 2,
                    tuples: vec![tuple(3)],
                    materialized: true,
                    permutation: Some(vec![2, 0, 1]),
                    output_pos: 1,
                    produced: 1,
                    child_consumed: 3,
                    child: ChildState::Position(3),
                }),
            },
            OperatorState {
                header: header(0, OperatorKind::Projection),
                body: StateBody::Projection(ProjectionState {
                    delivered: 12,
                    produced: 11,
                    child: ChildState::Position(11),
                }),
            },
        ]
    }

    #[test]
    fn test_round_trip_every_kind() {
        for state in all_kinds() {
            let bytes = state.encode();
            let decoded = OperatorState::decode(&bytes).unwrap();
            assert_eq!(decoded, state, "round trip of {}", state.kind());
        }
    }

    #[test]
    fn test_truncated_buffer_is_corrupt_for_every_kind() {
        for state in all_kinds() {
            let bytes = state.encode();
            for cut in [1, ENVELOPE_SIZE / 2, bytes.len() / 2, bytes.len() - 1] {
                let err = OperatorState::decode(&bytes[..cut]).unwrap_err();
                assert!(err.is_corruption(), "{} cut at {}", state.kind(), cut);
            }
        }
    }

    #[test]
    fn test_declared_size_larger_than_payload_is_corrupt() {
        let mut bytes = scan_state().encode();
        // Grow the declared payload by one and append a stray byte
        bytes[8] += 1;
        bytes.push(0);
        let err = OperatorState::decode(&bytes).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let mut bytes = scan_state().encode();
        bytes.push(0);
        assert!(OperatorState::decode(&bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn test_join_cannot_be_embedded() {
        let sort = all_kinds().remove(3);
        let state = OperatorState {
            header: header(0, OperatorKind::Projection),
            body: StateBody::Projection(ProjectionState {
                delivered: 1,
                produced: 0,
                child: ChildState::Embedded(Box::new(sort)),
            }),
        };
        let err = OperatorState::decode(&state.encode()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_nested_kind_tag_at_fixed_offset() {
        let join = all_kinds().remove(1);
        let bytes = join.encode();
        let mut r = StateReader::new(&bytes);
        assert_eq!(r.peek_kind().unwrap(), OperatorKind::BlockJoin);
        let (_, payload) = r.read_record().unwrap();
        assert!(payload.remaining() > ENVELOPE_SIZE);
    }
}
