//! Index range scan with row locking
//!
//! # Lock Policy
//!
//! | range shape            | lower bound                                   | upper bound                              |
//! |------------------------|-----------------------------------------------|------------------------------------------|
//! | `=` full key           | record-only if the key exists, else gap       | none                                     |
//! | `=` key prefix         | none                                          | gap                                      |
//! | `>`, `>=`, full scan   | ordinary (next-key)                           | gap                                      |
//! | `<`, `<=`              | none                                          | ordinary if the probe key exists, else gap |
//!
//! The row under a lower-bound lock is not locked again when visited. Other
//! visited rows get an ordinary lock: shared when they fail the filter,
//! in the statement's mode when they qualify. Read-uncommitted scans take
//! no locks.
//!
//! # Checkpoint
//!
//! Overlay state, always embedded in the parent's record. The persisted
//! cursor is the last delivered row; `load` repositions there and advances.

use std::sync::Arc;

use super::condition::{eval_all, CompOp, Condition};
use super::context::ExecContext;
use super::errors::{ExecutorError, ExecutorResult};
use super::protocol::{check_state, Executor};
use super::range::{derive_key_range, KeyRange, RangeShape};
use super::tuple::{compare_keys, Rid, Tuple, TupleLayout, Value};
use crate::cost::RewardModel;
use crate::recovery::ResumeContext;
use crate::state::{OperatorKind, OperatorState, ScanState, StateBody};
use crate::storage::{IndexCursor, IndexStorage, LockKind, LockMode};

/// Encoded size of `ScanState`
const SCAN_STATE_BYTES: u64 = 8 + 8 + 9 + 1 + 8;

pub struct IndexScanExecutor {
    operator_id: u32,
    index: Arc<dyn IndexStorage>,
    conditions: Vec<Condition>,
    range: KeyRange,
    cursor: Option<IndexCursor>,
    current: Option<Tuple>,
    last_delivered: Option<Rid>,
    /// Rows already covered by a bound lock
    bound_locked: Vec<Rid>,
    produced: u64,
    begun: bool,
}

impl IndexScanExecutor {
    /// Scan of `index` filtered by `conditions`; the key range is derived
    /// from the conditions on index columns.
    pub fn new(operator_id: u32, index: Arc<dyn IndexStorage>, conditions: Vec<Condition>) -> Self {
        let range = derive_key_range(index.index_columns(), &conditions);
        Self {
            operator_id,
            index,
            conditions,
            range,
            cursor: None,
            current: None,
            last_delivered: None,
            bound_locked: Vec::new(),
            produced: 0,
            begun: false,
        }
    }

    pub fn key_range(&self) -> &KeyRange {
        &self.range
    }

    /// Row address of the current tuple
    pub fn current_rid(&self) -> Option<Rid> {
        self.current.as_ref()?;
        self.cursor.and_then(|c| c.current())
    }

    fn open_cursor(&self) -> ExecutorResult<IndexCursor> {
        if self.range.is_full_scan() {
            Ok(self.index.open_full_cursor())
        } else {
            self.index.open_cursor(&self.range.lower, &self.range.upper)
        }
    }

    fn lock_row(&self, ctx: &ExecContext, rid: Rid, kind: LockKind, mode: LockMode) -> ExecutorResult<()> {
        ctx.locks()
            .lock_row(ctx.query().txn_id, self.index.table_id(), rid, kind, mode)
            .map_err(|e| ExecutorError::from(e).at_operator(self.operator_id))
    }

    fn lock_table(&self, ctx: &ExecContext) -> ExecutorResult<()> {
        if ctx.query().isolation.is_lock_free() {
            return Ok(());
        }
        ctx.locks()
            .lock_table(
                ctx.query().txn_id,
                self.index.table_id(),
                ctx.query().kind.table_lock_mode(),
            )
            .map_err(|e| ExecutorError::from(e).at_operator(self.operator_id))
    }

    /// Whether some row's key starts with `probe`.
    fn key_exists(&self, probe: &[Value]) -> ExecutorResult<bool> {
        let rid = self.index.lower_bound(probe)?;
        Ok(match self.index.key_at(rid)? {
            Some(key) if key.len() >= probe.len() => {
                compare_keys(&key[..probe.len()], probe).is_eq()
            }
            _ => false,
        })
    }

    fn lock_bounds(&mut self, ctx: &ExecContext, cursor: &IndexCursor) -> ExecutorResult<()> {
        self.bound_locked.clear();
        if ctx.query().isolation.is_lock_free() {
            return Ok(());
        }
        let mode = ctx.query().kind.row_lock_mode();
        let (lower, upper) = (cursor.lower(), cursor.upper());

        match &self.range.shape {
            RangeShape::Equality { full_key: true } => {
                if self.key_exists(&self.range.lower.key)? && lower < upper {
                    self.lock_row(ctx, lower, LockKind::RecordNotGap, mode)?;
                    self.bound_locked.push(lower);
                } else {
                    self.lock_row(ctx, lower, LockKind::Gap, mode)?;
                }
            }
            RangeShape::Equality { full_key: false } => {
                self.lock_row(ctx, upper, LockKind::Gap, mode)?;
            }
            RangeShape::FullScan
            | RangeShape::Inequality {
                op: CompOp::Gt | CompOp::Ge,
                ..
            } => {
                self.lock_row(ctx, lower, LockKind::Ordinary, mode)?;
                if lower < upper {
                    self.bound_locked.push(lower);
                }
                self.lock_row(ctx, upper, LockKind::Gap, mode)?;
            }
            RangeShape::Inequality { probe, .. } => {
                let kind = if self.key_exists(probe)? {
                    LockKind::Ordinary
                } else {
                    LockKind::Gap
                };
                self.lock_row(ctx, upper, kind, mode)?;
            }
        }
        Ok(())
    }

    fn lock_visited(&self, ctx: &ExecContext, rid: Rid, qualifies: bool) -> ExecutorResult<()> {
        if ctx.query().isolation.is_lock_free() || self.bound_locked.contains(&rid) {
            return Ok(());
        }
        let mode = if qualifies {
            ctx.query().kind.row_lock_mode()
        } else {
            LockMode::Shared
        };
        self.lock_row(ctx, rid, LockKind::Ordinary, mode)
    }

    /// Moves the cursor forward to the first qualifying row at or after it.
    fn seek_qualifying(&mut self, ctx: &ExecContext, mut cursor: IndexCursor) -> ExecutorResult<()> {
        self.current = None;
        while let Some(rid) = cursor.current() {
            let tuple = self.index.get_row(rid)?;
            let qualifies = !tuple.header.deleted
                && eval_all(&self.conditions, self.index.layout(), &tuple)?;
            self.lock_visited(ctx, rid, qualifies)?;
            if qualifies {
                self.current = Some(tuple);
                break;
            }
            cursor.advance(self.index.as_ref())?;
        }
        self.cursor = Some(cursor);
        Ok(())
    }
}

impl Executor for IndexScanExecutor {
    fn operator_id(&self) -> u32 {
        self.operator_id
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::IndexScan
    }

    fn tuple_layout(&self) -> &TupleLayout {
        self.index.layout()
    }

    fn begin(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        self.begun = true;
        self.produced = 0;
        self.last_delivered = None;
        self.lock_table(ctx)?;
        let cursor = self.open_cursor()?;
        self.lock_bounds(ctx, &cursor)?;
        self.seek_qualifying(ctx, cursor)
    }

    fn advance(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        let mut cursor = match (self.cursor, &self.current) {
            (Some(cursor), Some(_)) => cursor,
            _ => {
                return Err(ExecutorError::execution_failed("advance past end of index scan")
                    .at_operator(self.operator_id))
            }
        };
        self.last_delivered = cursor.current();
        cursor.advance(self.index.as_ref())?;
        self.seek_qualifying(ctx, cursor)?;
        self.produced += 1;
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.current.is_none()
    }

    fn current(&self) -> ExecutorResult<Tuple> {
        self.current.clone().ok_or_else(|| {
            ExecutorError::execution_failed("index scan has no current tuple")
                .at_operator(self.operator_id)
        })
    }

    fn is_begun(&self) -> bool {
        self.begun
    }

    fn produced(&self) -> u64 {
        self.produced
    }

    fn owns_checkpoints(&self) -> bool {
        false
    }

    fn is_dirty(&self) -> bool {
        false
    }

    fn suspend_cost_estimate(&self, model: &RewardModel) -> u64 {
        model.src(SCAN_STATE_BYTES)
    }

    fn latest_checkpoint_time(&self) -> Option<i64> {
        None
    }

    fn resume_cost(&self) -> f64 {
        // The overlay is restored exactly from the parent's record
        0.0
    }

    fn snapshot(&self, sql_id: u32) -> OperatorState {
        let (lower, upper) = self
            .cursor
            .map(|c| (c.lower(), c.upper()))
            .unwrap_or((Rid::INVALID, Rid::INVALID));
        OperatorState::new(
            sql_id,
            self.operator_id,
            self.begun,
            StateBody::IndexScan(ScanState {
                lower,
                upper,
                last_delivered: self.last_delivered,
                is_full_scan: self.range.is_full_scan(),
                produced: self.produced,
            }),
        )
    }

    fn load(
        &mut self,
        state: &OperatorState,
        _seq: u64,
        ctx: &mut ExecContext,
        _resume: &mut ResumeContext,
    ) -> ExecutorResult<()> {
        check_state(state, self.operator_id, OperatorKind::IndexScan)?;
        let StateBody::IndexScan(s) = &state.body else {
            return Err(ExecutorError::corrupt_checkpoint("index scan body expected"));
        };
        if s.is_full_scan != self.range.is_full_scan() {
            return Err(ExecutorError::corrupt_checkpoint(format!(
                "Scan {} range shape differs from its checkpoint",
                self.operator_id
            )));
        }

        self.begun = true;
        self.lock_table(ctx)?;
        let range = IndexCursor::new(s.lower, s.upper);
        self.lock_bounds(ctx, &range)?;

        match s.last_delivered {
            None => {
                if s.produced != 0 {
                    return Err(ExecutorError::corrupt_checkpoint(format!(
                        "Scan {} produced {} tuples without a delivered row",
                        self.operator_id, s.produced
                    )));
                }
                self.seek_qualifying(ctx, range)?;
            }
            Some(rid) => {
                let mut cursor = IndexCursor::at(rid, s.lower, s.upper);
                cursor.advance(self.index.as_ref())?;
                self.seek_qualifying(ctx, cursor)?;
            }
        }
        self.last_delivered = s.last_delivered;
        self.produced = s.produced;
        Ok(())
    }

    fn checkpoint_now(&mut self, _ctx: &mut ExecContext) -> ExecutorResult<bool> {
        Ok(false)
    }
}
