//! Block nested loop join
//!
//! The left input is consumed in blocks of `block_capacity` tuples. For each
//! block the right input is rescanned from `begin()`, and every right tuple is
//! matched against every block tuple in block order.
//!
//! # Checkpoint
//!
//! Incremental at block granularity. A record carries the block rows added
//! since the operator's previous record (the whole block when the block is
//! new, nothing otherwise) plus the overlay cursors. A record taken while a
//! new block was loading has `searching` set and `load` finishes the search.

use tracing::debug;

use super::condition::{eval_all, Condition};
use super::context::ExecContext;
use super::errors::{ExecutorError, ExecutorResult};
use super::node::ExecutorNode;
use super::protocol::{check_state, consider_checkpoint, fast_forward, CheckpointTracker, Executor};
use super::tuple::{Tuple, TupleLayout};
use crate::cost::RewardModel;
use crate::recovery::ResumeContext;
use crate::state::{BlockJoinState, ChildState, OperatorKind, OperatorState, StateBody};

/// Fixed part of a `BlockJoinState` payload
const CURSOR_BYTES: u64 = 8 + 4 + 4 + 4 + 4 + 3 + 8 + 8 + 2 * 9;

pub struct BlockNestedLoopJoinExecutor {
    operator_id: u32,
    left: ExecutorNode,
    right: ExecutorNode,
    predicates: Vec<Condition>,
    layout: TupleLayout,
    block_capacity: usize,
    block: Vec<Tuple>,
    block_id: u64,
    block_cursor: usize,
    searching: bool,
    left_exhausted: bool,
    finished: bool,
    current: Option<Tuple>,
    produced: u64,
    left_consumed: u64,
    checkpointed_block_id: Option<u64>,
    checkpointed_len: usize,
    tracker: CheckpointTracker,
    begun: bool,
}

impl BlockNestedLoopJoinExecutor {
    pub fn new(
        operator_id: u32,
        left: ExecutorNode,
        right: ExecutorNode,
        predicates: Vec<Condition>,
    ) -> Self {
        let layout = TupleLayout::join(left.tuple_layout(), right.tuple_layout());
        Self {
            operator_id,
            left,
            right,
            predicates,
            layout,
            block_capacity: 0,
            block: Vec::new(),
            block_id: 0,
            block_cursor: 0,
            searching: false,
            left_exhausted: false,
            finished: false,
            current: None,
            produced: 0,
            left_consumed: 0,
            checkpointed_block_id: None,
            checkpointed_len: 0,
            tracker: CheckpointTracker::new(),
            begun: false,
        }
    }

    pub fn left(&self) -> &ExecutorNode {
        &self.left
    }

    pub fn right(&self) -> &ExecutorNode {
        &self.right
    }

    pub(crate) fn children_mut(&mut self) -> [&mut ExecutorNode; 2] {
        [&mut self.left, &mut self.right]
    }

    /// Id of the block being joined; blocks are numbered from 1.
    pub fn block_id(&self) -> u64 {
        self.block_id
    }

    pub fn block_len(&self) -> usize {
        self.block.len()
    }

    pub fn left_consumed(&self) -> u64 {
        self.left_consumed
    }

    /// `begin()` has returned: the first match search finished or a tuple
    /// was already produced.
    fn begin_complete(&self) -> bool {
        !self.searching || self.produced > 0
    }

    /// Block rows not yet covered by a record of this operator.
    fn block_delta_start(&self) -> usize {
        if self.checkpointed_block_id == Some(self.block_id) {
            self.checkpointed_len
        } else {
            0
        }
    }

    /// Pulls the next block from the left input and restarts the right one.
    ///
    /// Returns false when the left input had nothing left.
    fn load_block(&mut self, ctx: &mut ExecContext) -> ExecutorResult<bool> {
        self.block.clear();
        while self.block.len() < self.block_capacity && !self.left.at_end() {
            self.block.push(self.left.current()?);
            self.left.advance(ctx)?;
            self.left_consumed += 1;
        }
        self.left_exhausted = self.left.at_end();
        if self.block.is_empty() {
            return Ok(false);
        }

        self.block_id += 1;
        self.block_cursor = 0;
        self.searching = true;
        self.right.begin(ctx)?;
        self.tracker.bump();
        debug!(
            operator_id = self.operator_id,
            block_id = self.block_id,
            block_len = self.block.len(),
            left_exhausted = self.left_exhausted,
            "block loaded"
        );

        if ctx.config().force_block_checkpoints {
            self.checkpoint_now(ctx)?;
        } else {
            consider_checkpoint(self, ctx)?;
        }
        Ok(true)
    }

    /// Finds the next match at or after `(right position, block_cursor)`.
    fn search(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        self.searching = true;
        self.current = None;
        loop {
            if self.right.at_end() {
                if self.left_exhausted || !self.load_block(ctx)? {
                    self.finished = true;
                    self.block.clear();
                    break;
                }
                continue;
            }

            let right = self.right.current()?;
            while self.block_cursor < self.block.len() {
                let joined = Tuple::join(&self.block[self.block_cursor], &right);
                if eval_all(&self.predicates, &self.layout, &joined)? {
                    self.current = Some(joined);
                    self.searching = false;
                    return Ok(());
                }
                self.block_cursor += 1;
            }
            self.block_cursor = 0;
            self.right.advance(ctx)?;
        }
        self.searching = false;
        Ok(())
    }

    fn left_state(&self, sql_id: u32) -> ChildState {
        if self.left_exhausted {
            ChildState::Absent
        } else {
            self.left.child_state(sql_id)
        }
    }

    fn restore_current(&mut self) -> ExecutorResult<()> {
        let left = self.block.get(self.block_cursor).ok_or_else(|| {
            ExecutorError::corrupt_checkpoint(format!(
                "Block join {} cursor {} outside block of {}",
                self.operator_id,
                self.block_cursor,
                self.block.len()
            ))
        })?;
        self.current = Some(Tuple::join(left, &self.right.current()?));
        Ok(())
    }
}

impl Executor for BlockNestedLoopJoinExecutor {
    fn operator_id(&self) -> u32 {
        self.operator_id
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::BlockJoin
    }

    fn tuple_layout(&self) -> &TupleLayout {
        &self.layout
    }

    fn begin(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        self.begun = true;
        self.block_capacity = ctx.config().block_capacity;
        self.block.clear();
        self.block_id = 0;
        self.block_cursor = 0;
        self.left_exhausted = false;
        self.finished = false;
        self.current = None;
        self.produced = 0;
        self.left_consumed = 0;
        self.checkpointed_block_id = None;
        self.checkpointed_len = 0;
        self.tracker.baseline();

        self.left.begin(ctx)?;
        if !self.load_block(ctx)? {
            self.finished = true;
            return Ok(());
        }
        self.search(ctx)
    }

    fn advance(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        if self.current.is_none() {
            return Err(ExecutorError::execution_failed("advance past end of block join")
                .at_operator(self.operator_id));
        }
        self.produced += 1;
        self.tracker.bump();
        self.block_cursor += 1;
        self.search(ctx)
    }

    fn at_end(&self) -> bool {
        self.current.is_none()
    }

    fn current(&self) -> ExecutorResult<Tuple> {
        self.current.clone().ok_or_else(|| {
            ExecutorError::execution_failed("block join has no current tuple")
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
        true
    }

    fn is_dirty(&self) -> bool {
        self.tracker.is_dirty()
    }

    fn suspend_cost_estimate(&self, model: &RewardModel) -> u64 {
        let delta: usize = self.block[self.block_delta_start().min(self.block.len())..]
            .iter()
            .map(Tuple::encoded_len)
            .sum();
        model.src(CURSOR_BYTES + delta as u64)
    }

    fn latest_checkpoint_time(&self) -> Option<i64> {
        self.tracker.latest_checkpoint_time()
    }

    fn resume_cost(&self) -> f64 {
        self.tracker.resume_cost()
    }

    fn snapshot(&self, sql_id: u32) -> OperatorState {
        let delta_start = self.block_delta_start().min(self.block.len());
        OperatorState::new(
            sql_id,
            self.operator_id,
            self.begin_complete(),
            StateBody::BlockJoin(BlockJoinState {
                block_id: self.block_id,
                block_len: self.block.len() as u32,
                delta_start: delta_start as u32,
                delta: self.block[delta_start..].to_vec(),
                block_cursor: self.block_cursor as u32,
                searching: self.searching,
                left_exhausted: self.left_exhausted,
                finished: self.finished,
                produced: self.produced,
                left_consumed: self.left_consumed,
                left: self.left_state(sql_id),
                right: if self.finished {
                    ChildState::Absent
                } else {
                    self.right.child_state(sql_id)
                },
            }),
        )
    }

    fn load(
        &mut self,
        state: &OperatorState,
        seq: u64,
        ctx: &mut ExecContext,
        resume: &mut ResumeContext,
    ) -> ExecutorResult<()> {
        check_state(state, self.operator_id, OperatorKind::BlockJoin)?;
        let StateBody::BlockJoin(s) = &state.body else {
            return Err(ExecutorError::corrupt_checkpoint("block join body expected"));
        };

        self.begun = true;
        self.block_capacity = ctx.config().block_capacity;
        self.block = if s.finished || s.block_len == 0 {
            Vec::new()
        } else {
            resume.block_chain(self.operator_id, seq, s)?
        };
        self.block_id = s.block_id;
        self.block_cursor = s.block_cursor as usize;
        self.searching = s.searching;
        self.left_exhausted = s.left_exhausted;
        self.finished = s.finished;
        self.produced = s.produced;
        self.left_consumed = s.left_consumed;
        self.checkpointed_block_id = Some(s.block_id);
        self.checkpointed_len = self.block.len();
        self.current = None;

        resume.restore_child(&mut self.left, &s.left, seq, ctx)?;
        match &s.right {
            ChildState::Absent => {}
            ChildState::Embedded(child) => self.right.load(child, seq, ctx, resume)?,
            // The inner input is replayed, its own records describe other passes
            ChildState::Position(position) => {
                self.right.begin(ctx)?;
                fast_forward(&mut self.right, *position, ctx)?;
            }
        }

        self.tracker.baseline();
        if self.finished {
            return Ok(());
        }
        if self.searching {
            self.search(ctx)?;
            self.tracker.bump();
        } else {
            self.restore_current()?;
        }
        debug!(
            operator_id = self.operator_id,
            seq,
            block_id = self.block_id,
            produced = self.produced,
            "block join restored"
        );
        Ok(())
    }

    fn invalidate_checkpoints(&mut self) {
        self.checkpointed_block_id = None;
        self.checkpointed_len = 0;
        self.tracker.bump();
    }

    fn checkpoint_now(&mut self, ctx: &mut ExecContext) -> ExecutorResult<bool> {
        if !self.begun || !self.is_dirty() || ctx.checkpoints_suspended() {
            return Ok(false);
        }
        let state = self.snapshot(ctx.sql_id());
        let src = self.suspend_cost_estimate(ctx.model());
        if !ctx.submit_checkpoint(&state, src)? {
            return Ok(false);
        }
        self.checkpointed_block_id = Some(self.block_id);
        self.checkpointed_len = self.block.len();
        self.tracker.record_block(
            self.left.resume_cost(),
            self.right.resume_cost(),
            self.block_id,
            self.block.len() as u64,
        );
        Ok(true)
    }
}
