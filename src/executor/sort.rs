//! Materializing sort
//!
//! Drains the child into a buffer, then sorts a permutation of buffer
//! indices on one key column. The sort is stable; descending order reverses
//! the comparison, so equal keys keep their arrival order either way.
//!
//! # Checkpoint
//!
//! Incremental: each record carries the tuples appended since the previous
//! record of this operator. The permutation is carried exactly once, by the
//! first record taken after sorting.

use std::cmp::Ordering;

use tracing::debug;

use super::context::ExecContext;
use super::errors::{ExecutorError, ExecutorResult};
use super::node::ExecutorNode;
use super::protocol::{check_state, consider_checkpoint, CheckpointTracker, Executor};
use super::tuple::{ColMeta, ColumnRef, Tuple, TupleLayout, Value};
use crate::cost::RewardModel;
use crate::recovery::ResumeContext;
use crate::state::{ChildState, OperatorKind, OperatorState, SortState, StateBody};

/// Fixed part of a `SortState` payload
const CURSOR_BYTES: u64 = 4 + 4 + 1 + 1 + 4 + 8 + 8 + 9;

pub struct SortExecutor {
    operator_id: u32,
    child: ExecutorNode,
    key: ColMeta,
    descending: bool,
    buffer: Vec<Tuple>,
    checkpointed_count: usize,
    materialized: bool,
    permutation: Vec<u32>,
    perm_checkpointed: bool,
    output_pos: usize,
    produced: u64,
    child_consumed: u64,
    tracker: CheckpointTracker,
    begun: bool,
}

impl SortExecutor {
    pub fn new(
        operator_id: u32,
        child: ExecutorNode,
        key: &ColumnRef,
        descending: bool,
    ) -> ExecutorResult<Self> {
        let key = child.tuple_layout().column(key)?.clone();
        Ok(Self {
            operator_id,
            child,
            key,
            descending,
            buffer: Vec::new(),
            checkpointed_count: 0,
            materialized: false,
            permutation: Vec::new(),
            perm_checkpointed: false,
            output_pos: 0,
            produced: 0,
            child_consumed: 0,
            tracker: CheckpointTracker::new(),
            begun: false,
        })
    }

    pub fn child(&self) -> &ExecutorNode {
        &self.child
    }

    pub(crate) fn child_mut(&mut self) -> &mut ExecutorNode {
        &mut self.child
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn materialize(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        while !self.child.at_end() {
            self.buffer.push(self.child.current()?);
            self.child.advance(ctx)?;
            self.child_consumed += 1;
            self.tracker.bump();
            consider_checkpoint(self, ctx)?;
        }

        self.permutation = self.sort_permutation()?;
        self.materialized = true;
        self.perm_checkpointed = false;
        self.output_pos = 0;
        self.tracker.bump();
        debug!(
            operator_id = self.operator_id,
            tuples = self.buffer.len(),
            descending = self.descending,
            "sort materialized"
        );
        consider_checkpoint(self, ctx)
    }

    /// Stable permutation of buffer indices in output order.
    fn sort_permutation(&self) -> ExecutorResult<Vec<u32>> {
        let keys = self
            .buffer
            .iter()
            .map(|t| t.value(&self.key))
            .collect::<ExecutorResult<Vec<Value>>>()?;
        let mut perm: Vec<u32> = (0..self.buffer.len() as u32).collect();
        perm.sort_by(|a, b| {
            let ordering: Ordering = keys[*a as usize].cmp_total(&keys[*b as usize]);
            if self.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
        Ok(perm)
    }

    fn check_permutation(&self) -> ExecutorResult<()> {
        let mut seen = vec![false; self.buffer.len()];
        for &i in &self.permutation {
            match seen.get_mut(i as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(ExecutorError::corrupt_checkpoint(format!(
                        "Sort {} permutation is not a permutation of {} tuples",
                        self.operator_id,
                        self.buffer.len()
                    )))
                }
            }
        }
        if self.permutation.len() != self.buffer.len() {
            return Err(ExecutorError::corrupt_checkpoint(format!(
                "Sort {} permutation covers {} of {} tuples",
                self.operator_id,
                self.permutation.len(),
                self.buffer.len()
            )));
        }
        Ok(())
    }
}

impl Executor for SortExecutor {
    fn operator_id(&self) -> u32 {
        self.operator_id
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Sort
    }

    fn tuple_layout(&self) -> &TupleLayout {
        self.child.tuple_layout()
    }

    fn begin(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        self.begun = true;
        self.tracker.baseline();
        self.output_pos = 0;
        self.produced = 0;
        if self.materialized {
            return Ok(());
        }
        self.buffer.clear();
        self.checkpointed_count = 0;
        self.child_consumed = 0;
        self.child.begin(ctx)?;
        self.materialize(ctx)
    }

    fn advance(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        if self.at_end() {
            return Err(ExecutorError::execution_failed("advance past end of sort")
                .at_operator(self.operator_id));
        }
        self.produced += 1;
        self.output_pos += 1;
        self.tracker.bump();
        consider_checkpoint(self, ctx)
    }

    fn at_end(&self) -> bool {
        !self.materialized || self.output_pos >= self.permutation.len()
    }

    fn current(&self) -> ExecutorResult<Tuple> {
        self.permutation
            .get(self.output_pos)
            .and_then(|&i| self.buffer.get(i as usize))
            .cloned()
            .ok_or_else(|| {
                ExecutorError::execution_failed("sort has no current tuple")
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
        let tuples: usize = self.buffer[self.checkpointed_count.min(self.buffer.len())..]
            .iter()
            .map(Tuple::encoded_len)
            .sum();
        let perm = if self.materialized && !self.perm_checkpointed {
            4 + 4 * self.permutation.len()
        } else {
            0
        };
        model.src(CURSOR_BYTES + (tuples + perm) as u64)
    }

    fn latest_checkpoint_time(&self) -> Option<i64> {
        self.tracker.latest_checkpoint_time()
    }

    fn resume_cost(&self) -> f64 {
        self.tracker.resume_cost()
    }

    fn snapshot(&self, sql_id: u32) -> OperatorState {
        let base = self.checkpointed_count.min(self.buffer.len());
        OperatorState::new(
            sql_id,
            self.operator_id,
            self.materialized,
            StateBody::Sort(SortState {
                base_count: base as u32,
                tuples: self.buffer[base..].to_vec(),
                materialized: self.materialized,
                permutation: if self.materialized && !self.perm_checkpointed {
                    Some(self.permutation.clone())
                } else {
                    None
                },
                output_pos: self.output_pos as u32,
                produced: self.produced,
                child_consumed: self.child_consumed,
                child: if self.materialized {
                    ChildState::Absent
                } else {
                    self.child.child_state(sql_id)
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
        check_state(state, self.operator_id, OperatorKind::Sort)?;
        let StateBody::Sort(s) = &state.body else {
            return Err(ExecutorError::corrupt_checkpoint("sort body expected"));
        };

        let (tuples, permutation) = resume.sort_chain(self.operator_id, seq, s)?;
        if tuples.len() as u64 != s.child_consumed {
            return Err(ExecutorError::incomplete_state(
                self.operator_id,
                format!(
                    "{} tuples restored, {} consumed from the child",
                    tuples.len(),
                    s.child_consumed
                ),
            ));
        }

        self.begun = true;
        self.buffer = tuples;
        self.checkpointed_count = self.buffer.len();
        self.child_consumed = s.child_consumed;
        self.output_pos = s.output_pos as usize;
        self.produced = s.produced;
        self.materialized = false;
        self.permutation.clear();
        self.tracker.baseline();

        if !s.materialized {
            resume.restore_child(&mut self.child, &s.child, seq, ctx)?;
            self.materialize(ctx)?;
            return Ok(());
        }

        match permutation {
            Some(perm) => {
                self.permutation = perm;
                self.perm_checkpointed = true;
            }
            None => {
                self.permutation = self.sort_permutation()?;
                self.perm_checkpointed = false;
            }
        }
        self.check_permutation()?;
        self.materialized = true;
        if self.output_pos > self.permutation.len() {
            return Err(ExecutorError::corrupt_checkpoint(format!(
                "Sort {} output position {} beyond {} tuples",
                self.operator_id,
                self.output_pos,
                self.permutation.len()
            )));
        }
        debug!(
            operator_id = self.operator_id,
            seq,
            tuples = self.buffer.len(),
            output_pos = self.output_pos,
            "sort restored"
        );
        Ok(())
    }

    fn invalidate_checkpoints(&mut self) {
        self.checkpointed_count = 0;
        self.perm_checkpointed = false;
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
        self.checkpointed_count = self.buffer.len();
        if self.materialized {
            self.perm_checkpointed = true;
        }
        let child_rc = if self.materialized {
            0.0
        } else {
            self.child.resume_cost()
        };
        self.tracker.record(child_rc, 0.0);
        Ok(true)
    }
}
