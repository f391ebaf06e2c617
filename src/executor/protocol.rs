//! Executor protocol
//!
//! # Iterator contract
//!
//! - `begin()` positions at the first qualifying tuple or marks the operator
//!   exhausted
//! - `advance()` moves to the next tuple; calling it at the end is an error
//! - `current()` peeks without consuming
//! - `produced()` counts successful `advance()` calls since `begin()`
//!
//! # Resume contract
//!
//! `load(state)` leaves the operator exactly where `begin()` followed by
//! `state.produced()` calls to `advance()` would have. A state captured
//! inside a call (block join searching, hash build, sort materialization)
//! carries enough to finish that call during `load`.
//!
//! Index scans persist the *last delivered* row rather than the current one:
//! their `load` repositions on that row and advances once.

use super::context::ExecContext;
use super::errors::{ExecutorError, ExecutorResult};
use super::tuple::{Tuple, TupleLayout};
use crate::cost::{CheckpointHistory, CheckpointInfo, RewardModel};
use crate::recovery::ResumeContext;
use crate::state::{OperatorKind, OperatorState, StateWriter};

pub trait Executor {
    fn operator_id(&self) -> u32;

    fn kind(&self) -> OperatorKind;

    fn tuple_layout(&self) -> &TupleLayout;

    fn begin(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()>;

    fn advance(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()>;

    fn at_end(&self) -> bool;

    fn current(&self) -> ExecutorResult<Tuple>;

    /// Whether `begin()` or `load()` has run
    fn is_begun(&self) -> bool;

    fn produced(&self) -> u64;

    /// Whether the operator writes its own checkpoint records
    fn owns_checkpoints(&self) -> bool;

    /// Whether the state changed since the last checkpoint
    fn is_dirty(&self) -> bool;

    /// SRC: bytes of the next checkpoint, floor included
    fn suspend_cost_estimate(&self, model: &RewardModel) -> u64;

    /// Wall clock (µs) of the latest persisted checkpoint
    fn latest_checkpoint_time(&self) -> Option<i64>;

    /// RC: µs of work lost if execution failed now
    fn resume_cost(&self) -> f64;

    fn snapshot(&self, sql_id: u32) -> OperatorState;

    fn save(&self, sql_id: u32, w: &mut StateWriter) {
        self.snapshot(sql_id).write(w);
    }

    /// Restores the operator from `state`, record `seq` of the catalog.
    fn load(
        &mut self,
        state: &OperatorState,
        seq: u64,
        ctx: &mut ExecContext,
        resume: &mut ResumeContext,
    ) -> ExecutorResult<()>;

    /// Forgets which state is already persisted, so the next record carries
    /// the full state again.
    fn invalidate_checkpoints(&mut self) {}

    /// Checkpoints unconditionally if the state changed.
    fn checkpoint_now(&mut self, ctx: &mut ExecContext) -> ExecutorResult<bool>;

    /// Checkpoints if the reward is positive.
    fn checkpoint_if_rewarding(&mut self, ctx: &mut ExecContext) -> ExecutorResult<bool> {
        if !self.owns_checkpoints() || !self.is_dirty() || ctx.checkpoints_suspended() {
            return Ok(false);
        }
        let src = self.suspend_cost_estimate(ctx.model());
        if ctx.evaluate(self.resume_cost(), src) {
            self.checkpoint_now(ctx)
        } else {
            Ok(false)
        }
    }
}

/// Advances `node` until it has produced `target` tuples.
pub fn fast_forward<E: Executor + ?Sized>(
    node: &mut E,
    target: u64,
    ctx: &mut ExecContext,
) -> ExecutorResult<()> {
    if node.produced() > target {
        return Err(ExecutorError::corrupt_checkpoint(format!(
            "Operator {} restored past position {} (at {})",
            node.operator_id(),
            target,
            node.produced()
        )));
    }
    while node.produced() < target {
        if node.at_end() {
            return Err(ExecutorError::execution_failed(format!(
                "Operator {} ended at {} before reaching position {}",
                node.operator_id(),
                node.produced(),
                target
            ))
            .at_operator(node.operator_id()));
        }
        node.advance(ctx)?;
    }
    Ok(())
}

/// Self-evaluation point inside an operator under the reward strategy.
pub(crate) fn consider_checkpoint<E: Executor + ?Sized>(
    node: &mut E,
    ctx: &mut ExecContext,
) -> ExecutorResult<()> {
    if ctx.self_evaluates() {
        node.checkpoint_if_rewarding(ctx)?;
    }
    Ok(())
}

/// State version counter plus checkpoint history of one operator.
///
/// Every state change bumps the version; a checkpoint is only worth taking
/// when the version differs from the one last recorded.
#[derive(Debug, Clone, Default)]
pub struct CheckpointTracker {
    history: CheckpointHistory,
    version: u64,
}

impl CheckpointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&mut self) {
        self.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn history(&self) -> &CheckpointHistory {
        &self.history
    }

    /// Start of a run from `begin()` or `load()`
    pub fn baseline(&mut self) {
        self.version += 1;
        self.history.push_baseline(self.version);
    }

    pub fn is_dirty(&self) -> bool {
        !self.history.is_current(self.version)
    }

    pub fn record(&mut self, left_rc: f64, right_rc: f64) {
        self.history
            .push(CheckpointInfo::new(self.version, left_rc, right_rc));
    }

    pub fn record_block(&mut self, left_rc: f64, right_rc: f64, block_id: u64, block_tuples: u64) {
        self.history.push(
            CheckpointInfo::new(self.version, left_rc, right_rc).with_block(block_id, block_tuples),
        );
    }

    pub fn resume_cost(&self) -> f64 {
        self.history.resume_cost()
    }

    pub fn latest_checkpoint_time(&self) -> Option<i64> {
        self.history.latest_checkpoint_time()
    }
}

/// Rejects a state that does not belong to the operator restoring it.
pub(crate) fn check_state(
    state: &OperatorState,
    operator_id: u32,
    kind: OperatorKind,
) -> ExecutorResult<()> {
    if state.operator_id() != operator_id || state.kind() != kind {
        return Err(ExecutorError::corrupt_checkpoint(format!(
            "Record for operator {} ({}) offered to operator {} ({})",
            state.operator_id(),
            state.kind(),
            operator_id,
            kind
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_dirty_after_bump() {
        let mut tracker = CheckpointTracker::new();
        tracker.baseline();
        assert!(!tracker.is_dirty());
        tracker.bump();
        assert!(tracker.is_dirty());
        tracker.record(0.0, 0.0);
        assert!(!tracker.is_dirty());
        assert_eq!(tracker.history().persisted_count(), 1);
    }
}
