//! Hash equi-join
//!
//! Build drains the left input into buckets keyed by the raw bytes of the
//! join-key columns, rows kept in arrival order. Probe streams the right
//! input; each right tuple emits one output per row of its bucket, in bucket
//! order, before the right input moves on. Right tuples without a bucket are
//! skipped.
//!
//! # Checkpoint
//!
//! Incremental: a record carries only the bucket rows appended since the
//! operator's previous record, each tagged with the bucket length it extends.
//! Resume re-appends every increment in flush order and rejects any gap.

use std::collections::HashMap;

use tracing::debug;

use super::condition::{CompOp, Condition, Operand};
use super::context::ExecContext;
use super::errors::{ExecutorError, ExecutorResult};
use super::node::ExecutorNode;
use super::protocol::{check_state, consider_checkpoint, CheckpointTracker, Executor};
use super::tuple::{ColMeta, Tuple, TupleLayout};
use crate::cost::RewardModel;
use crate::recovery::ResumeContext;
use crate::state::{
    BucketIncrement, ChildState, HashJoinState, OperatorKind, OperatorState, ProbeCursor,
    StateBody,
};

/// Fixed part of a `HashJoinState` payload
const CURSOR_BYTES: u64 = 4 + 1 + 1 + 4 + 4 + 1 + 8 + 8 + 2 * 9;

#[derive(Debug, Default)]
struct Bucket {
    rows: Vec<Tuple>,
    /// Rows already covered by a record
    checkpointed: usize,
}

pub struct HashJoinExecutor {
    operator_id: u32,
    left: ExecutorNode,
    right: ExecutorNode,
    left_keys: Vec<ColMeta>,
    right_keys: Vec<ColMeta>,
    layout: TupleLayout,
    buckets: HashMap<Vec<u8>, Bucket>,
    build_complete: bool,
    probe_key: Option<Vec<u8>>,
    probe_index: usize,
    finished: bool,
    current: Option<Tuple>,
    produced: u64,
    left_consumed: u64,
    tracker: CheckpointTracker,
    begun: bool,
}

impl HashJoinExecutor {
    /// Joins on `conditions`, each an equality between a left column and a
    /// right column (either order).
    pub fn new(
        operator_id: u32,
        left: ExecutorNode,
        right: ExecutorNode,
        conditions: &[Condition],
    ) -> ExecutorResult<Self> {
        if conditions.is_empty() {
            return Err(ExecutorError::execution_failed(format!(
                "Hash join {} needs at least one equality condition",
                operator_id
            )));
        }

        let mut left_keys = Vec::with_capacity(conditions.len());
        let mut right_keys = Vec::with_capacity(conditions.len());
        for cond in conditions {
            let Operand::Column(rhs) = &cond.rhs else {
                return Err(ExecutorError::execution_failed(format!(
                    "Hash join {} condition {} is not column-to-column",
                    operator_id, cond
                )));
            };
            if cond.op != CompOp::Eq {
                return Err(ExecutorError::execution_failed(format!(
                    "Hash join {} condition {} is not an equality",
                    operator_id, cond
                )));
            }
            let (l, r) = if left.tuple_layout().contains(&cond.lhs) {
                (&cond.lhs, rhs)
            } else {
                (rhs, &cond.lhs)
            };
            left_keys.push(left.tuple_layout().column(l)?.clone());
            right_keys.push(right.tuple_layout().column(r)?.clone());
        }

        let layout = TupleLayout::join(left.tuple_layout(), right.tuple_layout());
        Ok(Self {
            operator_id,
            left,
            right,
            left_keys,
            right_keys,
            layout,
            buckets: HashMap::new(),
            build_complete: false,
            probe_key: None,
            probe_index: 0,
            finished: false,
            current: None,
            produced: 0,
            left_consumed: 0,
            tracker: CheckpointTracker::new(),
            begun: false,
        })
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

    pub fn build_complete(&self) -> bool {
        self.build_complete
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Rows in the bucket with `key`
    pub fn bucket_len(&self, key: &[u8]) -> usize {
        self.buckets.get(key).map_or(0, |b| b.rows.len())
    }

    fn key_of(cols: &[ColMeta], tuple: &Tuple) -> ExecutorResult<Vec<u8>> {
        let mut key = Vec::new();
        for col in cols {
            key.extend_from_slice(tuple.column_bytes(col)?);
        }
        Ok(key)
    }

    /// Drains the rest of the left input into the buckets, then starts probing.
    fn build(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        while !self.left.at_end() {
            let tuple = self.left.current()?;
            let key = Self::key_of(&self.left_keys, &tuple)?;
            self.buckets.entry(key).or_default().rows.push(tuple);
            self.left.advance(ctx)?;
            self.left_consumed += 1;
            self.tracker.bump();
            consider_checkpoint(self, ctx)?;
        }
        self.build_complete = true;
        self.tracker.bump();
        debug!(
            operator_id = self.operator_id,
            buckets = self.buckets.len(),
            rows = self.left_consumed,
            "hash build complete"
        );
        self.start_probe(ctx)
    }

    fn start_probe(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        self.produced = 0;
        self.finished = false;
        self.right.begin(ctx)?;
        self.position_probe(0, ctx)
    }

    /// Moves to bucket row `next_index` of the current right tuple, or to the
    /// first row of the next right tuple that has a bucket.
    fn position_probe(&mut self, mut next_index: usize, ctx: &mut ExecContext) -> ExecutorResult<()> {
        loop {
            if self.right.at_end() {
                self.finished = true;
                self.current = None;
                self.probe_key = None;
                self.probe_index = 0;
                return Ok(());
            }
            let right = self.right.current()?;
            let key = Self::key_of(&self.right_keys, &right)?;
            if let Some(row) = self.buckets.get(&key).and_then(|b| b.rows.get(next_index)) {
                self.current = Some(Tuple::join(row, &right));
                self.probe_key = Some(key);
                self.probe_index = next_index;
                return Ok(());
            }
            self.right.advance(ctx)?;
            next_index = 0;
        }
    }

    fn increments(&self) -> Vec<BucketIncrement> {
        let mut keys: Vec<&Vec<u8>> = self
            .buckets
            .iter()
            .filter(|(_, b)| b.rows.len() > b.checkpointed)
            .map(|(k, _)| k)
            .collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| {
                let bucket = self.buckets.get(key)?;
                Some(BucketIncrement {
                    key: key.clone(),
                    base: bucket.checkpointed as u32,
                    rows: bucket.rows[bucket.checkpointed..].to_vec(),
                })
            })
            .collect()
    }

    fn replay_increments(&mut self, increments: Vec<BucketIncrement>) -> ExecutorResult<()> {
        self.buckets.clear();
        for inc in increments {
            let bucket = self.buckets.entry(inc.key).or_default();
            if inc.base as usize != bucket.rows.len() {
                return Err(ExecutorError::incomplete_state(
                    self.operator_id,
                    format!(
                        "bucket increment based at {} but bucket holds {} rows",
                        inc.base,
                        bucket.rows.len()
                    ),
                ));
            }
            bucket.rows.extend(inc.rows);
        }
        for bucket in self.buckets.values_mut() {
            bucket.checkpointed = bucket.rows.len();
        }
        Ok(())
    }

    fn restore_probe(&mut self, cursor: &ProbeCursor) -> ExecutorResult<()> {
        let right = self.right.current()?;
        let key = Self::key_of(&self.right_keys, &right)?;
        let row = if key == cursor.key {
            self.buckets
                .get(&key)
                .and_then(|b| b.rows.get(cursor.index as usize))
        } else {
            None
        };
        let Some(row) = row else {
            return Err(ExecutorError::corrupt_checkpoint(format!(
                "Hash join {} probe cursor does not match its restored input",
                self.operator_id
            )));
        };
        self.current = Some(Tuple::join(row, &right));
        self.probe_key = Some(key);
        self.probe_index = cursor.index as usize;
        Ok(())
    }
}

impl Executor for HashJoinExecutor {
    fn operator_id(&self) -> u32 {
        self.operator_id
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::HashJoin
    }

    fn tuple_layout(&self) -> &TupleLayout {
        &self.layout
    }

    fn begin(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        self.begun = true;
        self.tracker.baseline();
        if self.build_complete {
            // Buckets survive a rescan
            return self.start_probe(ctx);
        }
        self.buckets.clear();
        self.left_consumed = 0;
        self.left.begin(ctx)?;
        self.build(ctx)
    }

    fn advance(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        if self.current.is_none() {
            return Err(ExecutorError::execution_failed("advance past end of hash join")
                .at_operator(self.operator_id));
        }
        self.produced += 1;
        self.tracker.bump();
        self.position_probe(self.probe_index + 1, ctx)?;
        consider_checkpoint(self, ctx)
    }

    fn at_end(&self) -> bool {
        self.current.is_none()
    }

    fn current(&self) -> ExecutorResult<Tuple> {
        self.current.clone().ok_or_else(|| {
            ExecutorError::execution_failed("hash join has no current tuple")
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
        let growth: usize = self
            .buckets
            .iter()
            .filter(|(_, b)| b.rows.len() > b.checkpointed)
            .map(|(key, b)| {
                key.len() + 12 + b.rows[b.checkpointed..].iter().map(Tuple::encoded_len).sum::<usize>()
            })
            .sum();
        let probe = self.probe_key.as_ref().map_or(0, Vec::len);
        model.src(CURSOR_BYTES + (growth + probe) as u64)
    }

    fn latest_checkpoint_time(&self) -> Option<i64> {
        self.tracker.latest_checkpoint_time()
    }

    fn resume_cost(&self) -> f64 {
        self.tracker.resume_cost()
    }

    fn snapshot(&self, sql_id: u32) -> OperatorState {
        let probe = match (&self.probe_key, self.build_complete && !self.finished) {
            (Some(key), true) => Some(ProbeCursor {
                key: key.clone(),
                index: self.probe_index as u32,
            }),
            _ => None,
        };
        OperatorState::new(
            sql_id,
            self.operator_id,
            self.build_complete,
            StateBody::HashJoin(HashJoinState {
                increments: self.increments(),
                build_complete: self.build_complete,
                probe,
                finished: self.finished,
                produced: self.produced,
                left_consumed: self.left_consumed,
                left: if self.build_complete {
                    ChildState::Absent
                } else {
                    self.left.child_state(sql_id)
                },
                right: if self.build_complete && !self.finished {
                    self.right.child_state(sql_id)
                } else {
                    ChildState::Absent
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
        check_state(state, self.operator_id, OperatorKind::HashJoin)?;
        let StateBody::HashJoin(s) = &state.body else {
            return Err(ExecutorError::corrupt_checkpoint("hash join body expected"));
        };

        let increments = resume.bucket_chain(self.operator_id, seq)?;
        self.replay_increments(increments)?;
        let rows: usize = self.buckets.values().map(|b| b.rows.len()).sum();
        if rows as u64 != s.left_consumed {
            return Err(ExecutorError::incomplete_state(
                self.operator_id,
                format!(
                    "{} bucket rows restored, {} consumed from the build input",
                    rows, s.left_consumed
                ),
            ));
        }

        self.begun = true;
        self.build_complete = s.build_complete;
        self.finished = s.finished;
        self.produced = s.produced;
        self.left_consumed = s.left_consumed;
        self.current = None;
        self.probe_key = None;
        self.probe_index = 0;
        self.tracker.baseline();

        if !s.build_complete {
            resume.restore_child(&mut self.left, &s.left, seq, ctx)?;
            self.build(ctx)?;
            self.tracker.bump();
        } else if !s.finished {
            resume.restore_child(&mut self.right, &s.right, seq, ctx)?;
            let Some(cursor) = &s.probe else {
                return Err(ExecutorError::corrupt_checkpoint(format!(
                    "Hash join {} probing without a probe cursor",
                    self.operator_id
                )));
            };
            self.restore_probe(cursor)?;
        }
        debug!(
            operator_id = self.operator_id,
            seq,
            buckets = self.buckets.len(),
            build_complete = self.build_complete,
            produced = self.produced,
            "hash join restored"
        );
        Ok(())
    }

    fn invalidate_checkpoints(&mut self) {
        for bucket in self.buckets.values_mut() {
            bucket.checkpointed = 0;
        }
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
        for bucket in self.buckets.values_mut() {
            bucket.checkpointed = bucket.rows.len();
        }
        let left_rc = if self.build_complete {
            0.0
        } else {
            self.left.resume_cost()
        };
        self.tracker.record(left_rc, self.right.resume_cost());
        Ok(true)
    }
}
