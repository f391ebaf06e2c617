//! Closed set of operator kinds
//!
//! Every tree node is one `ExecutorNode` variant; parents own their children
//! and the tree is walked by matching on the variant.

use super::block_join::BlockNestedLoopJoinExecutor;
use super::context::ExecContext;
use super::errors::ExecutorResult;
use super::hash_join::HashJoinExecutor;
use super::index_scan::IndexScanExecutor;
use super::projection::ProjectionExecutor;
use super::protocol::Executor;
use super::sort::SortExecutor;
use super::tuple::{Tuple, TupleLayout};
use crate::cost::{OperatorCost, RewardModel};
use crate::recovery::ResumeContext;
use crate::state::{ChildState, OperatorKind, OperatorState};

pub enum ExecutorNode {
    IndexScan(IndexScanExecutor),
    BlockJoin(Box<BlockNestedLoopJoinExecutor>),
    HashJoin(Box<HashJoinExecutor>),
    Sort(Box<SortExecutor>),
    Projection(Box<ProjectionExecutor>),
}

macro_rules! dispatch {
    ($node:expr, $op:ident => $body:expr) => {
        match $node {
            ExecutorNode::IndexScan($op) => $body,
            ExecutorNode::BlockJoin($op) => $body,
            ExecutorNode::HashJoin($op) => $body,
            ExecutorNode::Sort($op) => $body,
            ExecutorNode::Projection($op) => $body,
        }
    };
}

impl ExecutorNode {
    pub fn children(&self) -> Vec<&ExecutorNode> {
        match self {
            ExecutorNode::IndexScan(_) => Vec::new(),
            ExecutorNode::BlockJoin(op) => vec![op.left(), op.right()],
            ExecutorNode::HashJoin(op) => vec![op.left(), op.right()],
            ExecutorNode::Sort(op) => vec![op.child()],
            ExecutorNode::Projection(op) => vec![op.child()],
        }
    }

    pub(crate) fn children_mut(&mut self) -> Vec<&mut ExecutorNode> {
        match self {
            ExecutorNode::IndexScan(_) => Vec::new(),
            ExecutorNode::BlockJoin(op) => op.children_mut().into(),
            ExecutorNode::HashJoin(op) => op.children_mut().into(),
            ExecutorNode::Sort(op) => vec![op.child_mut()],
            ExecutorNode::Projection(op) => vec![op.child_mut()],
        }
    }

    /// How a parent's record refers to this node.
    pub fn child_state(&self, sql_id: u32) -> ChildState {
        if !self.is_begun() {
            ChildState::Absent
        } else if self.kind().is_embedded() {
            ChildState::Embedded(Box::new(self.snapshot(sql_id)))
        } else {
            ChildState::Position(self.produced())
        }
    }

    /// Operator ids in pre-order
    pub fn operator_ids(&self) -> Vec<u32> {
        let mut ids = vec![self.operator_id()];
        for child in self.children() {
            ids.extend(child.operator_ids());
        }
        ids
    }

    /// Applies `f` to every node, children before parents.
    pub(crate) fn visit_post_order_mut(
        &mut self,
        f: &mut dyn FnMut(&mut ExecutorNode) -> ExecutorResult<()>,
    ) -> ExecutorResult<()> {
        for child in self.children_mut() {
            child.visit_post_order_mut(f)?;
        }
        f(self)
    }

    /// Cost inputs of every checkpointable node, parents before children.
    pub(crate) fn collect_costs(
        &self,
        model: &RewardModel,
        parent: Option<usize>,
        out: &mut Vec<OperatorCost>,
    ) {
        let mut nearest = parent;
        if self.owns_checkpoints() && self.is_begun() {
            out.push(OperatorCost {
                operator_id: self.operator_id(),
                parent,
                suspend_time: model.suspend_time(self.suspend_cost_estimate(model)),
                resume_cost: self.resume_cost(),
            });
            nearest = Some(out.len() - 1);
        }
        for child in self.children() {
            child.collect_costs(model, nearest, out);
        }
    }
}

impl Executor for ExecutorNode {
    fn operator_id(&self) -> u32 {
        dispatch!(self, op => op.operator_id())
    }

    fn kind(&self) -> OperatorKind {
        dispatch!(self, op => op.kind())
    }

    fn tuple_layout(&self) -> &TupleLayout {
        dispatch!(self, op => op.tuple_layout())
    }

    fn begin(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        dispatch!(self, op => op.begin(ctx))
    }

    fn advance(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        dispatch!(self, op => op.advance(ctx))
    }

    fn at_end(&self) -> bool {
        dispatch!(self, op => op.at_end())
    }

    fn current(&self) -> ExecutorResult<Tuple> {
        dispatch!(self, op => op.current())
    }

    fn is_begun(&self) -> bool {
        dispatch!(self, op => op.is_begun())
    }

    fn produced(&self) -> u64 {
        dispatch!(self, op => op.produced())
    }

    fn owns_checkpoints(&self) -> bool {
        dispatch!(self, op => op.owns_checkpoints())
    }

    fn is_dirty(&self) -> bool {
        dispatch!(self, op => op.is_dirty())
    }

    fn suspend_cost_estimate(&self, model: &RewardModel) -> u64 {
        dispatch!(self, op => op.suspend_cost_estimate(model))
    }

    fn latest_checkpoint_time(&self) -> Option<i64> {
        dispatch!(self, op => op.latest_checkpoint_time())
    }

    fn resume_cost(&self) -> f64 {
        dispatch!(self, op => op.resume_cost())
    }

    fn snapshot(&self, sql_id: u32) -> OperatorState {
        dispatch!(self, op => op.snapshot(sql_id))
    }

    fn load(
        &mut self,
        state: &OperatorState,
        seq: u64,
        ctx: &mut ExecContext,
        resume: &mut ResumeContext,
    ) -> ExecutorResult<()> {
        dispatch!(self, op => op.load(state, seq, ctx, resume))
    }

    fn invalidate_checkpoints(&mut self) {
        dispatch!(self, op => op.invalidate_checkpoints())
    }

    fn checkpoint_now(&mut self, ctx: &mut ExecContext) -> ExecutorResult<bool> {
        dispatch!(self, op => op.checkpoint_now(ctx))
    }

    fn checkpoint_if_rewarding(&mut self, ctx: &mut ExecContext) -> ExecutorResult<bool> {
        dispatch!(self, op => op.checkpoint_if_rewarding(ctx))
    }
}

impl From<IndexScanExecutor> for ExecutorNode {
    fn from(op: IndexScanExecutor) -> Self {
        ExecutorNode::IndexScan(op)
    }
}

impl From<BlockNestedLoopJoinExecutor> for ExecutorNode {
    fn from(op: BlockNestedLoopJoinExecutor) -> Self {
        ExecutorNode::BlockJoin(Box::new(op))
    }
}

impl From<HashJoinExecutor> for ExecutorNode {
    fn from(op: HashJoinExecutor) -> Self {
        ExecutorNode::HashJoin(Box::new(op))
    }
}

impl From<SortExecutor> for ExecutorNode {
    fn from(op: SortExecutor) -> Self {
        ExecutorNode::Sort(Box::new(op))
    }
}

impl From<ProjectionExecutor> for ExecutorNode {
    fn from(op: ProjectionExecutor) -> Self {
        ExecutorNode::Projection(Box::new(op))
    }
}
