//! Column projection
//!
//! Re-maps child columns into a narrower output layout. The projection at
//! the root of a query tree also counts the tuples handed to the client and
//! is the only projection that writes its own records; any other projection
//! travels inside its parent's record.

use super::context::ExecContext;
use super::errors::{ExecutorError, ExecutorResult};
use super::node::ExecutorNode;
use super::protocol::{check_state, consider_checkpoint, CheckpointTracker, Executor};
use super::tuple::{ColMeta, ColumnRef, Tuple, TupleLayout};
use crate::cost::RewardModel;
use crate::recovery::ResumeContext;
use crate::state::{OperatorKind, OperatorState, ProjectionState, StateBody};

pub struct ProjectionExecutor {
    operator_id: u32,
    child: ExecutorNode,
    /// (child column, output column)
    mapping: Vec<(ColMeta, ColMeta)>,
    layout: TupleLayout,
    is_root: bool,
    delivered: u64,
    delivered_at_checkpoint: u64,
    produced: u64,
    tracker: CheckpointTracker,
    begun: bool,
}

impl ProjectionExecutor {
    pub fn new(operator_id: u32, child: ExecutorNode, columns: &[ColumnRef]) -> ExecutorResult<Self> {
        if columns.is_empty() {
            return Err(ExecutorError::execution_failed(format!(
                "Projection {} selects no columns",
                operator_id
            )));
        }
        let mut mapping = Vec::with_capacity(columns.len());
        let mut offset = 0;
        for col in columns {
            let source = child.tuple_layout().column(col)?.clone();
            let target = ColMeta {
                offset,
                ..source.clone()
            };
            offset += source.len;
            mapping.push((source, target));
        }
        let layout = TupleLayout::from_columns(mapping.iter().map(|(_, t)| t.clone()).collect());
        Ok(Self {
            operator_id,
            child,
            mapping,
            layout,
            is_root: false,
            delivered: 0,
            delivered_at_checkpoint: 0,
            produced: 0,
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

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub(crate) fn set_root(&mut self, is_root: bool) {
        self.is_root = is_root;
    }

    /// Tuples handed to the client
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub(crate) fn set_delivered(&mut self, delivered: u64) {
        self.delivered = delivered;
        self.delivered_at_checkpoint = delivered;
    }

    pub fn delivered_at_checkpoint(&self) -> u64 {
        self.delivered_at_checkpoint
    }

    /// Hands the current tuple to the client and evaluates the root's reward.
    pub(crate) fn emit(&mut self, ctx: &mut ExecContext) -> ExecutorResult<Tuple> {
        let tuple = self.current()?;
        self.delivered += 1;
        self.tracker.bump();
        ctx.metrics().increment_tuples_delivered();
        consider_checkpoint(self, ctx)?;
        Ok(tuple)
    }

    fn project(&self, source: &Tuple) -> ExecutorResult<Tuple> {
        let mut data = vec![0u8; self.layout.tuple_len()];
        for (from, to) in &self.mapping {
            data[to.offset..to.offset + to.len].copy_from_slice(source.column_bytes(from)?);
        }
        Ok(Tuple {
            header: source.header,
            data,
        })
    }
}

impl Executor for ProjectionExecutor {
    fn operator_id(&self) -> u32 {
        self.operator_id
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Projection
    }

    fn tuple_layout(&self) -> &TupleLayout {
        &self.layout
    }

    fn begin(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        self.begun = true;
        self.produced = 0;
        self.delivered = 0;
        self.delivered_at_checkpoint = 0;
        self.tracker.baseline();
        self.child.begin(ctx)
    }

    fn advance(&mut self, ctx: &mut ExecContext) -> ExecutorResult<()> {
        if self.child.at_end() {
            return Err(ExecutorError::execution_failed("advance past end of projection")
                .at_operator(self.operator_id));
        }
        self.child.advance(ctx)?;
        self.produced += 1;
        self.tracker.bump();
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.child.at_end()
    }

    fn current(&self) -> ExecutorResult<Tuple> {
        self.project(&self.child.current()?)
    }

    fn is_begun(&self) -> bool {
        self.begun
    }

    fn produced(&self) -> u64 {
        self.produced
    }

    fn owns_checkpoints(&self) -> bool {
        self.is_root
    }

    fn is_dirty(&self) -> bool {
        self.is_root && self.tracker.is_dirty()
    }

    fn suspend_cost_estimate(&self, model: &RewardModel) -> u64 {
        let pending = self.delivered.saturating_sub(self.delivered_at_checkpoint);
        model.src(pending * self.layout.tuple_len() as u64)
    }

    fn latest_checkpoint_time(&self) -> Option<i64> {
        self.tracker.latest_checkpoint_time()
    }

    fn resume_cost(&self) -> f64 {
        if self.is_root {
            self.tracker.resume_cost()
        } else {
            self.child.resume_cost()
        }
    }

    fn snapshot(&self, sql_id: u32) -> OperatorState {
        OperatorState::new(
            sql_id,
            self.operator_id,
            self.begun,
            StateBody::Projection(ProjectionState {
                delivered: self.delivered,
                produced: self.produced,
                child: self.child.child_state(sql_id),
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
        check_state(state, self.operator_id, OperatorKind::Projection)?;
        let StateBody::Projection(s) = &state.body else {
            return Err(ExecutorError::corrupt_checkpoint("projection body expected"));
        };
        resume.restore_child(&mut self.child, &s.child, seq, ctx)?;
        self.begun = true;
        self.produced = s.produced;
        self.set_delivered(s.delivered);
        self.tracker.baseline();
        Ok(())
    }

    fn invalidate_checkpoints(&mut self) {
        self.delivered_at_checkpoint = 0;
        self.tracker.bump();
    }

    fn checkpoint_now(&mut self, ctx: &mut ExecContext) -> ExecutorResult<bool> {
        if !self.is_root || !self.begun || !self.is_dirty() || ctx.checkpoints_suspended() {
            return Ok(false);
        }
        let state = self.snapshot(ctx.sql_id());
        let src = self.suspend_cost_estimate(ctx.model());
        if !ctx.submit_checkpoint(&state, src)? {
            return Ok(false);
        }
        self.delivered_at_checkpoint = self.delivered;
        self.tracker.record(self.child.resume_cost(), 0.0);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ExecConfig;
    use crate::executor::{ColType, IndexScanExecutor, QueryInfo, Value};
    use crate::state::ChildState;
    use crate::storage::{IndexStorage, MemoryIndex, RecordingLockManager};

    fn projection() -> ProjectionExecutor {
        let layout = TupleLayout::new(
            "t",
            &[("id", ColType::Int), ("name", ColType::Str(3)), ("v", ColType::Int)],
        );
        let rows = vec![
            vec![Value::Int(1), Value::str("ab"), Value::Int(10)],
            vec![Value::Int(2), Value::str("cd"), Value::Int(20)],
        ];
        let index: Arc<dyn IndexStorage> =
            Arc::new(MemoryIndex::new(1, layout, &["id"], rows).unwrap());
        let scan = ExecutorNode::IndexScan(IndexScanExecutor::new(1, index, vec![]));
        ProjectionExecutor::new(
            2,
            scan,
            &[ColumnRef::new("t", "v"), ColumnRef::new("t", "name")],
        )
        .unwrap()
    }

    fn context() -> ExecContext {
        ExecContext::new(
            QueryInfo::select(1, 1),
            ExecConfig::default(),
            Arc::new(RecordingLockManager::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_projects_in_requested_order() {
        let mut ctx = context();
        let mut proj = projection();
        assert_eq!(proj.tuple_layout().tuple_len(), 7);
        proj.begin(&mut ctx).unwrap();
        let cols = proj.tuple_layout().columns().to_vec();
        let t = proj.current().unwrap();
        assert_eq!(t.value(&cols[0]).unwrap(), Value::Int(10));
        assert_eq!(t.value(&cols[1]).unwrap(), Value::Str(b"ab\0".to_vec()));
        proj.advance(&mut ctx).unwrap();
        proj.advance(&mut ctx).unwrap();
        assert!(proj.at_end());
        assert!(proj.advance(&mut ctx).is_err());
    }

    #[test]
    fn test_unknown_column_rejected() {
        let layout = TupleLayout::new("t", &[("id", ColType::Int)]);
        let index: Arc<dyn IndexStorage> =
            Arc::new(MemoryIndex::new(1, layout, &["id"], vec![]).unwrap());
        let scan = ExecutorNode::IndexScan(IndexScanExecutor::new(1, index, vec![]));
        assert!(ProjectionExecutor::new(2, scan, &[ColumnRef::new("t", "x")]).is_err());
    }

    #[test]
    fn test_non_root_never_checkpoints() {
        let mut ctx = context();
        let mut proj = projection();
        proj.begin(&mut ctx).unwrap();
        proj.advance(&mut ctx).unwrap();
        assert!(!proj.owns_checkpoints());
        assert!(!proj.checkpoint_now(&mut ctx).unwrap());
        match &proj.snapshot(1).body {
            StateBody::Projection(s) => {
                assert_eq!(s.produced, 1);
                assert!(matches!(s.child, ChildState::Embedded(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_root_emit_counts_delivery() {
        let mut ctx = context();
        let mut proj = projection();
        proj.set_root(true);
        proj.begin(&mut ctx).unwrap();
        proj.emit(&mut ctx).unwrap();
        assert_eq!(proj.delivered(), 1);
        assert!(proj.is_dirty());
        assert_eq!(ctx.metrics().snapshot().tuples_delivered, 1);
        assert_eq!(
            proj.suspend_cost_estimate(ctx.model()),
            ctx.model().src(7)
        );
    }
}
