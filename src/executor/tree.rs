//! Query driver
//!
//! Owns the operator tree and its context, hands tuples to the client and
//! runs the tree-level checkpoint strategies.
//!
//! # Delivery Protocol
//!
//! `next_tuple()` first advances past the tuple handed out by the previous
//! call, then emits the root's current tuple. The root record therefore has
//! `delivered == produced + 1` when taken during `emit()` and
//! `delivered == produced` when taken between the advance and the emit; a
//! resumed tree advances once only in the first case.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::context::ExecContext;
use super::errors::{ExecutorError, ExecutorResult};
use super::node::ExecutorNode;
use super::projection::ProjectionExecutor;
use super::protocol::Executor;
use super::tuple::{Tuple, TupleLayout};
use crate::checkpoint::{CheckpointCatalog, CheckpointMeta};
use crate::config::CostStrategy;
use crate::cost::{OperatorCost, TreeOptimizer};
use crate::observability::ExecMetrics;
use crate::recovery::{ResumeContext, ResumeReport};

pub struct QueryTree {
    root: ProjectionExecutor,
    ctx: ExecContext,
    optimizer: TreeOptimizer,
    started: bool,
    pending_advance: bool,
}

impl QueryTree {
    /// Wraps `root` as the root projection of a query.
    ///
    /// Operator ids must be unique within the tree.
    pub fn new(mut root: ProjectionExecutor, ctx: ExecContext) -> ExecutorResult<Self> {
        let mut ids = vec![root.operator_id()];
        ids.extend(root.child().operator_ids());
        let mut seen = HashSet::new();
        for id in &ids {
            if !seen.insert(*id) {
                return Err(ExecutorError::execution_failed(format!(
                    "Operator id {} appears twice in query {}",
                    id,
                    ctx.sql_id()
                )));
            }
        }
        root.set_root(true);
        let optimizer = TreeOptimizer::new(ctx.config().max_tree_operators);
        Ok(Self {
            root,
            ctx,
            optimizer,
            started: false,
            pending_advance: false,
        })
    }

    pub fn root(&self) -> &ProjectionExecutor {
        &self.root
    }

    pub fn tuple_layout(&self) -> &TupleLayout {
        self.root.tuple_layout()
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    pub fn metrics(&self) -> &std::sync::Arc<ExecMetrics> {
        self.ctx.metrics()
    }

    /// Tuples handed to the client so far
    pub fn delivered(&self) -> u64 {
        self.root.delivered()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Starts a fresh run; any checkpoints of an earlier run are invalidated.
    pub fn begin(&mut self) -> ExecutorResult<()> {
        self.ctx.start_writer(true)?;
        self.root.begin(&mut self.ctx)?;
        self.started = true;
        self.pending_advance = false;
        debug!(sql_id = self.ctx.sql_id(), "query begun");
        Ok(())
    }

    /// Next output tuple, or `None` once the tree is exhausted.
    pub fn next_tuple(&mut self) -> ExecutorResult<Option<Tuple>> {
        if !self.started {
            return Err(ExecutorError::execution_failed(format!(
                "Query {} pulled before begin or resume",
                self.ctx.sql_id()
            )));
        }
        if self.pending_advance {
            self.pending_advance = false;
            if !self.root.at_end() {
                self.root.advance(&mut self.ctx)?;
            }
        }
        if self.root.at_end() {
            return Ok(None);
        }
        self.run_strategy()?;
        let tuple = self.root.emit(&mut self.ctx)?;
        self.pending_advance = true;
        Ok(Some(tuple))
    }

    /// Pulls every remaining tuple.
    pub fn drain(&mut self) -> ExecutorResult<Vec<Tuple>> {
        let mut out = Vec::new();
        while let Some(tuple) = self.next_tuple()? {
            out.push(tuple);
        }
        Ok(out)
    }

    /// Restores the tree from the checkpoints of its query.
    ///
    /// Without a usable root record the tree is begun from scratch. With
    /// `compact_on_resume` the store is rewritten to the records the
    /// restored state was built from; otherwise it is invalidated and every
    /// operator re-checkpoints its full state.
    pub fn resume(&mut self) -> ExecutorResult<ResumeReport> {
        if self.started {
            return Err(ExecutorError::execution_failed(format!(
                "Query {} resumed after it started",
                self.ctx.sql_id()
            )));
        }
        let sql_id = self.ctx.sql_id();
        let store = self.ctx.require_store()?;
        let catalog = CheckpointCatalog::read(store.as_ref(), sql_id)?;
        let root_entry = catalog
            .latest_for(self.root.operator_id(), None, None)
            .map(|e| e.state.produced());

        let Some(produced) = root_entry else {
            info!(sql_id, blocks = catalog.len(), "no root checkpoint, starting fresh");
            self.begin()?;
            return Ok(ResumeReport::default());
        };

        let mut resume = ResumeContext::new(catalog, std::sync::Arc::clone(self.ctx.metrics()));
        self.ctx.suspend_checkpoints(true);
        let restored = resume.restore_node(&mut self.root, &mut self.ctx, None, Some(produced));
        self.ctx.suspend_checkpoints(false);
        restored?;

        self.pending_advance = self.root.delivered() > self.root.produced();
        self.started = true;

        let compact = self.ctx.config().compact_on_resume;
        if compact {
            resume.compact(store.as_ref(), sql_id)?;
            self.ctx.start_writer(false)?;
        } else {
            self.ctx.start_writer(true)?;
            self.invalidate_all()?;
        }

        self.ctx.metrics().increment_resumes();
        let report = ResumeReport {
            restored: true,
            delivered: self.root.delivered(),
            records_used: resume.records_used(),
            subtree_restarts: resume.subtree_restarts(),
            compacted: compact,
        };
        info!(
            sql_id,
            delivered = report.delivered,
            records_used = report.records_used,
            subtree_restarts = report.subtree_restarts,
            compacted = report.compacted,
            "query resumed"
        );
        Ok(report)
    }

    /// Checkpoints every operator and stops the writer, keeping the records
    /// for a later `resume()`.
    pub fn suspend(&mut self) -> ExecutorResult<()> {
        if self.started {
            self.checkpoint_all()?;
        }
        if let Some(writer) = self.ctx.take_writer() {
            writer.close()?;
        }
        self.started = false;
        info!(sql_id = self.ctx.sql_id(), delivered = self.root.delivered(), "query suspended");
        Ok(())
    }

    /// Ends a completed query and discards its checkpoints.
    pub fn finish(&mut self) -> ExecutorResult<()> {
        self.discard_checkpoints()?;
        debug!(sql_id = self.ctx.sql_id(), delivered = self.root.delivered(), "query finished");
        Ok(())
    }

    /// Abandons the query; queued and persisted checkpoints are discarded.
    pub fn abort(&mut self) -> ExecutorResult<()> {
        self.discard_checkpoints()?;
        warn!(sql_id = self.ctx.sql_id(), delivered = self.root.delivered(), "query aborted");
        Ok(())
    }

    fn discard_checkpoints(&mut self) -> ExecutorResult<()> {
        self.started = false;
        match self.ctx.take_writer() {
            Some(writer) => {
                writer.abort()?;
                writer.close()?;
            }
            None => {
                if let Some(store) = self.ctx.store() {
                    store.write_meta(&CheckpointMeta::empty(self.ctx.sql_id()))?;
                }
            }
        }
        Ok(())
    }

    fn run_strategy(&mut self) -> ExecutorResult<()> {
        if self.ctx.checkpoints_suspended() {
            return Ok(());
        }
        match self.ctx.config().strategy {
            CostStrategy::Reward => Ok(()),
            CostStrategy::TreeWide => {
                if self.ctx.tree_run_due() {
                    self.run_tree_optimizer()
                } else {
                    Ok(())
                }
            }
            CostStrategy::Interval => {
                if self.ctx.tree_run_due() {
                    self.checkpoint_all()
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Cost inputs with the root at index 0.
    fn collect_costs(&self) -> Vec<OperatorCost> {
        let model = self.ctx.model();
        let mut costs = vec![OperatorCost {
            operator_id: self.root.operator_id(),
            parent: None,
            suspend_time: model.suspend_time(self.root.suspend_cost_estimate(model)),
            resume_cost: self.root.resume_cost(),
        }];
        self.root.child().collect_costs(model, Some(0), &mut costs);
        costs
    }

    fn run_tree_optimizer(&mut self) -> ExecutorResult<()> {
        let costs = self.collect_costs();
        self.ctx.metrics().increment_tree_optimizer_runs();

        let Some(plan) = self.optimizer.solve(&costs) else {
            debug!(
                sql_id = self.ctx.sql_id(),
                operators = costs.len(),
                "tree too large to enumerate, evaluating rewards per operator"
            );
            let ctx = &mut self.ctx;
            self.root.child_mut().visit_post_order_mut(&mut |node| {
                node.checkpoint_if_rewarding(ctx)?;
                Ok(())
            })?;
            self.root.checkpoint_if_rewarding(&mut self.ctx)?;
            return Ok(());
        };

        let dumped: HashSet<u32> = plan.dumped().collect();
        debug!(
            sql_id = self.ctx.sql_id(),
            operators = costs.len(),
            dumped = dumped.len(),
            cost = plan.cost,
            "tree plan chosen"
        );
        let ctx = &mut self.ctx;
        self.root.child_mut().visit_post_order_mut(&mut |node| {
            if dumped.contains(&node.operator_id()) {
                node.checkpoint_now(ctx)?;
            }
            Ok(())
        })?;
        if dumped.contains(&self.root.operator_id()) {
            self.root.checkpoint_now(&mut self.ctx)?;
        }
        Ok(())
    }

    /// Checkpoints every operator, children first and the root last.
    fn checkpoint_all(&mut self) -> ExecutorResult<()> {
        let ctx = &mut self.ctx;
        self.root.child_mut().visit_post_order_mut(&mut |node| {
            node.checkpoint_now(ctx)?;
            Ok(())
        })?;
        self.root.checkpoint_now(&mut self.ctx)?;
        Ok(())
    }

    fn invalidate_all(&mut self) -> ExecutorResult<()> {
        self.root.child_mut().visit_post_order_mut(&mut |node| {
            node.invalidate_checkpoints();
            Ok(())
        })?;
        self.root.invalidate_checkpoints();
        Ok(())
    }
}

impl std::fmt::Debug for QueryTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTree")
            .field("root", &self.root.operator_id())
            .field("ctx", &self.ctx)
            .field("started", &self.started)
            .field("pending_advance", &self.pending_advance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
    use crate::config::ExecConfig;
    use crate::executor::{ColType, ColumnRef, IndexScanExecutor, QueryInfo, SortExecutor, Value};
    use crate::storage::{IndexStorage, MemoryIndex, RecordingLockManager};

    fn tree(config: ExecConfig, store: Arc<MemoryCheckpointStore>) -> QueryTree {
        let layout = TupleLayout::new("t", &[("k", ColType::Int), ("v", ColType::Int)]);
        let rows = (1..=6)
            .map(|k| vec![Value::Int(k), Value::Int(10 - k)])
            .collect();
        let index: Arc<dyn IndexStorage> =
            Arc::new(MemoryIndex::new(1, layout, &["k"], rows).unwrap());
        let scan = ExecutorNode::from(IndexScanExecutor::new(1, index, vec![]));
        let sort = SortExecutor::new(2, scan, &ColumnRef::new("t", "v"), false).unwrap();
        let root = ProjectionExecutor::new(3, sort.into(), &[ColumnRef::new("t", "k")]).unwrap();
        let ctx = ExecContext::new(
            QueryInfo::select(9, 1),
            config,
            Arc::new(RecordingLockManager::new()),
        )
        .unwrap()
        .with_store(store);
        QueryTree::new(root, ctx).unwrap()
    }

    fn keys(tree: &QueryTree, tuples: &[Tuple]) -> Vec<Value> {
        let col = tree.tuple_layout().columns()[0].clone();
        tuples.iter().map(|t| t.value(&col).unwrap()).collect()
    }

    #[test]
    fn test_pull_before_begin_fails() {
        let mut tree = tree(ExecConfig::default(), Arc::new(MemoryCheckpointStore::new()));
        assert!(tree.next_tuple().is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let layout = TupleLayout::new("t", &[("k", ColType::Int)]);
        let index: Arc<dyn IndexStorage> =
            Arc::new(MemoryIndex::new(1, layout, &["k"], vec![]).unwrap());
        let scan = ExecutorNode::from(IndexScanExecutor::new(4, index, vec![]));
        let root = ProjectionExecutor::new(4, scan, &[ColumnRef::new("t", "k")]).unwrap();
        let ctx = ExecContext::new(
            QueryInfo::select(9, 1),
            ExecConfig::default(),
            Arc::new(RecordingLockManager::new()),
        )
        .unwrap();
        assert!(QueryTree::new(root, ctx).is_err());
    }

    #[test]
    fn test_drain_in_sorted_order() {
        let mut tree = tree(ExecConfig::default(), Arc::new(MemoryCheckpointStore::new()));
        tree.begin().unwrap();
        let out = tree.drain().unwrap();
        let expected: Vec<Value> = (1..=6).rev().map(Value::Int).collect();
        assert_eq!(keys(&tree, &out), expected);
        assert_eq!(tree.delivered(), 6);
        assert!(tree.next_tuple().unwrap().is_none());
        tree.finish().unwrap();
    }

    #[test]
    fn test_suspend_then_resume_continues() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let config = ExecConfig::default().with_theta(1.0e12);
        let mut first = tree(config.clone(), Arc::clone(&store));
        first.begin().unwrap();
        let head = vec![first.next_tuple().unwrap().unwrap(), first.next_tuple().unwrap().unwrap()];
        first.suspend().unwrap();
        assert!(store.read_meta(9).unwrap().is_some());

        let mut second = tree(config, Arc::clone(&store));
        let report = second.resume().unwrap();
        assert!(report.restored);
        assert_eq!(report.delivered, 2);
        let tail = second.drain().unwrap();

        let mut all = keys(&first, &head);
        all.extend(keys(&second, &tail));
        let expected: Vec<Value> = (1..=6).rev().map(Value::Int).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_resume_without_records_starts_fresh() {
        let mut tree = tree(ExecConfig::default(), Arc::new(MemoryCheckpointStore::new()));
        let report = tree.resume().unwrap();
        assert!(!report.restored);
        assert_eq!(tree.drain().unwrap().len(), 6);
    }

    #[test]
    fn test_interval_strategy_checkpoints_every_operator() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let config = ExecConfig::default()
            .with_strategy(CostStrategy::Interval)
            .with_tree_interval_ms(0);
        let mut tree = tree(config, Arc::clone(&store));
        tree.begin().unwrap();
        tree.next_tuple().unwrap();
        tree.next_tuple().unwrap();
        tree.context().flush_checkpoints().unwrap();
        let catalog = CheckpointCatalog::read(store.as_ref(), 9).unwrap();
        assert!(catalog.entries_for(2).count() >= 1);
        assert!(catalog.entries_for(3).count() >= 1);
        assert_eq!(catalog.entries_for(1).count(), 0);
        assert!(tree.metrics().snapshot().checkpoints_enqueued >= 2);
    }

    #[test]
    fn test_abort_discards_checkpoints() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let config = ExecConfig::default().with_theta(-1.0);
        let mut tree = tree(config, Arc::clone(&store));
        tree.begin().unwrap();
        tree.next_tuple().unwrap();
        tree.abort().unwrap();
        let meta = store.read_meta(9).unwrap().unwrap();
        assert_eq!(meta.checkpoint_count, 0);
    }
}
