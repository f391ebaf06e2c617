//! Top-down restore of an operator tree from a checkpoint catalog

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointCatalog, CheckpointMeta, CheckpointStore};
use crate::executor::{fast_forward, Executor, ExecContext, ExecutorError, ExecutorResult, Tuple};
use crate::observability::ExecMetrics;
use crate::state::{BlockJoinState, BucketIncrement, ChildState, SortState, StateBody};

/// Outcome of `QueryTree::resume`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResumeReport {
    /// Whether a root record was found and the tree restored from it
    pub restored: bool,
    /// Tuples the client had already received
    pub delivered: u64,
    /// Distinct records the restored state was built from
    pub records_used: usize,
    /// Subtrees restarted from `begin()` after an incomplete chain
    pub subtree_restarts: u64,
    /// Whether the store was rewritten to the used records
    pub compacted: bool,
}

/// Resume-time view of the catalog.
///
/// Tracks which records the restored state depends on, so the store can be
/// compacted to exactly those records afterwards.
pub struct ResumeContext {
    catalog: CheckpointCatalog,
    used: Vec<u64>,
    metrics: Arc<ExecMetrics>,
    restarts: u64,
}

impl ResumeContext {
    pub fn new(catalog: CheckpointCatalog, metrics: Arc<ExecMetrics>) -> Self {
        Self {
            catalog,
            used: Vec::new(),
            metrics,
            restarts: 0,
        }
    }

    /// Context over an empty catalog
    pub fn empty() -> Self {
        Self::new(CheckpointCatalog::default(), Arc::new(ExecMetrics::new()))
    }

    pub fn catalog(&self) -> &CheckpointCatalog {
        &self.catalog
    }

    /// Distinct records used so far
    pub fn records_used(&self) -> usize {
        self.used_seqs().len()
    }

    pub fn subtree_restarts(&self) -> u64 {
        self.restarts
    }

    fn used_seqs(&self) -> Vec<u64> {
        let mut seqs = self.used.clone();
        seqs.sort_unstable();
        seqs.dedup();
        seqs
    }

    fn mark_used(&mut self, seq: u64) {
        self.used.push(seq);
    }

    /// Restores `node` from its latest record flushed no later than `bound`
    /// and produced no further than `target`, then fast-forwards to `target`.
    ///
    /// A record whose incremental chain is incomplete restarts the subtree
    /// from `begin()`. No record at all also means `begin()`.
    pub fn restore_node<E: Executor + ?Sized>(
        &mut self,
        node: &mut E,
        ctx: &mut ExecContext,
        bound: Option<u64>,
        target: Option<u64>,
    ) -> ExecutorResult<()> {
        let operator_id = node.operator_id();
        let entry = self
            .catalog
            .latest_for(operator_id, bound, target)
            .map(|e| (e.seq, e.state.clone()));

        match entry {
            Some((seq, state)) => {
                let mark = self.used.len();
                self.mark_used(seq);
                match node.load(&state, seq, ctx, self) {
                    Ok(()) => {
                        debug!(operator_id, seq, produced = state.produced(), "operator restored");
                    }
                    Err(e) if e.is_restartable() => {
                        self.used.truncate(mark);
                        self.restarts += 1;
                        self.metrics.increment_subtree_restarts();
                        warn!(
                            operator_id,
                            seq,
                            error = %e,
                            "incomplete checkpoint chain, restarting subtree"
                        );
                        node.begin(ctx)?;
                    }
                    Err(e) => return Err(e),
                }
            }
            None => {
                debug!(operator_id, ?bound, ?target, "no usable record, restarting operator");
                node.begin(ctx)?;
            }
        }

        if let Some(target) = target {
            fast_forward(node, target, ctx)?;
        }
        Ok(())
    }

    /// Restores one child as referenced by its parent's record `seq`.
    pub fn restore_child<E: Executor + ?Sized>(
        &mut self,
        child: &mut E,
        state: &ChildState,
        seq: u64,
        ctx: &mut ExecContext,
    ) -> ExecutorResult<()> {
        match state {
            ChildState::Absent => Ok(()),
            ChildState::Embedded(child_state) => child.load(child_state, seq, ctx, self),
            ChildState::Position(position) => {
                self.restore_node(child, ctx, Some(seq), Some(*position))
            }
        }
    }

    /// Rebuilds the block of record `seq` from it and the operator's earlier
    /// records of the same block.
    pub fn block_chain(
        &mut self,
        operator_id: u32,
        seq: u64,
        state: &BlockJoinState,
    ) -> ExecutorResult<Vec<Tuple>> {
        if state.delta_start as usize + state.delta.len() != state.block_len as usize {
            return Err(ExecutorError::corrupt_checkpoint(format!(
                "Block join {} delta {}+{} does not end at block length {}",
                operator_id,
                state.delta_start,
                state.delta.len(),
                state.block_len
            )));
        }

        let earlier: Vec<(u64, BlockJoinState)> = self
            .catalog
            .entries_for(operator_id)
            .filter(|e| e.seq < seq)
            .filter_map(|e| match &e.state.body {
                StateBody::BlockJoin(s) => Some((e.seq, s.clone())),
                _ => None,
            })
            .collect();

        let mut pieces = vec![state.delta.clone()];
        let mut start = state.delta_start as usize;
        let mut links = Vec::new();
        for (prev_seq, prev) in earlier.into_iter().rev() {
            if start == 0 {
                break;
            }
            if prev.block_id != state.block_id
                || prev.delta_start as usize + prev.delta.len() != start
            {
                return Err(ExecutorError::incomplete_state(
                    operator_id,
                    format!(
                        "block {} rows before {} missing at record {}",
                        state.block_id, start, prev_seq
                    ),
                ));
            }
            links.push(prev_seq);
            start = prev.delta_start as usize;
            pieces.push(prev.delta);
        }
        if start != 0 {
            return Err(ExecutorError::incomplete_state(
                operator_id,
                format!("block {} has no record starting at row 0", state.block_id),
            ));
        }

        let block: Vec<Tuple> = pieces.into_iter().rev().flatten().collect();
        if block.len() != state.block_len as usize {
            return Err(ExecutorError::incomplete_state(
                operator_id,
                format!(
                    "block {} rebuilt with {} rows, record expects {}",
                    state.block_id,
                    block.len(),
                    state.block_len
                ),
            ));
        }
        for link in links {
            self.mark_used(link);
        }
        Ok(block)
    }

    /// Every bucket increment of the operator up to and including `seq`, in
    /// flush order.
    pub fn bucket_chain(
        &mut self,
        operator_id: u32,
        seq: u64,
    ) -> ExecutorResult<Vec<BucketIncrement>> {
        let mut increments = Vec::new();
        let mut links = Vec::new();
        for entry in self.catalog.entries_for(operator_id).filter(|e| e.seq <= seq) {
            let StateBody::HashJoin(s) = &entry.state.body else {
                return Err(ExecutorError::corrupt_checkpoint(format!(
                    "Record {} of hash join {} has kind {}",
                    entry.seq,
                    operator_id,
                    entry.state.kind()
                )));
            };
            increments.extend(s.increments.iter().cloned());
            links.push(entry.seq);
        }
        for link in links {
            self.mark_used(link);
        }
        Ok(increments)
    }

    /// Rebuilds the sort buffer of record `seq` and finds the permutation, if
    /// one was persisted.
    pub fn sort_chain(
        &mut self,
        operator_id: u32,
        seq: u64,
        state: &SortState,
    ) -> ExecutorResult<(Vec<Tuple>, Option<Vec<u32>>)> {
        let earlier: Vec<(u64, SortState)> = self
            .catalog
            .entries_for(operator_id)
            .filter(|e| e.seq < seq)
            .filter_map(|e| match &e.state.body {
                StateBody::Sort(s) => Some((e.seq, s.clone())),
                _ => None,
            })
            .collect();

        let mut pieces = vec![state.tuples.clone()];
        let mut permutation = state.permutation.clone();
        let mut expected = state.base_count as usize;
        let mut links = Vec::new();
        for (prev_seq, prev) in earlier.into_iter().rev() {
            if expected == 0 {
                break;
            }
            if prev.base_count as usize + prev.tuples.len() != expected {
                return Err(ExecutorError::incomplete_state(
                    operator_id,
                    format!(
                        "sort tuples before {} missing at record {}",
                        expected, prev_seq
                    ),
                ));
            }
            links.push(prev_seq);
            if permutation.is_none() {
                permutation = prev.permutation;
            }
            expected = prev.base_count as usize;
            if !prev.tuples.is_empty() {
                pieces.push(prev.tuples);
            }
        }
        if expected != 0 {
            return Err(ExecutorError::incomplete_state(
                operator_id,
                "no record starts the sort buffer",
            ));
        }

        for link in links {
            self.mark_used(link);
        }
        let tuples: Vec<Tuple> = pieces.into_iter().rev().flatten().collect();
        Ok((tuples, permutation))
    }

    /// Rewrites the owner's store to hold only the used records, in flush
    /// order. Returns the number of records kept.
    pub fn compact(&self, store: &dyn CheckpointStore, owner_id: u32) -> ExecutorResult<usize> {
        // Invalidate first so a crash mid-rewrite leaves no stale metadata
        store.write_meta(&CheckpointMeta::empty(owner_id))?;

        let mut meta = CheckpointMeta::empty(owner_id);
        let seqs = self.used_seqs();
        for seq in &seqs {
            let entry = self.catalog.get(*seq).ok_or_else(|| {
                ExecutorError::corrupt_checkpoint(format!("Used record {} not in catalog", seq))
            })?;
            store.write_block(owner_id, meta.next_offset(), &entry.bytes)?;
            meta.record_flush(entry.bytes.len(), 0.0);
        }
        store.write_meta(&meta)?;

        info!(
            owner_id,
            kept = seqs.len(),
            dropped = self.catalog.len() - seqs.len(),
            total_bytes = meta.total_bytes,
            "checkpoint store compacted"
        );
        Ok(seqs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::executor::{ColType, TupleLayout, Value};
    use crate::state::OperatorState;

    fn tuple(v: i32) -> Tuple {
        let layout = TupleLayout::new("t", &[("k", ColType::Int)]);
        Tuple::from_values(&layout, &[Value::Int(v)]).unwrap()
    }

    fn block(block_id: u64, block_len: u32, delta_start: u32, delta: &[i32]) -> OperatorState {
        OperatorState::new(
            7,
            2,
            true,
            StateBody::BlockJoin(BlockJoinState {
                block_id,
                block_len,
                delta_start,
                delta: delta.iter().map(|v| tuple(*v)).collect(),
                block_cursor: 0,
                searching: false,
                left_exhausted: false,
                finished: false,
                produced: 0,
                left_consumed: u64::from(block_len),
                left: ChildState::Absent,
                right: ChildState::Absent,
            }),
        )
    }

    fn sort(base: u32, tuples: &[i32], perm: Option<Vec<u32>>) -> OperatorState {
        OperatorState::new(
            7,
            3,
            true,
            StateBody::Sort(SortState {
                base_count: base,
                tuples: tuples.iter().map(|v| tuple(*v)).collect(),
                materialized: perm.is_some(),
                permutation: perm,
                output_pos: 0,
                produced: 0,
                child_consumed: 0,
                child: ChildState::Absent,
            }),
        )
    }

    fn catalog(states: &[OperatorState]) -> (MemoryCheckpointStore, CheckpointCatalog) {
        let store = MemoryCheckpointStore::new();
        let mut meta = CheckpointMeta::empty(7);
        for state in states {
            let bytes = state.encode();
            store.write_block(7, meta.next_offset(), &bytes).unwrap();
            meta.record_flush(bytes.len(), 1.0);
        }
        store.write_meta(&meta).unwrap();
        let catalog = CheckpointCatalog::read(&store, 7).unwrap();
        (store, catalog)
    }

    fn block_body(state: &OperatorState) -> &BlockJoinState {
        match &state.body {
            StateBody::BlockJoin(s) => s,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_block_chain_follows_same_block() {
        let states = vec![block(1, 2, 0, &[1, 2]), block(2, 2, 0, &[3, 4]), block(2, 2, 2, &[])];
        let (_, catalog) = catalog(&states);
        let mut resume = ResumeContext::new(catalog, Arc::new(ExecMetrics::new()));
        let rows = resume.block_chain(2, 2, block_body(&states[2])).unwrap();
        assert_eq!(rows, vec![tuple(3), tuple(4)]);
        assert_eq!(resume.records_used(), 1);
    }

    #[test]
    fn test_block_chain_gap_is_incomplete() {
        let states = vec![block(1, 2, 0, &[1, 2]), block(2, 2, 2, &[])];
        let (_, catalog) = catalog(&states);
        let mut resume = ResumeContext::new(catalog, Arc::new(ExecMetrics::new()));
        let err = resume.block_chain(2, 1, block_body(&states[1])).unwrap_err();
        assert!(err.is_restartable());
        assert_eq!(resume.records_used(), 0);
    }

    #[test]
    fn test_block_chain_misaligned_link_is_restartable() {
        let states = vec![block(2, 3, 0, &[1]), block(2, 3, 2, &[3])];
        let (_, catalog) = catalog(&states);
        let mut resume = ResumeContext::new(catalog, Arc::new(ExecMetrics::new()));
        let err = resume.block_chain(2, 1, block_body(&states[1])).unwrap_err();
        assert!(err.is_restartable());
        assert!(!err.is_fatal());
        assert_eq!(resume.records_used(), 0);
    }

    #[test]
    fn test_sort_chain_collects_tuples_and_permutation() {
        let states = vec![
            sort(0, &[5, 3], None),
            sort(2, &[4], Some(vec![1, 2, 0])),
            sort(3, &[], None),
        ];
        let (_, catalog) = catalog(&states);
        let mut resume = ResumeContext::new(catalog, Arc::new(ExecMetrics::new()));
        let body = match &states[2].body {
            StateBody::Sort(s) => s.clone(),
            other => panic!("unexpected {:?}", other),
        };
        let (tuples, perm) = resume.sort_chain(3, 2, &body).unwrap();
        assert_eq!(tuples, vec![tuple(5), tuple(3), tuple(4)]);
        assert_eq!(perm, Some(vec![1, 2, 0]));
    }

    #[test]
    fn test_compaction_keeps_used_records_in_order() {
        let states = vec![block(1, 2, 0, &[1, 2]), block(2, 2, 0, &[3, 4]), block(2, 2, 2, &[])];
        let (store, catalog) = catalog(&states);
        let mut resume = ResumeContext::new(catalog, Arc::new(ExecMetrics::new()));
        resume.mark_used(2);
        resume.block_chain(2, 2, block_body(&states[2])).unwrap();

        assert_eq!(resume.compact(&store, 7).unwrap(), 2);
        let compacted = CheckpointCatalog::read(&store, 7).unwrap();
        assert_eq!(compacted.len(), 2);
        assert_eq!(compacted.entries()[0].state, states[1]);
        assert_eq!(compacted.entries()[1].state, states[2]);
    }
}
