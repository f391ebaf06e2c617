//! Checkpoint Store Tests
//!
//! Covers:
//! - File-backed store survives a process boundary (suspend, reopen, resume)
//! - Metadata only ever describes durable blocks
//! - A failing store never fails the query
//! - Checkpoint-free mode counts decisions without writing

use std::sync::Arc;

use resumedb::checkpoint::{
    CheckpointCatalog, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
use resumedb::config::ExecConfig;
use resumedb::executor::{
    ColType, ColumnRef, ExecContext, ExecutorNode, IndexScanExecutor, ProjectionExecutor,
    QueryInfo, QueryTree, SortExecutor, Tuple, TupleLayout, Value,
};
use resumedb::storage::{IndexStorage, MemoryIndex, RecordingLockManager};
use tempfile::TempDir;

const SQL_ID: u32 = 41;

// =============================================================================
// Test Utilities
// =============================================================================

/// `SELECT id FROM t ORDER BY v` over 20 rows.
fn build(config: ExecConfig, store: Arc<dyn CheckpointStore>) -> QueryTree {
    let layout = TupleLayout::new("t", &[("id", ColType::Int), ("v", ColType::Int)]);
    let rows = (0..20)
        .map(|id| vec![Value::Int(id), Value::Int((id * 7) % 11)])
        .collect();
    let index: Arc<dyn IndexStorage> =
        Arc::new(MemoryIndex::new(1, layout, &["id"], rows).unwrap());
    let scan = ExecutorNode::from(IndexScanExecutor::new(3, index, vec![]));
    let sort = SortExecutor::new(2, scan, &ColumnRef::new("t", "v"), false).unwrap();
    let root = ProjectionExecutor::new(1, sort.into(), &[ColumnRef::new("t", "id")]).unwrap();
    let ctx = ExecContext::new(
        QueryInfo::select(SQL_ID, 1),
        config,
        Arc::new(RecordingLockManager::new()),
    )
    .unwrap()
    .with_store(store);
    QueryTree::new(root, ctx).unwrap()
}

fn ids(tree: &QueryTree, tuples: &[Tuple]) -> Vec<Value> {
    let col = tree.tuple_layout().columns()[0].clone();
    tuples.iter().map(|t| t.value(&col).unwrap()).collect()
}

fn uninterrupted() -> Vec<Value> {
    let mut tree = build(ExecConfig::default(), Arc::new(MemoryCheckpointStore::new()));
    tree.begin().unwrap();
    let out = tree.drain().unwrap();
    ids(&tree, &out)
}

// =============================================================================
// File-Backed Store
// =============================================================================

#[test]
fn test_suspend_and_resume_across_store_handles() {
    let dir = TempDir::new().unwrap();
    let config = ExecConfig::default().with_theta(1.0e12);

    let mut first = build(
        config.clone(),
        Arc::new(FileCheckpointStore::open(dir.path()).unwrap()),
    );
    first.begin().unwrap();
    let mut head = Vec::new();
    for _ in 0..7 {
        head.push(first.next_tuple().unwrap().unwrap());
    }
    let mut out = ids(&first, &head);
    first.suspend().unwrap();
    drop(first);

    let reopened = Arc::new(FileCheckpointStore::open(dir.path()).unwrap());
    let mut second = build(config, reopened);
    let report = second.resume().unwrap();
    assert!(report.restored);
    assert_eq!(report.delivered, 7);
    let tail = second.drain().unwrap();
    out.extend(ids(&second, &tail));

    assert_eq!(out, uninterrupted());
}

#[test]
fn test_metadata_matches_durable_blocks() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::open(dir.path()).unwrap());
    let mut tree = build(ExecConfig::default().with_theta(-1.0), store.clone());
    tree.begin().unwrap();
    tree.drain().unwrap();
    tree.context().flush_checkpoints().unwrap();

    let meta = store.read_meta(SQL_ID).unwrap().unwrap();
    let catalog = CheckpointCatalog::read(store.as_ref(), SQL_ID).unwrap();
    assert_eq!(catalog.len(), meta.checkpoint_count as usize);
    let bytes: usize = catalog.entries().iter().map(|e| e.bytes.len()).sum();
    assert_eq!(bytes as u64, meta.total_bytes);
    assert_eq!(
        tree.metrics().snapshot().checkpoints_flushed,
        u64::from(meta.checkpoint_count)
    );
}

// =============================================================================
// Failure Handling
// =============================================================================

#[test]
fn test_failing_store_does_not_fail_query() {
    let store = Arc::new(MemoryCheckpointStore::new());
    store.fail_block_writes_after(3);
    let mut tree = build(ExecConfig::default().with_theta(-1.0), store.clone());
    tree.begin().unwrap();
    let out = tree.drain().unwrap();
    assert_eq!(ids(&tree, &out), uninterrupted());
    assert!(tree.context().flush_checkpoints().is_err());

    let meta = store.read_meta(SQL_ID).unwrap().unwrap();
    assert_eq!(meta.checkpoint_count, 3);
    assert!(tree.metrics().snapshot().checkpoint_failures >= 1);
}

#[test]
fn test_checkpoint_free_mode_writes_nothing() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let config = ExecConfig::default()
        .with_theta(-1.0)
        .with_write_checkpoints(false);
    let mut tree = build(config, store.clone());
    tree.begin().unwrap();
    assert_eq!(tree.drain().unwrap().len(), 20);

    let snapshot = tree.metrics().snapshot();
    assert!(snapshot.rewards_accepted > 0);
    assert_eq!(snapshot.checkpoints_enqueued, 0);
    assert!(snapshot.checkpoints_skipped > 0);
    assert_eq!(store.block_writes(), 0);
    assert!(store.read_meta(SQL_ID).unwrap().is_none());
}
