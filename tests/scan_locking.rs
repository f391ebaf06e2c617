//! Index Scan Range and Locking Tests
//!
//! Covers:
//! - Key-range derivation for an equality prefix followed by an inequality
//! - The lock chosen on each range bound for `=`, `>`, `>=`, `<`, `<=`
//! - Shared locks on visited rows that fail the residual filter
//! - One-sided ranges keep rows at the extremes of Int and Float keys

use std::sync::Arc;

use resumedb::config::ExecConfig;
use resumedb::executor::{
    ColType, ColumnRef, CompOp, Condition, ExecContext, Executor, IndexScanExecutor,
    IsolationLevel, QueryInfo, QueryKind, Rid, TupleLayout, Value,
};
use resumedb::storage::{IndexStorage, LockKind, LockMode, LockRequest, MemoryIndex, RecordingLockManager};

// =============================================================================
// Test Utilities
// =============================================================================

fn three_row_index() -> Arc<dyn IndexStorage> {
    let layout = TupleLayout::new("t", &[("k", ColType::Int)]);
    let rows = vec![
        vec![Value::Int(10)],
        vec![Value::Int(20)],
        vec![Value::Int(30)],
    ];
    Arc::new(MemoryIndex::new(1, layout, &["k"], rows).unwrap())
}

fn context(locks: &Arc<RecordingLockManager>, query: QueryInfo) -> ExecContext {
    ExecContext::new(query, ExecConfig::default(), locks.clone()).unwrap()
}

fn key(value: i32) -> Condition {
    key_op(CompOp::Eq, value)
}

fn key_op(op: CompOp, value: i32) -> Condition {
    Condition::literal(ColumnRef::new("t", "k"), op, Value::Int(value))
}

/// Runs a select over the three-row index, returning output keys and locks.
fn scan(op: CompOp, probe: i32) -> (Vec<i32>, Arc<RecordingLockManager>) {
    let locks = Arc::new(RecordingLockManager::new());
    let mut ctx = context(&locks, QueryInfo::select(1, 7));
    let index = three_row_index();
    let col = index.layout().columns()[0].clone();
    let mut scan = IndexScanExecutor::new(1, index, vec![key_op(op, probe)]);

    scan.begin(&mut ctx).unwrap();
    let mut keys = Vec::new();
    while !scan.at_end() {
        match scan.current().unwrap().value(&col).unwrap() {
            Value::Int(k) => keys.push(k),
            other => panic!("unexpected value {:?}", other),
        }
        scan.advance(&mut ctx).unwrap();
    }
    (keys, locks)
}

fn rid(slot: u32) -> Rid {
    Rid::new(0, slot)
}

fn row_lock_count(locks: &RecordingLockManager) -> usize {
    locks
        .requests()
        .iter()
        .filter(|r| matches!(r, LockRequest::Row { .. }))
        .count()
}

// =============================================================================
// Range Derivation
// =============================================================================

#[test]
fn test_equality_prefix_then_inequality() {
    let layout = TupleLayout::new("t", &[("c1", ColType::Int), ("c2", ColType::Int)]);
    let rows = vec![
        vec![Value::Int(5), Value::Int(3)],
        vec![Value::Int(5), Value::Int(4)],
        vec![Value::Int(6), Value::Int(1)],
    ];
    let index: Arc<dyn IndexStorage> =
        Arc::new(MemoryIndex::new(1, layout, &["c1", "c2"], rows).unwrap());
    let conditions = vec![
        Condition::literal(ColumnRef::new("t", "c1"), CompOp::Eq, Value::Int(5)),
        Condition::literal(ColumnRef::new("t", "c2"), CompOp::Gt, Value::Int(3)),
    ];
    let mut scan = IndexScanExecutor::new(1, index.clone(), conditions);

    let range = scan.key_range().clone();
    assert_eq!(range.lower.key, vec![Value::Int(5), Value::Int(3)]);
    assert!(!range.lower.inclusive);
    assert_eq!(range.upper.key, vec![Value::Int(5), Value::Int(i32::MAX)]);
    assert!(range.upper.inclusive);

    let locks = Arc::new(RecordingLockManager::new());
    let mut ctx = context(&locks, QueryInfo::select(1, 7));
    scan.begin(&mut ctx).unwrap();
    let cols = index.layout().columns().to_vec();
    let t = scan.current().unwrap();
    assert_eq!(t.value(&cols[0]).unwrap(), Value::Int(5));
    assert_eq!(t.value(&cols[1]).unwrap(), Value::Int(4));
    scan.advance(&mut ctx).unwrap();
    assert!(scan.at_end());
}

// =============================================================================
// Bound Locks Over {10, 20, 30} With Probe 20
// =============================================================================

#[test]
fn test_equality_existing_key_takes_record_lock() {
    let (keys, locks) = scan(CompOp::Eq, 20);
    assert_eq!(keys, vec![20]);
    assert_eq!(
        locks.row_locks_at(rid(1)),
        vec![(LockKind::RecordNotGap, LockMode::Shared)]
    );
    assert_eq!(row_lock_count(&locks), 1);
    assert_eq!(
        locks.requests()[0],
        LockRequest::Table {
            table: 1,
            mode: LockMode::IntentionShared
        }
    );
}

#[test]
fn test_equality_missing_key_takes_gap_lock() {
    let (keys, locks) = scan(CompOp::Eq, 25);
    assert!(keys.is_empty());
    assert_eq!(locks.row_locks_at(rid(2)), vec![(LockKind::Gap, LockMode::Shared)]);
    assert_eq!(row_lock_count(&locks), 1);
}

#[test]
fn test_greater_than_locks_next_key_and_end_gap() {
    let (keys, locks) = scan(CompOp::Gt, 20);
    assert_eq!(keys, vec![30]);
    assert_eq!(
        locks.row_locks_at(rid(2)),
        vec![(LockKind::Ordinary, LockMode::Shared)]
    );
    assert_eq!(locks.row_locks_at(rid(3)), vec![(LockKind::Gap, LockMode::Shared)]);
    assert!(locks.row_locks_at(rid(1)).is_empty());
}

#[test]
fn test_greater_or_equal_locks_probe_row() {
    let (keys, locks) = scan(CompOp::Ge, 20);
    assert_eq!(keys, vec![20, 30]);
    assert_eq!(
        locks.row_locks_at(rid(1)),
        vec![(LockKind::Ordinary, LockMode::Shared)]
    );
    assert_eq!(
        locks.row_locks_at(rid(2)),
        vec![(LockKind::Ordinary, LockMode::Shared)]
    );
    assert_eq!(locks.row_locks_at(rid(3)), vec![(LockKind::Gap, LockMode::Shared)]);
    assert!(locks.row_locks_at(rid(0)).is_empty());
}

#[test]
fn test_less_than_locks_upper_bound_row() {
    let (keys, locks) = scan(CompOp::Lt, 20);
    assert_eq!(keys, vec![10]);
    // 20 exists, so the upper bound takes an ordinary lock
    assert_eq!(
        locks.row_locks_at(rid(1)),
        vec![(LockKind::Ordinary, LockMode::Shared)]
    );
    assert_eq!(
        locks.row_locks_at(rid(0)),
        vec![(LockKind::Ordinary, LockMode::Shared)]
    );
}

#[test]
fn test_less_or_equal_locks_row_after_probe() {
    let (keys, locks) = scan(CompOp::Le, 20);
    assert_eq!(keys, vec![10, 20]);
    assert_eq!(
        locks.row_locks_at(rid(2)),
        vec![(LockKind::Ordinary, LockMode::Shared)]
    );
    assert_eq!(row_lock_count(&locks), 3);
}

#[test]
fn test_less_than_missing_probe_takes_gap_lock() {
    let (keys, locks) = scan(CompOp::Lt, 25);
    assert_eq!(keys, vec![10, 20]);
    assert_eq!(locks.row_locks_at(rid(2)), vec![(LockKind::Gap, LockMode::Shared)]);
}

// =============================================================================
// Residual Filter Locks
// =============================================================================

#[test]
fn test_rejected_rows_locked_shared_in_delete() {
    let locks = Arc::new(RecordingLockManager::new());
    let query = QueryInfo::select(1, 7).with_kind(QueryKind::Delete);
    let mut ctx = context(&locks, query);
    let conditions = vec![key_op(CompOp::Ge, 10), key_op(CompOp::Ne, 20)];
    let mut scan = IndexScanExecutor::new(1, three_row_index(), conditions);

    scan.begin(&mut ctx).unwrap();
    scan.advance(&mut ctx).unwrap();
    scan.advance(&mut ctx).unwrap();
    assert!(scan.at_end());

    assert_eq!(
        locks.row_locks_at(rid(0)),
        vec![(LockKind::Ordinary, LockMode::Exclusive)]
    );
    assert_eq!(
        locks.row_locks_at(rid(1)),
        vec![(LockKind::Ordinary, LockMode::Shared)]
    );
    assert_eq!(
        locks.row_locks_at(rid(2)),
        vec![(LockKind::Ordinary, LockMode::Exclusive)]
    );
}

#[test]
fn test_read_uncommitted_point_lookup_is_lock_free() {
    let locks = Arc::new(RecordingLockManager::new());
    let query = QueryInfo::select(1, 7).with_isolation(IsolationLevel::ReadUncommitted);
    let mut ctx = context(&locks, query);
    let mut scan = IndexScanExecutor::new(1, three_row_index(), vec![key(30)]);
    scan.begin(&mut ctx).unwrap();
    assert!(!scan.at_end());
    assert!(locks.requests().is_empty());
}

// =============================================================================
// One-Sided Ranges Over Extreme Keys
// =============================================================================

/// Runs a single-condition select over a one-column index of `rows`.
fn scan_values(col_type: ColType, rows: &[Value], op: CompOp, probe: Value) -> Vec<Value> {
    let layout = TupleLayout::new("t", &[("k", col_type)]);
    let rows = rows.iter().map(|v| vec![v.clone()]).collect();
    let index: Arc<dyn IndexStorage> =
        Arc::new(MemoryIndex::new(1, layout, &["k"], rows).unwrap());
    let col = index.layout().columns()[0].clone();
    let condition = Condition::literal(ColumnRef::new("t", "k"), op, probe);
    let mut scan = IndexScanExecutor::new(1, index, vec![condition]);

    let locks = Arc::new(RecordingLockManager::new());
    let mut ctx = context(&locks, QueryInfo::select(1, 7));
    scan.begin(&mut ctx).unwrap();
    let mut out = Vec::new();
    while !scan.at_end() {
        out.push(scan.current().unwrap().value(&col).unwrap());
        scan.advance(&mut ctx).unwrap();
    }
    out
}

fn ints(values: &[i32]) -> Vec<Value> {
    values.iter().map(|v| Value::Int(*v)).collect()
}

fn floats(values: &[f32]) -> Vec<Value> {
    values.iter().map(|v| Value::Float(*v)).collect()
}

#[test]
fn test_int_extremes_inside_one_sided_ranges() {
    let rows = ints(&[i32::MIN, 0, i32::MAX]);
    let run = |op, probe| scan_values(ColType::Int, &rows, op, Value::Int(probe));

    assert_eq!(run(CompOp::Lt, 5), ints(&[i32::MIN, 0]));
    assert_eq!(run(CompOp::Le, 0), ints(&[i32::MIN, 0]));
    assert_eq!(run(CompOp::Gt, -5), ints(&[0, i32::MAX]));
    assert_eq!(run(CompOp::Ge, 0), ints(&[0, i32::MAX]));
    assert_eq!(run(CompOp::Le, i32::MAX), rows);
    assert_eq!(run(CompOp::Ge, i32::MIN), rows);
}

#[test]
fn test_float_infinities_inside_one_sided_ranges() {
    let rows = floats(&[f32::NEG_INFINITY, 1.0, f32::INFINITY]);
    let run = |op, probe| scan_values(ColType::Float, &rows, op, Value::Float(probe));

    assert_eq!(run(CompOp::Lt, 5.0), floats(&[f32::NEG_INFINITY, 1.0]));
    assert_eq!(run(CompOp::Le, 1.0), floats(&[f32::NEG_INFINITY, 1.0]));
    assert_eq!(run(CompOp::Gt, 0.0), floats(&[1.0, f32::INFINITY]));
    assert_eq!(run(CompOp::Ge, 1.0), floats(&[1.0, f32::INFINITY]));
    assert_eq!(run(CompOp::Le, f32::INFINITY), rows);
    assert_eq!(run(CompOp::Ge, f32::NEG_INFINITY), rows);
}

#[test]
fn test_float_extremes_beyond_finite_range() {
    let rows = floats(&[f32::MIN, f32::MAX, f32::INFINITY]);
    let run = |op, probe| scan_values(ColType::Float, &rows, op, Value::Float(probe));

    assert_eq!(run(CompOp::Gt, 0.0), floats(&[f32::MAX, f32::INFINITY]));
    assert_eq!(run(CompOp::Lt, 0.0), floats(&[f32::MIN]));
}
