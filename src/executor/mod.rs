//! Query executor
//!
//! Pull-based operator trees whose state can be checkpointed and restored.
//!
//! # Execution Flow
//!
//! 1. The root projection pulls from its child through `Executor`
//! 2. Index scans derive a key range, lock what they read and filter rows
//! 3. Joins and sorts buffer child tuples and persist them incrementally
//! 4. The cost model decides after each step whether a checkpoint pays off
//! 5. Checkpoints leave through the per-query writer thread
//!
//! # Invariants
//!
//! - `load()` reproduces `begin()` plus `produced` calls to `advance()`
//! - A checkpoint is taken only when the operator state changed
//! - Lock and corruption errors surface to the caller, never retried here

mod block_join;
mod condition;
mod context;
mod errors;
mod hash_join;
mod index_scan;
mod node;
mod projection;
mod protocol;
mod range;
mod sort;
mod tree;
mod tuple;

pub use block_join::BlockNestedLoopJoinExecutor;
pub use condition::{eval_all, CompOp, Condition, Operand};
pub use context::{ExecContext, IsolationLevel, QueryInfo, QueryKind};
pub use errors::{ExecutorError, ExecutorErrorCode, ExecutorResult, Severity};
pub use hash_join::HashJoinExecutor;
pub use index_scan::IndexScanExecutor;
pub use node::ExecutorNode;
pub use projection::ProjectionExecutor;
pub use protocol::{fast_forward, CheckpointTracker, Executor};
pub use range::{derive_key_range, KeyBound, KeyRange, RangeShape};
pub use sort::SortExecutor;
pub use tree::QueryTree;
pub use tuple::{
    compare_keys, ColMeta, ColType, ColumnRef, Rid, TableId, Tuple, TupleHeader, TupleLayout, Value,
};
