//! Checkpoint cost model
//!
//! # Reward
//!
//! ```text
//! reward = RC / (SRC / throughput_a + SRC / throughput_b + fixed_cost) - theta
//! ```
//!
//! - `SRC`: bytes needed to persist the operator's un-checkpointed state,
//!   never below the configured floor
//! - `RC`: µs of work lost if the query failed now; time since the last
//!   checkpoint plus the child resume cost memoized at that checkpoint
//!
//! An operator checkpoints iff `reward > 0` and its state changed since its
//! last checkpoint.
//!
//! # Tree-wide optimization
//!
//! `TreeOptimizer` treats each checkpointable operator as a binary choice,
//! dump now or rely on the nearest checkpointable ancestor, and returns the
//! cheapest valid assignment.

mod history;
mod optimizer;
mod reward;

pub use history::{CheckpointHistory, CheckpointInfo};
pub use optimizer::{Choice, OperatorCost, TreeOptimizer, TreePlan};
pub use reward::RewardModel;
