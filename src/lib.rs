//! resumedb - A resumable, checkpointing query-execution core
//!
//! Pull-based operator trees (index scan, block nested loop join, hash join,
//! sort, projection) that persist their state to a remote checkpoint store and
//! can be resumed on the same node after a pause or on another node after a
//! failover.

pub mod checkpoint;
pub mod config;
pub mod cost;
pub mod executor;
pub mod observability;
pub mod recovery;
pub mod state;
pub mod storage;
