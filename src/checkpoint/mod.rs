//! Checkpoint store client
//!
//! Operator state leaves the query thread through a bounded FIFO queue and is
//! flushed by one dedicated writer thread per query to a `CheckpointStore`.
//!
//! # Persisted Layout (per owner)
//!
//! ```text
//! [0 .. 4096)            metadata region (CheckpointMeta + crc32)
//! [4096 .. 4096 + total) operator-state blocks, back to back
//! ```
//!
//! Block boundaries are recovered only by replaying `checkpoint_count` and
//! each block's self-declared payload size.
//!
//! # Flush Algorithm
//!
//! 1. Pop the oldest block from the queue
//! 2. Write it at `4096 + total_bytes`
//! 3. Only after the write succeeds, bump count/total/cost and write metadata
//!
//! Metadata therefore always describes blocks that are durable. A crash
//! between steps 2 and 3 leaves an unreferenced tail that is overwritten by
//! the next flush.

mod catalog;
mod errors;
mod file_store;
mod meta;
mod store;
mod writer;

pub use catalog::{CatalogEntry, CheckpointCatalog};
pub use errors::{CheckpointError, CheckpointResult};
pub use file_store::FileCheckpointStore;
pub use meta::{CheckpointMeta, META_ENCODED_LEN, META_REGION_SIZE};
pub use store::{CheckpointStore, MemoryCheckpointStore};
pub use writer::{CheckpointBlock, CheckpointWriter};
