//! Storage collaborators consumed by the executors
//!
//! The execution core does not own a page store or a lock manager. It talks to
//! them through two narrow interfaces:
//!
//! - `IndexStorage`: ordered access to a clustering index (range cursors,
//!   row fetch by `Rid`)
//! - `LockManager`: table intention locks and row/gap locks
//!
//! In-memory implementations are provided for embedding and tests.

mod index;
mod lock;
mod memory;

pub use index::{IndexCursor, IndexStorage};
pub use lock::{LockError, LockKind, LockManager, LockMode, LockRequest, RecordingLockManager};
pub use memory::MemoryIndex;
