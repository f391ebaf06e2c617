//! Resume of an operator tree from its checkpoint records
//!
//! # Restore Order (strict)
//!
//! 1. Read metadata and parse every block into the catalog
//! 2. Restore the root from its latest record
//! 3. Each operator restores its children from the records its own record
//!    references, bounded by its own sequence number
//! 4. Incremental state (block rows, hash buckets, sort buffers) is rebuilt
//!    from the operator's earlier records
//! 5. Optionally rewrite the store to the records actually used
//!
//! # Fallback
//!
//! An incomplete incremental chain restarts only the affected subtree from
//! `begin()`. Corruption anywhere aborts the resume.

mod resume;

pub use resume::{ResumeContext, ResumeReport};
