//! Observability for query execution
//!
//! Two channels:
//! - `tracing` events emitted by the executor, writer and recovery code
//!   (no subscriber is installed here; embedding applications choose one)
//! - `ExecMetrics`, a set of monotonic counters shared by every component
//!   of one or more queries
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on execution
//! 3. Counters never reset while the registry lives

mod metrics;

pub use metrics::{ExecMetrics, MetricsSnapshot};
