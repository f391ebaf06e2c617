//! # Checkpoint Errors
//!
//! A store or writer failure never corrupts a running query: the operator
//! simply does not record the checkpoint. A corrupt record, however, stops
//! the resume attempt that read it.

use std::io;

use thiserror::Error;

/// Result type for checkpoint store and codec operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Checkpoint errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    // Codec errors
    #[error("Corrupt checkpoint: {0}")]
    Corrupt(String),

    // Store errors
    #[error("Checkpoint store I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Checkpoint store error: {0}")]
    Store(String),

    // Writer errors
    #[error("Checkpoint writer failed: {0}")]
    WriterFailed(String),

    #[error("Checkpoint queue closed")]
    QueueClosed,
}

impl CheckpointError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        CheckpointError::Corrupt(reason.into())
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        CheckpointError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, CheckpointError::Corrupt(_))
    }
}
