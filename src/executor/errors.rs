//! Executor error types
//!
//! Error codes:
//! - RDB_EXECUTION_FAILED (ERROR)
//! - RDB_CORRUPT_CHECKPOINT (FATAL to the resume attempt)
//! - RDB_LOCK_CONFLICT (ERROR, aborts the owning transaction)
//! - RDB_WOULD_DEADLOCK (ERROR, aborts the owning transaction)
//! - RDB_INCOMPLETE_INCREMENTAL_STATE (ERROR, subtree restarts from begin)
//! - RDB_CHECKPOINT_IO (ERROR)
//! - RDB_INVALID_CONFIG (ERROR)

use std::fmt;

use crate::checkpoint::CheckpointError;
use crate::storage::LockError;

/// Severity levels for executor errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation failed, the query may be retried or restarted
    Error,
    /// The current resume attempt must stop
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Executor-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorErrorCode {
    /// General execution failure or protocol misuse
    RdbExecutionFailed,
    /// A checkpoint record could not be fully accounted for
    RdbCorruptCheckpoint,
    /// Row or table lock could not be granted
    RdbLockConflict,
    /// Granting the lock would deadlock
    RdbWouldDeadlock,
    /// An incremental checkpoint chain has a missing link
    RdbIncompleteIncrementalState,
    /// The checkpoint store or writer failed
    RdbCheckpointIo,
    /// Configuration rejected during validation
    RdbInvalidConfig,
}

impl ExecutorErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorErrorCode::RdbExecutionFailed => "RDB_EXECUTION_FAILED",
            ExecutorErrorCode::RdbCorruptCheckpoint => "RDB_CORRUPT_CHECKPOINT",
            ExecutorErrorCode::RdbLockConflict => "RDB_LOCK_CONFLICT",
            ExecutorErrorCode::RdbWouldDeadlock => "RDB_WOULD_DEADLOCK",
            ExecutorErrorCode::RdbIncompleteIncrementalState => {
                "RDB_INCOMPLETE_INCREMENTAL_STATE"
            }
            ExecutorErrorCode::RdbCheckpointIo => "RDB_CHECKPOINT_IO",
            ExecutorErrorCode::RdbInvalidConfig => "RDB_INVALID_CONFIG",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            ExecutorErrorCode::RdbCorruptCheckpoint => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Whether the owning transaction must abort the whole query
    pub fn aborts_transaction(&self) -> bool {
        matches!(
            self,
            ExecutorErrorCode::RdbLockConflict | ExecutorErrorCode::RdbWouldDeadlock
        )
    }
}

impl fmt::Display for ExecutorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Executor error type with full context
#[derive(Debug)]
pub struct ExecutorError {
    /// Error code
    code: ExecutorErrorCode,
    /// Human-readable message
    message: String,
    /// Operator that raised the error, if known
    operator_id: Option<u32>,
}

impl ExecutorError {
    fn new(code: ExecutorErrorCode, message: String, operator_id: Option<u32>) -> Self {
        Self {
            code,
            message,
            operator_id,
        }
    }

    /// Create an execution failed error
    pub fn execution_failed(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::RdbExecutionFailed, reason.into(), None)
    }

    /// Create a corrupt checkpoint error (FATAL to the resume attempt)
    pub fn corrupt_checkpoint(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::RdbCorruptCheckpoint, reason.into(), None)
    }

    /// Create a lock conflict error
    pub fn lock_conflict(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::RdbLockConflict, reason.into(), None)
    }

    /// Create a deadlock error
    pub fn would_deadlock(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::RdbWouldDeadlock, reason.into(), None)
    }

    /// Create an incomplete incremental state error for an operator
    pub fn incomplete_state(operator_id: u32, reason: impl Into<String>) -> Self {
        Self::new(
            ExecutorErrorCode::RdbIncompleteIncrementalState,
            format!("Operator {}: {}", operator_id, reason.into()),
            Some(operator_id),
        )
    }

    /// Create a checkpoint I/O error
    pub fn checkpoint_io(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::RdbCheckpointIo, reason.into(), None)
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::RdbInvalidConfig, reason.into(), None)
    }

    /// Attach the operator that raised this error
    pub fn at_operator(mut self, operator_id: u32) -> Self {
        self.operator_id = Some(operator_id);
        self
    }

    /// Returns the error code
    pub fn code(&self) -> ExecutorErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the operator id if applicable
    pub fn operator_id(&self) -> Option<u32> {
        self.operator_id
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns whether the subtree that raised this can restart from `begin()`
    pub fn is_restartable(&self) -> bool {
        self.code == ExecutorErrorCode::RdbIncompleteIncrementalState
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for ExecutorError {}

impl From<CheckpointError> for ExecutorError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Corrupt(reason) => ExecutorError::corrupt_checkpoint(reason),
            other => ExecutorError::checkpoint_io(other.to_string()),
        }
    }
}

impl From<LockError> for ExecutorError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Conflict { .. } => ExecutorError::lock_conflict(err.to_string()),
            LockError::Deadlock { .. } => ExecutorError::would_deadlock(err.to_string()),
        }
    }
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;
