//! Lock manager collaborator interface

use std::fmt;
use std::sync::Mutex;

use crate::executor::{Rid, TableId};

/// Kind of row lock requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Next-key lock: the row and the gap before it
    Ordinary,
    /// The gap before the row only
    Gap,
    /// The row only
    RecordNotGap,
    InsertIntention,
}

/// Lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
    IntentionShared,
    IntentionExclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockMode::Shared => "S",
            LockMode::Exclusive => "X",
            LockMode::IntentionShared => "IS",
            LockMode::IntentionExclusive => "IX",
        };
        write!(f, "{}", s)
    }
}

/// Lock refusal surfaced to the owning transaction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("txn {txn_id} conflicts on table {table_id} at {rid}")]
    Conflict {
        txn_id: u64,
        table_id: TableId,
        rid: Rid,
    },
    #[error("txn {txn_id} would deadlock")]
    Deadlock { txn_id: u64 },
}

/// Grants table and row locks for a transaction.
///
/// Calls may block until granted; refusals are returned, never retried here.
pub trait LockManager: Send + Sync {
    fn lock_table(&self, txn_id: u64, table: TableId, mode: LockMode) -> Result<(), LockError>;

    fn lock_row(
        &self,
        txn_id: u64,
        table: TableId,
        rid: Rid,
        kind: LockKind,
        mode: LockMode,
    ) -> Result<(), LockError>;
}

/// One granted request, as recorded by `RecordingLockManager`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockRequest {
    Table {
        table: TableId,
        mode: LockMode,
    },
    Row {
        table: TableId,
        rid: Rid,
        kind: LockKind,
        mode: LockMode,
    },
}

/// Lock manager that grants everything and remembers what it granted.
///
/// A single row can be configured to refuse, to exercise the error paths.
#[derive(Debug, Default)]
pub struct RecordingLockManager {
    requests: Mutex<Vec<LockRequest>>,
    refuse: Mutex<Option<(Rid, bool)>>,
}

impl RecordingLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses row locks at `rid` with a conflict (or a deadlock).
    pub fn refuse_row(&self, rid: Rid, deadlock: bool) {
        if let Ok(mut refuse) = self.refuse.lock() {
            *refuse = Some((rid, deadlock));
        }
    }

    pub fn requests(&self) -> Vec<LockRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Row locks granted at `rid`, in request order.
    pub fn row_locks_at(&self, rid: Rid) -> Vec<(LockKind, LockMode)> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                LockRequest::Row {
                    rid: at, kind, mode, ..
                } if at == rid => Some((kind, mode)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.clear();
        }
    }

    fn push(&self, request: LockRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
    }
}

impl LockManager for RecordingLockManager {
    fn lock_table(&self, _txn_id: u64, table: TableId, mode: LockMode) -> Result<(), LockError> {
        self.push(LockRequest::Table { table, mode });
        Ok(())
    }

    fn lock_row(
        &self,
        txn_id: u64,
        table: TableId,
        rid: Rid,
        kind: LockKind,
        mode: LockMode,
    ) -> Result<(), LockError> {
        let refused = self.refuse.lock().ok().and_then(|r| *r);
        if let Some((at, deadlock)) = refused {
            if at == rid {
                return Err(if deadlock {
                    LockError::Deadlock { txn_id }
                } else {
                    LockError::Conflict {
                        txn_id,
                        table_id: table,
                        rid,
                    }
                });
            }
        }
        self.push(LockRequest::Row {
            table,
            rid,
            kind,
            mode,
        });
        Ok(())
    }
}
