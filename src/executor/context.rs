//! Per-query execution context
//!
//! Threaded through every operator call. Owns the query's checkpoint writer
//! and everything operators need besides their children: query identity,
//! configuration, reward model, lock manager, metrics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::errors::{ExecutorError, ExecutorResult};
use crate::checkpoint::{CheckpointBlock, CheckpointStore, CheckpointWriter};
use crate::config::ExecConfig;
use crate::cost::RewardModel;
use crate::observability::ExecMetrics;
use crate::state::OperatorState;
use crate::storage::{LockManager, LockMode};

/// Statement type; selects lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Update,
    Delete,
}

impl QueryKind {
    /// Mode of row locks on qualifying rows
    pub fn row_lock_mode(self) -> LockMode {
        match self {
            QueryKind::Select => LockMode::Shared,
            QueryKind::Update | QueryKind::Delete => LockMode::Exclusive,
        }
    }

    /// Intention mode taken on the table at scan start
    pub fn table_lock_mode(self) -> LockMode {
        match self {
            QueryKind::Select => LockMode::IntentionShared,
            QueryKind::Update | QueryKind::Delete => LockMode::IntentionExclusive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Scans at this level take no locks at all
    pub fn is_lock_free(self) -> bool {
        self == IsolationLevel::ReadUncommitted
    }
}

/// Identity of the running statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryInfo {
    pub sql_id: u32,
    pub txn_id: u64,
    pub kind: QueryKind,
    pub isolation: IsolationLevel,
}

impl QueryInfo {
    /// A repeatable-read select
    pub fn select(sql_id: u32, txn_id: u64) -> Self {
        Self {
            sql_id,
            txn_id,
            kind: QueryKind::Select,
            isolation: IsolationLevel::RepeatableRead,
        }
    }

    pub fn with_kind(mut self, kind: QueryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }
}

pub struct ExecContext {
    query: QueryInfo,
    config: ExecConfig,
    model: RewardModel,
    locks: Arc<dyn LockManager>,
    store: Option<Arc<dyn CheckpointStore>>,
    writer: Option<CheckpointWriter>,
    metrics: Arc<ExecMetrics>,
    suspended: bool,
    writer_failed: bool,
    last_tree_run: Instant,
}

impl ExecContext {
    /// Creates a context without a checkpoint store; validates `config`.
    pub fn new(
        query: QueryInfo,
        config: ExecConfig,
        locks: Arc<dyn LockManager>,
    ) -> ExecutorResult<Self> {
        config.validate()?;
        Ok(Self {
            query,
            model: RewardModel::from_config(&config),
            config,
            locks,
            store: None,
            writer: None,
            metrics: Arc::new(ExecMetrics::new()),
            suspended: false,
            writer_failed: false,
            last_tree_run: Instant::now(),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ExecMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn query(&self) -> &QueryInfo {
        &self.query
    }

    pub fn sql_id(&self) -> u32 {
        self.query.sql_id
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn model(&self) -> &RewardModel {
        &self.model
    }

    pub fn locks(&self) -> &dyn LockManager {
        self.locks.as_ref()
    }

    pub fn metrics(&self) -> &Arc<ExecMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> Option<&Arc<dyn CheckpointStore>> {
        self.store.as_ref()
    }

    pub fn checkpoints_suspended(&self) -> bool {
        self.suspended
    }

    pub(crate) fn suspend_checkpoints(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    /// Whether operators evaluate their own reward after each step
    pub fn self_evaluates(&self) -> bool {
        !self.suspended && self.config.strategy == crate::config::CostStrategy::Reward
    }

    /// Starts the writer thread; `fresh` invalidates existing checkpoints.
    pub(crate) fn start_writer(&mut self, fresh: bool) -> ExecutorResult<()> {
        if self.writer.is_some() || !self.config.write_checkpoints {
            return Ok(());
        }
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        let writer = CheckpointWriter::spawn(
            store,
            self.query.sql_id,
            self.config.queue_capacity_bytes,
            fresh,
            Arc::clone(&self.metrics),
        )?;
        self.writer = Some(writer);
        self.writer_failed = false;
        Ok(())
    }

    pub(crate) fn take_writer(&mut self) -> Option<CheckpointWriter> {
        self.writer.take()
    }

    /// Blocks until every enqueued checkpoint is durable.
    pub fn flush_checkpoints(&self) -> ExecutorResult<()> {
        match &self.writer {
            Some(writer) => Ok(writer.wait_idle()?),
            None => Ok(()),
        }
    }

    /// Evaluates the reward of one candidate checkpoint.
    pub fn evaluate(&self, rc_micros: f64, src_bytes: u64) -> bool {
        self.metrics.increment_rewards_evaluated();
        let accepted = self.model.should_checkpoint(rc_micros, src_bytes);
        if accepted {
            self.metrics.increment_rewards_accepted();
        }
        accepted
    }

    /// Hands a state to the writer.
    ///
    /// Returns whether the operator may treat the state as checkpointed.
    /// A failed writer is reported once and then ignored, so execution
    /// continues without further checkpoints.
    pub fn submit_checkpoint(&mut self, state: &OperatorState, src_bytes: u64) -> ExecutorResult<bool> {
        if self.suspended {
            return Ok(false);
        }
        if !self.config.write_checkpoints {
            self.metrics.increment_checkpoints_skipped();
            debug!(
                sql_id = self.query.sql_id,
                operator_id = state.operator_id(),
                src_bytes,
                "checkpoint accepted without writing"
            );
            return Ok(true);
        }
        if self.writer_failed {
            self.metrics.increment_checkpoints_skipped();
            return Ok(false);
        }
        let Some(writer) = &self.writer else {
            self.metrics.increment_checkpoints_skipped();
            return Ok(false);
        };

        let bytes = state.encode();
        let len = bytes.len();
        let block = CheckpointBlock {
            operator_id: state.operator_id(),
            bytes,
            cost_estimate: self.model.suspend_time(src_bytes),
        };
        match writer.enqueue(block) {
            Ok(()) => {
                self.metrics.increment_checkpoints_enqueued();
                debug!(
                    sql_id = self.query.sql_id,
                    operator_id = state.operator_id(),
                    kind = %state.kind(),
                    bytes = len,
                    "checkpoint enqueued"
                );
                Ok(true)
            }
            Err(e) => {
                warn!(
                    sql_id = self.query.sql_id,
                    operator_id = state.operator_id(),
                    error = %e,
                    "checkpoint writer unavailable, continuing without checkpoints"
                );
                self.writer_failed = true;
                self.metrics.increment_checkpoints_skipped();
                Ok(false)
            }
        }
    }

    /// True once per `tree_interval_ms`; restarts the clock when it fires.
    pub(crate) fn tree_run_due(&mut self) -> bool {
        let interval = Duration::from_millis(self.config.tree_interval_ms);
        if self.last_tree_run.elapsed() >= interval {
            self.last_tree_run = Instant::now();
            true
        } else {
            false
        }
    }

    pub(crate) fn require_store(&self) -> ExecutorResult<Arc<dyn CheckpointStore>> {
        self.store
            .clone()
            .ok_or_else(|| ExecutorError::execution_failed("No checkpoint store configured"))
    }
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("query", &self.query)
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .field("has_writer", &self.writer.is_some())
            .field("suspended", &self.suspended)
            .field("writer_failed", &self.writer_failed)
            .finish()
    }
}
