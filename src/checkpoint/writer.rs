//! Bounded FIFO queue drained by a dedicated writer thread
//!
//! # Guarantees
//!
//! - Blocks reach the store in enqueue order
//! - Metadata is written only after the block write returned successfully
//! - A full queue blocks the enqueuing caller until the writer frees space
//! - After a write failure no further blocks are accepted, so the store
//!   always holds a gap-free prefix of what was enqueued
//! - `abort` discards queued blocks and resets the metadata

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::errors::{CheckpointError, CheckpointResult};
use super::meta::CheckpointMeta;
use super::store::CheckpointStore;
use crate::observability::ExecMetrics;

/// One encoded operator state waiting to be flushed.
#[derive(Debug, Clone)]
pub struct CheckpointBlock {
    pub operator_id: u32,
    pub bytes: Vec<u8>,
    /// Suspend cost the cost model charged for this block
    pub cost_estimate: f64,
}

#[derive(Debug)]
struct QueueState {
    blocks: VecDeque<CheckpointBlock>,
    queued_bytes: usize,
    in_flight_bytes: usize,
    in_flight: bool,
    closed: bool,
    failure: Option<String>,
    meta: CheckpointMeta,
    /// Bumped by `abort`; a flush from an older epoch is not accounted
    epoch: u64,
}

impl QueueState {
    fn pending_bytes(&self) -> usize {
        self.queued_bytes + self.in_flight_bytes
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> CheckpointResult<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| CheckpointError::WriterFailed("queue lock poisoned".into()))
    }

    fn wait<'a>(
        &self,
        guard: MutexGuard<'a, QueueState>,
    ) -> CheckpointResult<MutexGuard<'a, QueueState>> {
        self.changed
            .wait(guard)
            .map_err(|_| CheckpointError::WriterFailed("queue lock poisoned".into()))
    }
}

/// Producer handle of a query's checkpoint writer thread.
pub struct CheckpointWriter {
    owner_id: u32,
    capacity_bytes: usize,
    shared: Arc<Shared>,
    store: Arc<dyn CheckpointStore>,
    handle: Option<JoinHandle<()>>,
}

impl CheckpointWriter {
    /// Starts the writer thread for `owner_id`.
    ///
    /// With `fresh` the owner's previous checkpoints are invalidated first;
    /// otherwise new blocks are appended after the existing ones.
    pub fn spawn(
        store: Arc<dyn CheckpointStore>,
        owner_id: u32,
        capacity_bytes: usize,
        fresh: bool,
        metrics: Arc<ExecMetrics>,
    ) -> CheckpointResult<Self> {
        let meta = if fresh {
            let meta = CheckpointMeta::empty(owner_id);
            store.write_meta(&meta)?;
            meta
        } else {
            store
                .read_meta(owner_id)?
                .unwrap_or_else(|| CheckpointMeta::empty(owner_id))
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                blocks: VecDeque::new(),
                queued_bytes: 0,
                in_flight_bytes: 0,
                in_flight: false,
                closed: false,
                failure: None,
                meta,
                epoch: 0,
            }),
            changed: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let thread_store = Arc::clone(&store);
        let handle = thread::Builder::new()
            .name(format!("ckpt-writer-{}", owner_id))
            .spawn(move || run_writer(thread_shared, thread_store, owner_id, metrics))
            .map_err(|e| CheckpointError::WriterFailed(format!("spawn: {}", e)))?;

        Ok(Self {
            owner_id,
            capacity_bytes,
            shared,
            store,
            handle: Some(handle),
        })
    }

    pub fn owner_id(&self) -> u32 {
        self.owner_id
    }

    /// Queues a block, blocking while the queue is full.
    ///
    /// A block larger than the whole capacity is accepted once the queue is
    /// empty.
    pub fn enqueue(&self, block: CheckpointBlock) -> CheckpointResult<()> {
        let len = block.bytes.len();
        let mut state = self.shared.lock()?;
        loop {
            if let Some(failure) = &state.failure {
                return Err(CheckpointError::WriterFailed(failure.clone()));
            }
            if state.closed {
                return Err(CheckpointError::QueueClosed);
            }
            let pending = state.pending_bytes();
            if pending == 0 || pending + len <= self.capacity_bytes {
                break;
            }
            state = self.shared.wait(state)?;
        }
        state.queued_bytes += len;
        state.blocks.push_back(block);
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Blocks until every queued block is flushed.
    pub fn wait_idle(&self) -> CheckpointResult<()> {
        let mut state = self.shared.lock()?;
        while (!state.blocks.is_empty() || state.in_flight) && state.failure.is_none() {
            state = self.shared.wait(state)?;
        }
        match &state.failure {
            Some(failure) => Err(CheckpointError::WriterFailed(failure.clone())),
            None => Ok(()),
        }
    }

    /// Discards queued blocks and invalidates every checkpoint of the owner.
    pub fn abort(&self) -> CheckpointResult<()> {
        let mut state = self.shared.lock()?;
        state.blocks.clear();
        state.queued_bytes = 0;
        state.epoch += 1;
        while state.in_flight {
            state = self.shared.wait(state)?;
        }
        let meta = CheckpointMeta::empty(self.owner_id);
        self.store.write_meta(&meta)?;
        state.meta = meta;
        state.failure = None;
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Metadata as of the last successful flush.
    pub fn meta(&self) -> CheckpointResult<CheckpointMeta> {
        Ok(self.shared.lock()?.meta)
    }

    /// Drains the queue, stops the thread and reports any write failure.
    pub fn close(mut self) -> CheckpointResult<()> {
        self.shutdown();
        let state = self.shared.lock()?;
        match &state.failure {
            Some(failure) => Err(CheckpointError::WriterFailed(failure.clone())),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            state.closed = true;
        }
        self.shared.changed.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(owner_id = self.owner_id, "checkpoint writer thread panicked");
            }
        }
    }
}

impl Drop for CheckpointWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_writer(
    shared: Arc<Shared>,
    store: Arc<dyn CheckpointStore>,
    owner_id: u32,
    metrics: Arc<ExecMetrics>,
) {
    loop {
        // 1. Pop the oldest block
        let (block, offset, epoch) = {
            let Ok(mut state) = shared.lock() else { return };
            let block = loop {
                if let Some(block) = state.blocks.pop_front() {
                    break block;
                }
                if state.closed {
                    return;
                }
                state = match shared.wait(state) {
                    Ok(state) => state,
                    Err(_) => return,
                };
            };
            let len = block.bytes.len();
            state.queued_bytes -= len;
            state.in_flight_bytes = len;
            state.in_flight = true;
            (block, state.meta.next_offset(), state.epoch)
        };

        // 2. Write the block outside the lock
        let written = store.write_block(owner_id, offset, &block.bytes);

        // 3. Account for it only after the write succeeded
        let Ok(mut state) = shared.lock() else { return };
        state.in_flight = false;
        state.in_flight_bytes = 0;
        if state.epoch == epoch {
            let flushed = written.and_then(|()| {
                let mut meta = state.meta;
                meta.record_flush(block.bytes.len(), block.cost_estimate);
                store.write_meta(&meta).map(|()| meta)
            });
            match flushed {
                Ok(meta) => {
                    state.meta = meta;
                    metrics.add_checkpoint_flushed(block.bytes.len() as u64);
                    debug!(
                        owner_id,
                        operator_id = block.operator_id,
                        bytes = block.bytes.len(),
                        count = meta.checkpoint_count,
                        "checkpoint block flushed"
                    );
                }
                Err(e) => {
                    warn!(owner_id, operator_id = block.operator_id, error = %e, "checkpoint flush failed");
                    metrics.increment_checkpoint_failures();
                    state.failure = Some(e.to_string());
                    state.blocks.clear();
                    state.queued_bytes = 0;
                }
            }
        }
        shared.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{MemoryCheckpointStore, META_REGION_SIZE};

    fn block(operator_id: u32, fill: u8, len: usize) -> CheckpointBlock {
        CheckpointBlock {
            operator_id,
            bytes: vec![fill; len],
            cost_estimate: 1.0,
        }
    }

    fn spawn(store: &Arc<MemoryCheckpointStore>, capacity: usize) -> CheckpointWriter {
        CheckpointWriter::spawn(
            Arc::clone(store) as Arc<dyn CheckpointStore>,
            1,
            capacity,
            true,
            Arc::new(ExecMetrics::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_blocks_flushed_in_order() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let writer = spawn(&store, 1024);
        writer.enqueue(block(1, 0xAA, 10)).unwrap();
        writer.enqueue(block(2, 0xBB, 20)).unwrap();
        writer.enqueue(block(3, 0xCC, 5)).unwrap();
        writer.wait_idle().unwrap();

        let meta = store.read_meta(1).unwrap().unwrap();
        assert_eq!(meta.checkpoint_count, 3);
        assert_eq!(meta.total_bytes, 35);
        assert_eq!(meta.cumulative_cost_estimate, 3.0);
        let bytes = store.read_block(1, META_REGION_SIZE, 35).unwrap();
        assert!(bytes[..10].iter().all(|b| *b == 0xAA));
        assert!(bytes[10..30].iter().all(|b| *b == 0xBB));
        assert!(bytes[30..].iter().all(|b| *b == 0xCC));
    }

    #[test]
    fn test_tiny_capacity_applies_backpressure() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let writer = spawn(&store, 8);
        for i in 0..50u8 {
            writer.enqueue(block(1, i, 6)).unwrap();
        }
        writer.wait_idle().unwrap();
        assert_eq!(writer.meta().unwrap().checkpoint_count, 50);
    }

    #[test]
    fn test_failure_stops_accepting_and_keeps_prefix() {
        let store = Arc::new(MemoryCheckpointStore::new());
        store.fail_block_writes_after(2);
        let writer = spawn(&store, 1024);
        for i in 0..2u8 {
            writer.enqueue(block(1, i, 4)).unwrap();
        }
        writer.wait_idle().unwrap();
        writer.enqueue(block(1, 9, 4)).unwrap();
        assert!(writer.wait_idle().is_err());
        assert!(writer.enqueue(block(1, 10, 4)).is_err());

        let meta = store.read_meta(1).unwrap().unwrap();
        assert_eq!(meta.checkpoint_count, 2);
        assert_eq!(meta.total_bytes, 8);
    }

    #[test]
    fn test_abort_invalidates_checkpoints() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let writer = spawn(&store, 1024);
        writer.enqueue(block(1, 1, 16)).unwrap();
        writer.wait_idle().unwrap();
        writer.abort().unwrap();
        assert_eq!(store.read_meta(1).unwrap().unwrap().checkpoint_count, 0);

        writer.enqueue(block(1, 2, 4)).unwrap();
        writer.wait_idle().unwrap();
        let meta = store.read_meta(1).unwrap().unwrap();
        assert_eq!(meta.checkpoint_count, 1);
        assert_eq!(meta.total_bytes, 4);
    }

    #[test]
    fn test_close_drains_queue() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let writer = spawn(&store, 1024);
        writer.enqueue(block(1, 1, 3)).unwrap();
        writer.enqueue(block(1, 2, 3)).unwrap();
        writer.close().unwrap();
        assert_eq!(store.read_meta(1).unwrap().unwrap().checkpoint_count, 2);
    }

    #[test]
    fn test_append_mode_continues_after_existing_blocks() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let first = spawn(&store, 1024);
        first.enqueue(block(1, 1, 10)).unwrap();
        first.close().unwrap();

        let second = CheckpointWriter::spawn(
            Arc::clone(&store) as Arc<dyn CheckpointStore>,
            1,
            1024,
            false,
            Arc::new(ExecMetrics::new()),
        )
        .unwrap();
        second.enqueue(block(1, 2, 6)).unwrap();
        second.close().unwrap();

        let meta = store.read_meta(1).unwrap().unwrap();
        assert_eq!(meta.checkpoint_count, 2);
        assert_eq!(meta.total_bytes, 16);
    }
}
