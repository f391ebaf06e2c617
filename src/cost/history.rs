//! Per-operator checkpoint history

use std::time::Instant;

/// One entry of an operator's checkpoint history.
///
/// `left_rc`/`right_rc` are the children's resume costs when the entry was
/// taken, so later RC computations stop here instead of walking the subtree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointInfo {
    pub taken_at: Instant,
    pub wall_clock_micros: i64,
    pub left_rc: f64,
    pub right_rc: f64,
    pub state_version: u64,
    /// Block join only: block of the checkpoint
    pub block_id: u64,
    /// Block join only: block tuples covered by the checkpoint
    pub block_tuples: u64,
    /// False for the baseline pushed at `begin()`/`load()`
    pub persisted: bool,
}

impl CheckpointInfo {
    pub fn new(state_version: u64, left_rc: f64, right_rc: f64) -> Self {
        Self {
            taken_at: Instant::now(),
            wall_clock_micros: chrono::Utc::now().timestamp_micros(),
            left_rc,
            right_rc,
            state_version,
            block_id: 0,
            block_tuples: 0,
            persisted: true,
        }
    }

    pub fn with_block(mut self, block_id: u64, block_tuples: u64) -> Self {
        self.block_id = block_id;
        self.block_tuples = block_tuples;
        self
    }
}

/// Append-only, time-ordered checkpoint list of one operator instance.
#[derive(Debug, Clone, Default)]
pub struct CheckpointHistory {
    infos: Vec<CheckpointInfo>,
}

impl CheckpointHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a run without persisting anything.
    pub fn push_baseline(&mut self, state_version: u64) {
        let mut info = CheckpointInfo::new(state_version, 0.0, 0.0);
        info.persisted = false;
        self.infos.push(info);
    }

    pub fn push(&mut self, info: CheckpointInfo) {
        self.infos.push(info);
    }

    pub fn latest(&self) -> Option<&CheckpointInfo> {
        self.infos.last()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CheckpointInfo> {
        self.infos.iter()
    }

    /// Persisted entries only
    pub fn persisted_count(&self) -> usize {
        self.infos.iter().filter(|i| i.persisted).count()
    }

    /// Wall clock of the latest persisted checkpoint
    pub fn latest_checkpoint_time(&self) -> Option<i64> {
        self.infos
            .iter()
            .rev()
            .find(|i| i.persisted)
            .map(|i| i.wall_clock_micros)
    }

    /// Whether `state_version` is already covered by the latest entry
    pub fn is_current(&self, state_version: u64) -> bool {
        self.latest()
            .map_or(false, |info| info.state_version == state_version)
    }

    /// Work lost if the operator had to restart from its latest entry.
    pub fn resume_cost(&self) -> f64 {
        match self.latest() {
            Some(info) => {
                info.taken_at.elapsed().as_secs_f64() * 1_000_000.0 + info.left_rc + info.right_rc
            }
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_baseline_is_not_persisted() {
        let mut history = CheckpointHistory::new();
        history.push_baseline(0);
        assert_eq!(history.len(), 1);
        assert_eq!(history.persisted_count(), 0);
        assert!(history.latest_checkpoint_time().is_none());
        assert!(history.is_current(0));
        assert!(!history.is_current(1));
    }

    #[test]
    fn test_resume_cost_includes_memoized_child_cost() {
        let mut history = CheckpointHistory::new();
        history.push(CheckpointInfo::new(3, 250.0, 100.0));
        thread::sleep(Duration::from_millis(2));
        let rc = history.resume_cost();
        assert!(rc >= 350.0 + 2_000.0);
        assert!(history.latest_checkpoint_time().is_some());
    }

    #[test]
    fn test_history_never_shrinks() {
        let mut history = CheckpointHistory::new();
        history.push_baseline(0);
        for v in 1..=5 {
            history.push(CheckpointInfo::new(v, 0.0, 0.0).with_block(v, 2));
        }
        assert_eq!(history.len(), 6);
        assert_eq!(history.latest().map(|i| i.block_id), Some(5));
    }
}
