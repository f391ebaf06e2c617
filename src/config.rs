//! Execution configuration
//!
//! All fields have serde defaults so a partial JSON document is a valid
//! configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::executor::{ExecutorError, ExecutorResult};

/// When operators decide to checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostStrategy {
    /// Each operator evaluates its own reward after every produced tuple
    #[default]
    Reward,
    /// The root periodically picks the cheapest dump/rely assignment
    TreeWide,
    /// Every checkpointable operator dumps once per interval
    Interval,
}

/// Per-query execution configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Left tuples per block-join block (default: 1024)
    #[serde(default = "default_block_capacity")]
    pub block_capacity: usize,

    /// Reward threshold subtracted from the cost ratio (default: 1.0)
    #[serde(default = "default_theta")]
    pub theta: f64,

    /// Serialization throughput in bytes per µs (default: 10000.0)
    #[serde(default = "default_throughput_a")]
    pub throughput_a: f64,

    /// Transfer throughput in bytes per µs (default: 1000.0)
    #[serde(default = "default_throughput_b")]
    pub throughput_b: f64,

    /// Fixed per-checkpoint cost in µs (default: 50.0)
    #[serde(default = "default_fixed_cost")]
    pub fixed_cost: f64,

    /// Minimum bytes charged for any checkpoint (default: 64)
    #[serde(default = "default_src_floor_bytes")]
    pub src_floor_bytes: u64,

    #[serde(default)]
    pub strategy: CostStrategy,

    /// Period of the tree-wide and interval strategies (default: 100)
    #[serde(default = "default_tree_interval_ms")]
    pub tree_interval_ms: u64,

    /// Largest tree the exhaustive optimizer enumerates (default: 16)
    #[serde(default = "default_max_tree_operators")]
    pub max_tree_operators: usize,

    /// When false decisions are computed but nothing is persisted
    #[serde(default = "default_true")]
    pub write_checkpoints: bool,

    /// Checkpoint every block join at every new block
    #[serde(default)]
    pub force_block_checkpoints: bool,

    /// Writer queue capacity in bytes (default: 4 MiB)
    #[serde(default = "default_queue_capacity_bytes")]
    pub queue_capacity_bytes: usize,

    /// Rewrite the store with only the records a resume used
    #[serde(default = "default_true")]
    pub compact_on_resume: bool,
}

fn default_block_capacity() -> usize {
    1024
}

fn default_theta() -> f64 {
    1.0
}

fn default_throughput_a() -> f64 {
    10_000.0
}

fn default_throughput_b() -> f64 {
    1_000.0
}

fn default_fixed_cost() -> f64 {
    50.0
}

fn default_src_floor_bytes() -> u64 {
    64
}

fn default_tree_interval_ms() -> u64 {
    100
}

fn default_max_tree_operators() -> usize {
    16
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            block_capacity: default_block_capacity(),
            theta: default_theta(),
            throughput_a: default_throughput_a(),
            throughput_b: default_throughput_b(),
            fixed_cost: default_fixed_cost(),
            src_floor_bytes: default_src_floor_bytes(),
            strategy: CostStrategy::default(),
            tree_interval_ms: default_tree_interval_ms(),
            max_tree_operators: default_max_tree_operators(),
            write_checkpoints: true,
            force_block_checkpoints: false,
            queue_capacity_bytes: default_queue_capacity_bytes(),
            compact_on_resume: true,
        }
    }
}

impl ExecConfig {
    pub fn with_block_capacity(mut self, block_capacity: usize) -> Self {
        self.block_capacity = block_capacity;
        self
    }

    pub fn with_theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }

    pub fn with_strategy(mut self, strategy: CostStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_tree_interval_ms(mut self, tree_interval_ms: u64) -> Self {
        self.tree_interval_ms = tree_interval_ms;
        self
    }

    pub fn with_write_checkpoints(mut self, write_checkpoints: bool) -> Self {
        self.write_checkpoints = write_checkpoints;
        self
    }

    pub fn with_force_block_checkpoints(mut self, force: bool) -> Self {
        self.force_block_checkpoints = force;
        self
    }

    pub fn with_queue_capacity_bytes(mut self, capacity: usize) -> Self {
        self.queue_capacity_bytes = capacity;
        self
    }

    pub fn with_compact_on_resume(mut self, compact: bool) -> Self {
        self.compact_on_resume = compact;
        self
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> ExecutorResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ExecutorError::invalid_config(format!("parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    pub fn load(path: &Path) -> ExecutorResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            ExecutorError::invalid_config(format!("read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> ExecutorResult<()> {
        if self.block_capacity == 0 {
            return Err(ExecutorError::invalid_config("block_capacity must be positive"));
        }
        for (name, value) in [
            ("throughput_a", self.throughput_a),
            ("throughput_b", self.throughput_b),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ExecutorError::invalid_config(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        if !(self.fixed_cost.is_finite() && self.fixed_cost >= 0.0) {
            return Err(ExecutorError::invalid_config("fixed_cost must be non-negative"));
        }
        if !self.theta.is_finite() {
            return Err(ExecutorError::invalid_config("theta must be finite"));
        }
        if self.queue_capacity_bytes == 0 {
            return Err(ExecutorError::invalid_config(
                "queue_capacity_bytes must be positive",
            ));
        }
        if self.max_tree_operators > 24 {
            return Err(ExecutorError::invalid_config(
                "max_tree_operators above 24 is not enumerable",
            ));
        }
        Ok(())
    }
}
