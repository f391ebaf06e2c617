//! Reward function

use crate::config::ExecConfig;

/// Parameters of the reward function
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardModel {
    pub theta: f64,
    pub throughput_a: f64,
    pub throughput_b: f64,
    pub fixed_cost: f64,
    pub src_floor_bytes: u64,
}

impl RewardModel {
    pub fn from_config(config: &ExecConfig) -> Self {
        Self {
            theta: config.theta,
            throughput_a: config.throughput_a,
            throughput_b: config.throughput_b,
            fixed_cost: config.fixed_cost,
            src_floor_bytes: config.src_floor_bytes,
        }
    }

    /// Charged size of a checkpoint carrying `delta_bytes` of new state
    pub fn src(&self, delta_bytes: u64) -> u64 {
        self.src_floor_bytes + delta_bytes
    }

    /// Estimated µs to serialize and ship `src_bytes`
    pub fn suspend_time(&self, src_bytes: u64) -> f64 {
        let src = src_bytes as f64;
        src / self.throughput_a + src / self.throughput_b + self.fixed_cost
    }

    pub fn reward(&self, rc_micros: f64, src_bytes: u64) -> f64 {
        let denominator = self.suspend_time(src_bytes);
        if denominator <= 0.0 {
            // Free checkpoints are always worth taking once work exists
            return if rc_micros > 0.0 { f64::INFINITY } else { -self.theta };
        }
        rc_micros / denominator - self.theta
    }

    pub fn should_checkpoint(&self, rc_micros: f64, src_bytes: u64) -> bool {
        self.reward(rc_micros, src_bytes) > 0.0
    }
}

impl Default for RewardModel {
    fn default() -> Self {
        Self::from_config(&ExecConfig::default())
    }
}
