//! Tree-wide checkpoint optimizer
//!
//! Enumerates every dump/rely assignment over the checkpointable operators.
//! An assignment is valid when no non-root operator relies on a nearest
//! checkpointable ancestor that also relies. Cost:
//!
//! ```text
//! Σ suspend_time(dumped) + Σ resume_cost(relying)
//! ```

/// Cost inputs of one checkpointable operator.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorCost {
    pub operator_id: u32,
    /// Index of the nearest checkpointable ancestor in the input slice
    pub parent: Option<usize>,
    pub suspend_time: f64,
    pub resume_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Dump,
    Rely,
}

/// Cheapest assignment found
#[derive(Debug, Clone, PartialEq)]
pub struct TreePlan {
    pub choices: Vec<(u32, Choice)>,
    pub cost: f64,
}

impl TreePlan {
    /// Operators that must checkpoint now
    pub fn dumped(&self) -> impl Iterator<Item = u32> + '_ {
        self.choices
            .iter()
            .filter(|(_, c)| *c == Choice::Dump)
            .map(|(id, _)| *id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TreeOptimizer {
    max_operators: usize,
}

impl TreeOptimizer {
    pub fn new(max_operators: usize) -> Self {
        Self { max_operators }
    }

    /// Returns `None` for an empty tree or one too large to enumerate.
    pub fn solve(&self, operators: &[OperatorCost]) -> Option<TreePlan> {
        let n = operators.len();
        if n == 0 || n > self.max_operators || n >= u64::BITS as usize {
            return None;
        }

        let mut best: Option<(u64, f64)> = None;
        for mask in 0..(1u64 << n) {
            let dumps = |i: usize| mask & (1 << i) != 0;
            let valid = operators.iter().enumerate().all(|(i, op)| {
                dumps(i) || op.parent.map_or(true, |p| dumps(p))
            });
            if !valid {
                continue;
            }
            let cost: f64 = operators
                .iter()
                .enumerate()
                .map(|(i, op)| if dumps(i) { op.suspend_time } else { op.resume_cost })
                .sum();
            if best.map_or(true, |(_, c)| cost < c) {
                best = Some((mask, cost));
            }
        }

        best.map(|(mask, cost)| TreePlan {
            choices: operators
                .iter()
                .enumerate()
                .map(|(i, op)| {
                    let choice = if mask & (1 << i) != 0 {
                        Choice::Dump
                    } else {
                        Choice::Rely
                    };
                    (op.operator_id, choice)
                })
                .collect(),
            cost,
        })
    }
}
