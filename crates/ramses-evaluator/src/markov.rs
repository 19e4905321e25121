//! Discrete-time absorbing Markov chains with state rewards.
//!
//! The expected cumulative reward until absorption satisfies
//! `(I − Q)·x = r` over the transient states, where `Q` is the
//! transient-to-transient block of the transition matrix. The system is
//! solved by Gaussian elimination with partial pivoting; a singular
//! matrix means some transient state never reaches absorption.

use crate::error::{EvalError, EvalResult};

const PROBABILITY_TOLERANCE: f64 = 1e-9;
const PIVOT_TOLERANCE: f64 = 1e-12;

/// A finite chain. A state is absorbing when it loops to itself with
/// probability one.
#[derive(Debug, Clone, PartialEq)]
pub struct AbsorbingChain {
    transitions: Vec<Vec<f64>>,
    rewards: Vec<f64>,
}

impl AbsorbingChain {
    pub fn new(states: usize) -> Self {
        Self {
            transitions: vec![vec![0.0; states]; states],
            rewards: vec![0.0; states],
        }
    }

    pub fn states(&self) -> usize {
        self.rewards.len()
    }

    /// Add `probability` to the `from → to` transition.
    pub fn add_transition(&mut self, from: usize, to: usize, probability: f64) {
        self.transitions[from][to] += probability;
    }

    pub fn set_reward(&mut self, state: usize, reward: f64) {
        self.rewards[state] = reward;
    }

    pub fn is_absorbing(&self, state: usize) -> bool {
        (self.transitions[state][state] - 1.0).abs() <= PROBABILITY_TOLERANCE
    }

    /// Check that every row is a probability distribution.
    pub fn validate(&self) -> EvalResult<()> {
        for (state, row) in self.transitions.iter().enumerate() {
            let out_of_range =
                |p: &&f64| !p.is_finite() || **p < -PROBABILITY_TOLERANCE || **p > 1.0 + PROBABILITY_TOLERANCE;
            if let Some(p) = row.iter().find(out_of_range) {
                return Err(EvalError::InvalidProbability {
                    state,
                    reason: format!("probability {p} outside [0, 1]"),
                });
            }
            let total: f64 = row.iter().sum();
            if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(EvalError::InvalidProbability {
                    state,
                    reason: format!("outgoing probabilities sum to {total}"),
                });
            }
        }
        Ok(())
    }

    /// Expected reward accumulated from `initial` until absorption.
    pub fn expected_reward(&self, initial: usize) -> EvalResult<f64> {
        self.validate()?;
        if self.is_absorbing(initial) {
            return Ok(0.0);
        }

        let transient: Vec<usize> = (0..self.states()).filter(|s| !self.is_absorbing(*s)).collect();
        let n = transient.len();

        // Augmented matrix [I − Q | r].
        let mut a = vec![vec![0.0; n + 1]; n];
        for (i, &si) in transient.iter().enumerate() {
            for (j, &sj) in transient.iter().enumerate() {
                let identity = if i == j { 1.0 } else { 0.0 };
                a[i][j] = identity - self.transitions[si][sj];
            }
            a[i][n] = self.rewards[si];
        }

        for col in 0..n {
            let pivot = (col..n)
                .max_by(|x, y| a[*x][col].abs().total_cmp(&a[*y][col].abs()))
                .unwrap_or(col);
            if a[pivot][col].abs() < PIVOT_TOLERANCE {
                return Err(EvalError::NotAbsorbing);
            }
            a.swap(col, pivot);
            let pivot_row = a[col].clone();
            for (row, values) in a.iter_mut().enumerate() {
                if row == col {
                    continue;
                }
                let factor = values[col] / pivot_row[col];
                if factor != 0.0 {
                    for k in col..=n {
                        values[k] -= factor * pivot_row[k];
                    }
                }
            }
        }

        let index = transient
            .iter()
            .position(|s| *s == initial)
            .ok_or(EvalError::NotAbsorbing)?;
        let value = a[index][n] / a[index][index];
        if !value.is_finite() {
            return Err(EvalError::NotAbsorbing);
        }
        Ok(value)
    }
}
