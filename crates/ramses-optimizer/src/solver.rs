//! Solver abstraction and the built-in branch-and-bound.
//!
//! [`BranchAndBound`] explores integer variables depth first over simplex
//! relaxations. Nodes are explored in a fixed order (lowest-index
//! fractional variable, up-branch first), so identical inputs always
//! produce identical solutions.

use std::fmt;

use tracing::{debug, trace};

use crate::lp::{LinearProgram, VariableId};
use crate::simplex::{solve_relaxation, Relaxation};

const INTEGRALITY_TOLERANCE: f64 = 1e-6;
pub(crate) const ZERO_TOLERANCE: f64 = 1e-9;

/// Result status reported by a solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    /// An integer solution was found but optimality was not proven.
    Feasible,
    Infeasible,
    Unbounded,
    Abnormal,
    NotSolved,
}

impl SolveStatus {
    /// Statuses whose assignment may be used.
    pub fn is_solved(self) -> bool {
        matches!(
            self,
            SolveStatus::Optimal | SolveStatus::Feasible | SolveStatus::Unbounded
        )
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SolveStatus::Optimal => "OPTIMAL",
            SolveStatus::Feasible => "FEASIBLE",
            SolveStatus::Infeasible => "INFEASIBLE",
            SolveStatus::Unbounded => "UNBOUNDED",
            SolveStatus::Abnormal => "ABNORMAL",
            SolveStatus::NotSolved => "NOT_SOLVED",
        };
        f.write_str(s)
    }
}

/// Status plus variable assignment. `values` is empty when the solver
/// produced no assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub status: SolveStatus,
    pub objective: f64,
    pub values: Vec<f64>,
}

impl Solution {
    fn without_values(status: SolveStatus) -> Self {
        Self {
            status,
            objective: f64::NAN,
            values: Vec::new(),
        }
    }

    pub fn value(&self, var: VariableId) -> Option<f64> {
        self.values.get(var.index()).copied()
    }
}

/// A mixed-integer linear program solver. Solving must be deterministic
/// and free of side effects.
pub trait MipSolver: Send + Sync {
    fn solve(&self, lp: &LinearProgram) -> Solution;
}

/// Depth-first branch-and-bound over the simplex relaxation.
#[derive(Debug, Clone)]
pub struct BranchAndBound {
    /// Node budget. Exhausting it yields `Feasible` when an incumbent
    /// exists and `NotSolved` otherwise.
    pub max_nodes: usize,
}

impl Default for BranchAndBound {
    fn default() -> Self {
        Self { max_nodes: 10_000 }
    }
}

impl BranchAndBound {
    pub fn new(max_nodes: usize) -> Self {
        Self { max_nodes }
    }
}

impl MipSolver for BranchAndBound {
    fn solve(&self, lp: &LinearProgram) -> Solution {
        let root: Vec<(f64, f64)> = lp.variables().iter().map(|v| (v.lower, v.upper)).collect();
        let mut stack = vec![root];
        let mut incumbent: Option<(f64, Vec<f64>)> = None;
        let mut nodes = 0usize;

        while let Some(bounds) = stack.pop() {
            if nodes >= self.max_nodes {
                debug!(nodes, "branch-and-bound node budget exhausted");
                return match incumbent {
                    Some((_, values)) => finish(lp, SolveStatus::Feasible, values),
                    None => Solution::without_values(SolveStatus::NotSolved),
                };
            }
            nodes += 1;

            let (objective, values) = match solve_relaxation(lp, &bounds) {
                Relaxation::Optimal { objective, values } => (objective, values),
                Relaxation::Infeasible => continue,
                Relaxation::Unbounded if nodes == 1 => {
                    return Solution::without_values(SolveStatus::Unbounded);
                }
                Relaxation::Unbounded => continue,
                Relaxation::Abnormal => return Solution::without_values(SolveStatus::Abnormal),
            };

            if let Some((best, _)) = &incumbent {
                if objective >= *best - ZERO_TOLERANCE {
                    continue;
                }
            }

            let fractional = lp.variables().iter().enumerate().find(|(j, v)| {
                v.integer && (values[*j] - values[*j].round()).abs() > INTEGRALITY_TOLERANCE
            });

            match fractional {
                None => {
                    trace!(objective, "new incumbent");
                    incumbent = Some((objective, values));
                }
                Some((j, _)) => {
                    let x = values[j];
                    let mut down = bounds.clone();
                    down[j].1 = x.floor();
                    let mut up = bounds;
                    up[j].0 = x.ceil();
                    stack.push(down);
                    stack.push(up);
                }
            }
        }

        debug!(nodes, "branch-and-bound finished");
        match incumbent {
            Some((_, values)) => finish(lp, SolveStatus::Optimal, values),
            None => Solution::without_values(SolveStatus::Infeasible),
        }
    }
}

/// Snap integer variables and near-zero values, then recompute the
/// objective from the cleaned assignment.
fn finish(lp: &LinearProgram, status: SolveStatus, mut values: Vec<f64>) -> Solution {
    for (value, variable) in values.iter_mut().zip(lp.variables()) {
        if variable.integer {
            *value = value.round();
        }
        if value.abs() < ZERO_TOLERANCE {
            *value = 0.0;
        }
    }
    Solution {
        status,
        objective: lp.evaluate(&values),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knapsack_prefers_integral_optimum() {
        // max 5a + 4b + 3c  s.t. 2a + 3b + c <= 5, binaries
        let mut lp = LinearProgram::new();
        let vars: Vec<_> = ["a", "b", "c"].iter().map(|n| lp.add_binary(*n)).collect();
        for (v, c) in vars.iter().zip([5.0, 4.0, 3.0]) {
            lp.set_objective_coefficient(*v, -c);
        }
        let cap = lp.add_constraint("capacity", f64::NEG_INFINITY, 5.0);
        for (v, w) in vars.iter().zip([2.0, 3.0, 1.0]) {
            lp.set_coefficient(cap, *v, w);
        }

        let solution = BranchAndBound::default().solve(&lp);
        assert_eq!(solution.status, SolveStatus::Optimal);
        assert_eq!(solution.values, vec![1.0, 1.0, 0.0]);
        assert_eq!(solution.objective, -9.0);
    }

    #[test]
    fn mixed_problem_links_weight_to_activation() {
        // min w - 2a  s.t. w >= 0.3a, w <= a, w in [0, 1]
        let mut lp = LinearProgram::new();
        let w = lp.add_continuous("w", 0.0, 1.0);
        let a = lp.add_binary("a");
        lp.set_objective_coefficient(w, 1.0);
        lp.set_objective_coefficient(a, -2.0);
        let lower = lp.add_constraint("lower", 0.0, f64::INFINITY);
        lp.set_coefficient(lower, w, 1.0);
        lp.set_coefficient(lower, a, -0.3);
        let upper = lp.add_constraint("upper", f64::NEG_INFINITY, 0.0);
        lp.set_coefficient(upper, w, 1.0);
        lp.set_coefficient(upper, a, -1.0);

        let solution = BranchAndBound::default().solve(&lp);
        assert!(solution.status.is_solved());
        assert_eq!(solution.value(a), Some(1.0));
        assert!((solution.value(w).unwrap() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn infeasible_integer_problem() {
        // a + b = 1.5 has no binary solution.
        let mut lp = LinearProgram::new();
        let a = lp.add_binary("a");
        let b = lp.add_binary("b");
        let row = lp.add_constraint("half", 1.5, 1.5);
        lp.set_coefficient(row, a, 1.0);
        lp.set_coefficient(row, b, 1.0);

        let solution = BranchAndBound::default().solve(&lp);
        assert_eq!(solution.status, SolveStatus::Infeasible);
        assert!(!solution.status.is_solved());
        assert!(solution.values.is_empty());
    }

    #[test]
    fn zero_node_budget_is_not_solved() {
        let mut lp = LinearProgram::new();
        lp.add_binary("a");
        let solution = BranchAndBound::new(0).solve(&lp);
        assert_eq!(solution.status, SolveStatus::NotSolved);
    }

    #[test]
    fn solving_is_deterministic() {
        let mut lp = LinearProgram::new();
        let a = lp.add_binary("a");
        let b = lp.add_binary("b");
        lp.set_objective_coefficient(a, -1.0);
        lp.set_objective_coefficient(b, -1.0);
        let row = lp.add_constraint("one", f64::NEG_INFINITY, 1.0);
        lp.set_coefficient(row, a, 1.0);
        lp.set_coefficient(row, b, 1.0);

        let solver = BranchAndBound::default();
        let first = solver.solve(&lp);
        for _ in 0..5 {
            assert_eq!(solver.solve(&lp), first);
        }
    }
}
