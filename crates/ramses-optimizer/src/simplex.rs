//! Dense two-phase primal simplex for the LP relaxation.
//!
//! Variables are shifted to `y = x − l` so every column is non-negative,
//! finite upper bounds become `≤` rows, and rows are normalised to a
//! non-negative right-hand side before slack, surplus and artificial
//! columns are appended. Phase 1 drives the artificials out; phase 2
//! optimises the real objective with artificials barred from entering.
//! Bland's rule (lowest index enters, lowest basic index leaves on ties)
//! keeps the method free of cycling and the outcome deterministic.

use crate::lp::LinearProgram;

const EPS: f64 = 1e-9;
const MAX_PIVOTS: usize = 50_000;

/// Outcome of solving one relaxation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Relaxation {
    Optimal { values: Vec<f64>, objective: f64 },
    Infeasible,
    Unbounded,
    Abnormal,
}

#[derive(Clone, Copy, PartialEq)]
enum Sense {
    Le,
    Ge,
    Eq,
}

struct Row {
    coefficients: Vec<f64>,
    sense: Sense,
    rhs: f64,
}

/// Solve the relaxation of `lp` with the variable bounds replaced by
/// `bounds` (used by branch-and-bound to fix integer variables).
pub(crate) fn solve_relaxation(lp: &LinearProgram, bounds: &[(f64, f64)]) -> Relaxation {
    let n = lp.num_variables();
    if bounds.iter().any(|(l, u)| !l.is_finite() || u.is_nan()) {
        return Relaxation::Abnormal;
    }
    if bounds.iter().any(|(l, u)| l - u > EPS) {
        return Relaxation::Infeasible;
    }

    let lower: Vec<f64> = bounds.iter().map(|(l, _)| *l).collect();
    let mut rows = Vec::new();

    for (j, (l, u)) in bounds.iter().enumerate() {
        if u.is_finite() {
            let mut coefficients = vec![0.0; n];
            coefficients[j] = 1.0;
            rows.push(Row {
                coefficients,
                sense: Sense::Le,
                rhs: (u - l).max(0.0),
            });
        }
    }

    for constraint in lp.constraints() {
        let mut coefficients = vec![0.0; n];
        for (var, a) in &constraint.coefficients {
            coefficients[var.index()] += a;
        }
        let shift: f64 = coefficients.iter().zip(&lower).map(|(a, l)| a * l).sum();
        if constraint.lower == constraint.upper {
            rows.push(Row {
                coefficients,
                sense: Sense::Eq,
                rhs: constraint.upper - shift,
            });
            continue;
        }
        if constraint.upper.is_finite() {
            rows.push(Row {
                coefficients: coefficients.clone(),
                sense: Sense::Le,
                rhs: constraint.upper - shift,
            });
        }
        if constraint.lower.is_finite() {
            rows.push(Row {
                coefficients,
                sense: Sense::Ge,
                rhs: constraint.lower - shift,
            });
        }
    }

    for row in &mut rows {
        if row.rhs < 0.0 {
            row.coefficients.iter_mut().for_each(|a| *a = -*a);
            row.rhs = -row.rhs;
            row.sense = match row.sense {
                Sense::Le => Sense::Ge,
                Sense::Ge => Sense::Le,
                Sense::Eq => Sense::Eq,
            };
        }
    }

    let offset: f64 = lp.objective().iter().zip(&lower).map(|(c, l)| c * l).sum();
    let mut tableau = Tableau::build(n, &rows);

    // Phase 1: minimise the sum of artificials.
    let mut phase1 = vec![0.0; tableau.width()];
    for col in tableau.artificial_start..tableau.width() {
        phase1[col] = 1.0;
    }
    tableau.set_objective(&phase1);
    match tableau.optimise(tableau.width()) {
        Pivoting::Optimal => {}
        Pivoting::Unbounded | Pivoting::Stalled => return Relaxation::Abnormal,
    }
    if tableau.objective_value() > 1e-7 {
        return Relaxation::Infeasible;
    }
    tableau.drive_out_artificials();

    // Phase 2 on the real objective.
    let mut phase2 = vec![0.0; tableau.width()];
    phase2[..n].copy_from_slice(lp.objective());
    tableau.set_objective(&phase2);
    match tableau.optimise(tableau.artificial_start) {
        Pivoting::Optimal => {}
        Pivoting::Unbounded => return Relaxation::Unbounded,
        Pivoting::Stalled => return Relaxation::Abnormal,
    }

    let mut values = lower;
    for (i, &col) in tableau.basis.iter().enumerate() {
        if col < n {
            values[col] += tableau.rhs(i);
        }
    }
    Relaxation::Optimal {
        objective: tableau.objective_value() + offset,
        values,
    }
}

enum Pivoting {
    Optimal,
    Unbounded,
    Stalled,
}

struct Tableau {
    /// Constraint rows; the last entry of each row is the right-hand side.
    rows: Vec<Vec<f64>>,
    /// Reduced costs; the last entry is minus the objective value.
    objective: Vec<f64>,
    basis: Vec<usize>,
    artificial_start: usize,
}

impl Tableau {
    fn build(n: usize, rows: &[Row]) -> Self {
        let slacks = rows.iter().filter(|r| r.sense != Sense::Eq).count();
        let artificials = rows.iter().filter(|r| r.sense != Sense::Le).count();
        let artificial_start = n + slacks;
        let width = artificial_start + artificials;

        let mut tableau_rows = Vec::with_capacity(rows.len());
        let mut basis = Vec::with_capacity(rows.len());
        let mut next_slack = n;
        let mut next_artificial = artificial_start;

        for row in rows {
            let mut t = vec![0.0; width + 1];
            t[..n].copy_from_slice(&row.coefficients);
            t[width] = row.rhs;
            match row.sense {
                Sense::Le => {
                    t[next_slack] = 1.0;
                    basis.push(next_slack);
                    next_slack += 1;
                }
                Sense::Ge => {
                    t[next_slack] = -1.0;
                    next_slack += 1;
                    t[next_artificial] = 1.0;
                    basis.push(next_artificial);
                    next_artificial += 1;
                }
                Sense::Eq => {
                    t[next_artificial] = 1.0;
                    basis.push(next_artificial);
                    next_artificial += 1;
                }
            }
            tableau_rows.push(t);
        }

        Self {
            rows: tableau_rows,
            objective: vec![0.0; width + 1],
            basis,
            artificial_start,
        }
    }

    fn width(&self) -> usize {
        self.objective.len() - 1
    }

    fn rhs(&self, row: usize) -> f64 {
        self.rows[row][self.width()]
    }

    fn objective_value(&self) -> f64 {
        -self.objective[self.width()]
    }

    /// Load `costs` and price out the current basis.
    fn set_objective(&mut self, costs: &[f64]) {
        let width = self.width();
        self.objective = costs.to_vec();
        self.objective.push(0.0);
        for (i, &col) in self.basis.iter().enumerate() {
            let c = costs[col];
            if c != 0.0 {
                for k in 0..=width {
                    self.objective[k] -= c * self.rows[i][k];
                }
            }
        }
    }

    /// Pivot until no column below `entering_limit` has a negative
    /// reduced cost.
    fn optimise(&mut self, entering_limit: usize) -> Pivoting {
        for _ in 0..MAX_PIVOTS {
            let Some(col) = (0..entering_limit).find(|&j| self.objective[j] < -EPS) else {
                return Pivoting::Optimal;
            };
            let Some(row) = self.leaving_row(col) else {
                return Pivoting::Unbounded;
            };
            self.pivot(row, col);
        }
        Pivoting::Stalled
    }

    fn leaving_row(&self, col: usize) -> Option<usize> {
        let width = self.width();
        let mut best: Option<(usize, f64)> = None;
        for (i, row) in self.rows.iter().enumerate() {
            let a = row[col];
            if a <= EPS {
                continue;
            }
            let ratio = row[width] / a;
            best = match best {
                None => Some((i, ratio)),
                Some((_, r)) if ratio < r - EPS => Some((i, ratio)),
                Some((b, r)) if (ratio - r).abs() <= EPS && self.basis[i] < self.basis[b] => {
                    Some((i, ratio))
                }
                keep => keep,
            };
        }
        best.map(|(i, _)| i)
    }

    fn pivot(&mut self, row: usize, col: usize) {
        let width = self.width();
        let p = self.rows[row][col];
        for k in 0..=width {
            self.rows[row][k] /= p;
        }
        let pivot_row = self.rows[row].clone();
        for (i, r) in self.rows.iter_mut().enumerate() {
            if i == row {
                continue;
            }
            let factor = r[col];
            if factor != 0.0 {
                for k in 0..=width {
                    r[k] -= factor * pivot_row[k];
                }
            }
        }
        let factor = self.objective[col];
        if factor != 0.0 {
            for k in 0..=width {
                self.objective[k] -= factor * pivot_row[k];
            }
        }
        self.basis[row] = col;
    }

    /// Replace artificials still basic (at zero) by real columns where the
    /// row allows it. Rows with no real entry are redundant and keep their
    /// artificial, which can never re-enter.
    fn drive_out_artificials(&mut self) {
        for i in 0..self.rows.len() {
            if self.basis[i] < self.artificial_start {
                continue;
            }
            if let Some(col) = (0..self.artificial_start).find(|&j| self.rows[i][j].abs() > EPS) {
                self.pivot(i, col);
            }
        }
    }
}
