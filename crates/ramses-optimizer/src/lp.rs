//! Mixed-integer linear program model.
//!
//! A [`LinearProgram`] is a minimisation problem over bounded variables
//! with ranged linear constraints:
//!
//! ```text
//! minimise   Σ c_j·x_j
//! subject to lo_k ≤ Σ a_kj·x_j ≤ hi_k     for every constraint k
//!            l_j ≤ x_j ≤ u_j,  x_j ∈ ℤ for integer variables
//! ```
//!
//! The model is solver-agnostic: any [`crate::MipSolver`] consumes it.

use std::fmt::Write as _;

/// Handle to a variable of a [`LinearProgram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableId(pub(crate) usize);

impl VariableId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to a constraint of a [`LinearProgram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstraintId(pub(crate) usize);

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub integer: bool,
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub coefficients: Vec<(VariableId, f64)>,
}

/// A minimisation problem.
#[derive(Debug, Clone, Default)]
pub struct LinearProgram {
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
    objective: Vec<f64>,
}

impl LinearProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a continuous variable with bounds `[lower, upper]`.
    pub fn add_continuous(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VariableId {
        self.push_variable(Variable {
            name: name.into(),
            lower,
            upper,
            integer: false,
        })
    }

    /// Add a 0/1 variable.
    pub fn add_binary(&mut self, name: impl Into<String>) -> VariableId {
        self.push_variable(Variable {
            name: name.into(),
            lower: 0.0,
            upper: 1.0,
            integer: true,
        })
    }

    fn push_variable(&mut self, variable: Variable) -> VariableId {
        self.variables.push(variable);
        self.objective.push(0.0);
        VariableId(self.variables.len() - 1)
    }

    /// Add a ranged constraint `lower ≤ expr ≤ upper`. Use infinities for
    /// one-sided rows and `lower == upper` for equalities.
    pub fn add_constraint(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> ConstraintId {
        self.constraints.push(Constraint {
            name: name.into(),
            lower,
            upper,
            coefficients: Vec::new(),
        });
        ConstraintId(self.constraints.len() - 1)
    }

    /// Set the coefficient of `var` in constraint `row`, replacing any
    /// previous value.
    pub fn set_coefficient(&mut self, row: ConstraintId, var: VariableId, coefficient: f64) {
        let coefficients = &mut self.constraints[row.0].coefficients;
        match coefficients.iter_mut().find(|(v, _)| *v == var) {
            Some(entry) => entry.1 = coefficient,
            None => coefficients.push((var, coefficient)),
        }
    }

    pub fn set_objective_coefficient(&mut self, var: VariableId, coefficient: f64) {
        self.objective[var.0] = coefficient;
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &[f64] {
        &self.objective
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Objective value of an assignment.
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.objective.iter().zip(values).map(|(c, x)| c * x).sum()
    }

    /// Render the model in CPLEX LP format for debug logging.
    pub fn to_lp_format(&self) -> String {
        let mut out = String::from("Minimize\n obj:");
        for (j, c) in self.objective.iter().enumerate() {
            if *c != 0.0 {
                let _ = write!(out, " {} {}", signed(*c), self.variables[j].name);
            }
        }
        out.push_str("\nSubject To\n");
        for constraint in &self.constraints {
            let mut expr = String::new();
            for (var, a) in &constraint.coefficients {
                let _ = write!(expr, " {} {}", signed(*a), self.variables[var.0].name);
            }
            if constraint.lower == constraint.upper {
                let _ = writeln!(out, " {}:{} = {}", constraint.name, expr, constraint.upper);
                continue;
            }
            if constraint.lower.is_finite() {
                let _ = writeln!(out, " {}_lo:{} >= {}", constraint.name, expr, constraint.lower);
            }
            if constraint.upper.is_finite() {
                let _ = writeln!(out, " {}_hi:{} <= {}", constraint.name, expr, constraint.upper);
            }
        }
        out.push_str("Bounds\n");
        for v in &self.variables {
            let _ = writeln!(out, " {} <= {} <= {}", v.lower, v.name, v.upper);
        }
        let integers: Vec<&str> = self
            .variables
            .iter()
            .filter(|v| v.integer)
            .map(|v| v.name.as_str())
            .collect();
        if !integers.is_empty() {
            let _ = writeln!(out, "Generals\n {}", integers.join(" "));
        }
        out.push_str("End\n");
        out
    }
}

fn signed(x: f64) -> String {
    if x < 0.0 {
        format!("- {}", -x)
    } else {
        format!("+ {x}")
    }
}
