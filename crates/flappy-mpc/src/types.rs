//! Core types shared by the model builder, the backends and the controller.

use flappy_core::error::SolverError;
use nalgebra::{DMatrix, DVector};

/// Stacked matrices of a mixed-integer quadratic program.
///
/// ```text
/// minimize    1/2 z^T P z + q^T z + constant
/// subject to  A_eq z  = b_eq
///             A_ineq z <= b_ineq
///             z_i in {0, 1}   for i in binaries
/// ```
///
/// Binary variables carry no explicit box rows; the backend owns their bounds.
#[derive(Clone, Debug)]
pub struct MiqpProblem {
    /// Cost Hessian (full symmetric).
    pub p_matrix: DMatrix<f64>,
    /// Cost linear term.
    pub q_vector: DVector<f64>,
    /// Cost offset, so reported objectives match the modelled cost.
    pub constant: f64,
    pub a_eq: DMatrix<f64>,
    pub b_eq: DVector<f64>,
    pub a_ineq: DMatrix<f64>,
    pub b_ineq: DVector<f64>,
    /// Indices of binary variables.
    pub binaries: Vec<usize>,
}

impl MiqpProblem {
    pub fn n_vars(&self) -> usize {
        self.q_vector.len()
    }

    pub fn n_eq(&self) -> usize {
        self.b_eq.len()
    }

    pub fn n_ineq(&self) -> usize {
        self.b_ineq.len()
    }

    /// Evaluate the objective at `z`.
    pub fn objective(&self, z: &DVector<f64>) -> f64 {
        0.5 * z.dot(&(&self.p_matrix * z)) + self.q_vector.dot(z) + self.constant
    }

    /// Largest violation of any constraint or integrality requirement at `z`.
    pub fn max_violation(&self, z: &DVector<f64>) -> f64 {
        let eq = (&self.a_eq * z - &self.b_eq)
            .iter()
            .fold(0.0_f64, |acc, &r| acc.max(r.abs()));
        let ineq = (&self.a_ineq * z - &self.b_ineq)
            .iter()
            .fold(0.0_f64, |acc, &r| acc.max(r));
        let integrality = self
            .binaries
            .iter()
            .map(|&i| z[i].abs().min((z[i] - 1.0).abs()))
            .fold(0.0_f64, f64::max);
        eq.max(ineq).max(integrality)
    }
}

/// Branch-and-bound effort for one solve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SolveStats {
    /// Nodes taken off the search stack.
    pub nodes: usize,
    /// Relaxations handed to the QP solver.
    pub qp_solves: usize,
    /// Wall-clock solve time in microseconds.
    pub solve_time_us: u64,
}

/// Optimal variable values reported by a backend.
#[derive(Clone, Debug)]
pub struct Assignment {
    /// One value per variable; binaries are exactly 0.0 or 1.0.
    pub values: DVector<f64>,
    pub objective: f64,
    pub stats: SolveStats,
}

/// Result of handing a problem to a backend.
#[derive(Clone, Debug)]
pub enum SolveOutcome {
    Solved(Assignment),
    /// The constraint set admits no integer-feasible point.
    Infeasible,
    /// The backend could not decide (numerical trouble, limits, unavailable).
    Failed(SolverError),
}

impl SolveOutcome {
    pub const fn is_solved(&self) -> bool {
        matches!(self, Self::Solved(_))
    }
}
