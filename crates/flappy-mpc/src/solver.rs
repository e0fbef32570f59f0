//! Branch-and-bound MIQP backend over Clarabel QP relaxations.
//!
//! Uses Clarabel (pure Rust interior-point solver) for the continuous
//! relaxation at every node of a depth-first search over the binary
//! variables.
//!
//! # Node relaxation
//!
//! Binaries fixed by branching become equality rows, free binaries get the
//! box `0 <= z_i <= 1`:
//!
//! - Zero cone: `A_eq z = b_eq`, `z_i = fixed_i`
//! - Nonnegative cone: `A_ineq z <= b_ineq`, `z_i <= 1`, `-z_i <= 0`
//!
//! # Search
//!
//! Branch on the most fractional binary and visit the child nearest its
//! relaxed value first, so the dive reaches an incumbent quickly. A node is
//! pruned when its relaxation is infeasible or its bound cannot improve on
//! the incumbent.

use std::time::{Duration, Instant};

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use flappy_core::config::SolverConfig;
use flappy_core::error::SolverError;
use nalgebra::{DMatrix, DVector};
use tracing::{debug, trace};

use crate::backend::MipBackend;
use crate::types::{Assignment, MiqpProblem, SolveOutcome, SolveStats};

/// Relative gap under which a node cannot beat the incumbent.
const PRUNE_TOL: f64 = 1e-6;

/// Depth-first branch-and-bound solver.
pub struct BranchAndBound {
    config: SolverConfig,
}

/// Outcome of one node relaxation.
enum Relaxation {
    Optimal { x: Vec<f64>, objective: f64 },
    Infeasible,
}

impl BranchAndBound {
    /// Create a new solver with the given limits.
    pub const fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Access the solver configuration.
    pub const fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn search(&self, problem: &MiqpProblem, stats: &mut SolveStats) -> Result<Option<Assignment>, SolverError> {
        let start = Instant::now();
        let time_limit = self.config.time_limit();
        let tol = self.config.integrality_tol;
        let p_csc = dmatrix_to_csc_upper_tri(&problem.p_matrix);

        let mut stack: Vec<Vec<Option<bool>>> = vec![vec![None; problem.binaries.len()]];
        let mut incumbent: Option<(DVector<f64>, f64)> = None;

        while let Some(fixings) = stack.pop() {
            if stats.nodes >= self.config.max_nodes {
                return Err(SolverError::NodeLimit(stats.nodes));
            }
            let remaining = match time_limit {
                Some(limit) => match limit.checked_sub(start.elapsed()) {
                    Some(left) if !left.is_zero() => Some(left),
                    _ => return Err(SolverError::TimeLimit(limit)),
                },
                None => None,
            };
            stats.nodes += 1;

            stats.qp_solves += 1;
            let (x, bound) = match self.relax(problem, &p_csc, &fixings, remaining)? {
                Relaxation::Optimal { x, objective } => (x, objective + problem.constant),
                Relaxation::Infeasible => continue,
            };

            if let Some((_, best)) = &incumbent {
                if bound >= best - PRUNE_TOL * best.abs().max(1.0) {
                    continue;
                }
            }

            match most_fractional(&x, &problem.binaries, &fixings, tol) {
                None => {
                    let mut values = DVector::from_vec(x);
                    for &i in &problem.binaries {
                        values[i] = values[i].round().clamp(0.0, 1.0);
                    }
                    let objective = problem.objective(&values);
                    trace!(node = stats.nodes, objective, "new incumbent");
                    incumbent = Some((values, objective));
                }
                Some((k, value)) => {
                    let mut down = fixings.clone();
                    down[k] = Some(false);
                    let mut up = fixings;
                    up[k] = Some(true);
                    // Last pushed is explored first.
                    if value >= 0.5 {
                        stack.push(down);
                        stack.push(up);
                    } else {
                        stack.push(up);
                        stack.push(down);
                    }
                }
            }
        }

        stats.solve_time_us = elapsed_us(start.elapsed());
        Ok(incumbent.map(|(values, objective)| Assignment {
            values,
            objective,
            stats: *stats,
        }))
    }

    /// Solve the continuous relaxation under the given binary fixings.
    fn relax(
        &self,
        problem: &MiqpProblem,
        p_csc: &CscMatrix<f64>,
        fixings: &[Option<bool>],
        remaining: Option<Duration>,
    ) -> Result<Relaxation, SolverError> {
        let n = problem.n_vars();
        let n_fixed = fixings.iter().filter(|f| f.is_some()).count();
        let n_free = fixings.len() - n_fixed;

        let n_zero = problem.n_eq() + n_fixed;
        let n_nonneg = problem.n_ineq() + 2 * n_free;

        let mut a_all = DMatrix::zeros(n_zero + n_nonneg, n);
        let mut b_all = DVector::zeros(n_zero + n_nonneg);

        // --- Equalities: model rows, then fixed binaries ---
        a_all.rows_mut(0, problem.n_eq()).copy_from(&problem.a_eq);
        b_all.rows_mut(0, problem.n_eq()).copy_from(&problem.b_eq);
        let mut row = problem.n_eq();
        for (&var, fixed) in problem.binaries.iter().zip(fixings) {
            if let Some(value) = fixed {
                a_all[(row, var)] = 1.0;
                b_all[row] = if *value { 1.0 } else { 0.0 };
                row += 1;
            }
        }

        // --- Inequalities: model rows, then boxes on free binaries ---
        a_all
            .rows_mut(row, problem.n_ineq())
            .copy_from(&problem.a_ineq);
        b_all
            .rows_mut(row, problem.n_ineq())
            .copy_from(&problem.b_ineq);
        row += problem.n_ineq();
        for (&var, fixed) in problem.binaries.iter().zip(fixings) {
            if fixed.is_none() {
                a_all[(row, var)] = 1.0;
                b_all[row] = 1.0;
                a_all[(row + 1, var)] = -1.0;
                b_all[row + 1] = 0.0;
                row += 2;
            }
        }
        debug_assert_eq!(row, n_zero + n_nonneg, "constraint count mismatch");

        let mut cones: Vec<SupportedConeT<f64>> = Vec::with_capacity(2);
        if n_zero > 0 {
            cones.push(ZeroConeT(n_zero));
        }
        if n_nonneg > 0 {
            cones.push(NonnegativeConeT(n_nonneg));
        }

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.config.max_qp_iters)
            .verbose(false)
            .time_limit(remaining.map_or(f64::INFINITY, |d| d.as_secs_f64()))
            .tol_gap_abs(1e-7)
            .tol_gap_rel(1e-7)
            .tol_feas(1e-8)
            .build()
            .map_err(|e| SolverError::Setup(format!("{e:?}")))?;

        let a_csc = dmatrix_to_csc(&a_all);
        let q_slice: Vec<f64> = problem.q_vector.iter().copied().collect();
        let b_slice: Vec<f64> = b_all.iter().copied().collect();

        let mut solver = DefaultSolver::new(p_csc, &q_slice, &a_csc, &b_slice, &cones, settings)
            .map_err(|e| SolverError::Setup(format!("{e:?}")))?;
        solver.solve();
        let sol = &solver.solution;

        match &sol.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => Ok(Relaxation::Optimal {
                x: sol.x.clone(),
                objective: sol.obj_val,
            }),
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                Ok(Relaxation::Infeasible)
            }
            SolverStatus::MaxTime => Err(SolverError::TimeLimit(
                self.config.time_limit().unwrap_or_default(),
            )),
            status => Err(SolverError::Numerical(format!("{status:?}"))),
        }
    }
}

impl MipBackend for BranchAndBound {
    fn solve(&self, problem: &MiqpProblem) -> SolveOutcome {
        let start = Instant::now();
        let mut stats = SolveStats::default();

        let outcome = match self.search(problem, &mut stats) {
            Ok(Some(assignment)) => SolveOutcome::Solved(assignment),
            Ok(None) => SolveOutcome::Infeasible,
            Err(err) => SolveOutcome::Failed(err),
        };

        debug!(
            nodes = stats.nodes,
            qp_solves = stats.qp_solves,
            elapsed_us = elapsed_us(start.elapsed()),
            solved = outcome.is_solved(),
            "branch and bound finished"
        );
        outcome
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "branch-and-bound/clarabel"
    }
}

/// Most fractional free binary as `(position in binaries, relaxed value)`.
fn most_fractional(
    x: &[f64],
    binaries: &[usize],
    fixings: &[Option<bool>],
    tol: f64,
) -> Option<(usize, f64)> {
    binaries
        .iter()
        .zip(fixings)
        .enumerate()
        .filter(|(_, (_, fixed))| fixed.is_none())
        .map(|(k, (&var, _))| (k, x[var], x[var].min(1.0 - x[var])))
        .filter(|&(_, _, frac)| frac > tol)
        .max_by(|a, b| a.2.total_cmp(&b.2))
        .map(|(k, value, _)| (k, value))
}

fn elapsed_us(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// Convert a nalgebra `DMatrix<f64>` to a Clarabel `CscMatrix<f64>` (full matrix).
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Convert a symmetric nalgebra `DMatrix<f64>` to upper-triangular `CscMatrix<f64>`.
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..=j.min(nrows.saturating_sub(1)) {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}
