//! Mock solver backends for testing the controller's degradation paths.
//!
//! Solved outcomes are produced by fixing the binaries to a chosen flap
//! sequence and solving the model's equality rows for the remaining
//! variables, so the returned trajectory is exactly the dynamics rollout.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use flappy_core::error::SolverError;
use flappy_mpc::{Assignment, MipBackend, MiqpProblem, SolveOutcome, SolveStats};
use nalgebra::{DMatrix, DVector};

/// Complete a binary assignment into a full variable vector.
///
/// Requires the equality rows to determine every continuous variable once the
/// binaries are fixed, as the horizon model's dynamics do.
pub fn complete_assignment(problem: &MiqpProblem, flaps: &[bool]) -> Result<DVector<f64>, SolverError> {
    assert_eq!(
        flaps.len(),
        problem.binaries.len(),
        "one flap decision per binary variable"
    );
    let n = problem.n_vars();
    let continuous: Vec<usize> = (0..n).filter(|i| !problem.binaries.contains(i)).collect();

    let mut values = DVector::zeros(n);
    for (&var, &flap) in problem.binaries.iter().zip(flaps) {
        values[var] = if flap { 1.0 } else { 0.0 };
    }

    // A_c z_c = b - A_b z_b
    let rhs = &problem.b_eq - &problem.a_eq * &values;
    let a_c = DMatrix::from_fn(problem.n_eq(), continuous.len(), |i, j| {
        problem.a_eq[(i, continuous[j])]
    });
    if !a_c.is_square() {
        return Err(SolverError::Setup(format!(
            "equality rows ({}) do not determine {} continuous variables",
            a_c.nrows(),
            a_c.ncols()
        )));
    }
    let z_c = a_c
        .lu()
        .solve(&rhs)
        .ok_or_else(|| SolverError::Numerical("singular equality system".into()))?;
    for (j, &var) in continuous.iter().enumerate() {
        values[var] = z_c[j];
    }
    Ok(values)
}

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

/// One canned backend response.
#[derive(Clone, Debug)]
pub enum Script {
    /// Solve with the given flap sequence (padded with `false`).
    Flaps(Vec<bool>),
    /// Solve without flapping at all.
    Coast,
    Infeasible,
    Fail(SolverError),
}

/// Backend that replays a fixed list of responses, then reports unavailable.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `solve` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

impl MipBackend for ScriptedBackend {
    fn solve(&self, problem: &MiqpProblem) -> SolveOutcome {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let next = self.script.lock().unwrap().pop_front();

        let flaps = match next {
            Some(Script::Flaps(mut flaps)) => {
                flaps.resize(problem.binaries.len(), false);
                flaps
            }
            Some(Script::Coast) => vec![false; problem.binaries.len()],
            Some(Script::Infeasible) => return SolveOutcome::Infeasible,
            Some(Script::Fail(err)) => return SolveOutcome::Failed(err),
            None => {
                return SolveOutcome::Failed(SolverError::Unavailable("script exhausted".into()));
            }
        };

        match complete_assignment(problem, &flaps) {
            Ok(values) => {
                let objective = problem.objective(&values);
                SolveOutcome::Solved(Assignment {
                    values,
                    objective,
                    stats: SolveStats::default(),
                })
            }
            Err(err) => SolveOutcome::Failed(err),
        }
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ScriptedBackend"
    }
}

// ---------------------------------------------------------------------------
// FailingBackend
// ---------------------------------------------------------------------------

/// Backend that always fails with the same error.
pub struct FailingBackend {
    error: SolverError,
}

impl FailingBackend {
    pub const fn new(error: SolverError) -> Self {
        Self { error }
    }

    /// Stand-in for a solver that is not installed.
    pub fn unavailable() -> Self {
        Self::new(SolverError::Unavailable("no solver installed".into()))
    }
}

impl MipBackend for FailingBackend {
    fn solve(&self, _problem: &MiqpProblem) -> SolveOutcome {
        SolveOutcome::Failed(self.error.clone())
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "FailingBackend"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
