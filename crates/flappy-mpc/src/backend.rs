//! Pluggable solving capability.

use crate::types::{MiqpProblem, SolveOutcome};

/// A mixed-integer quadratic programming backend.
///
/// Implementations must accept convex quadratic objectives with linear
/// equality/inequality rows and binary variables. Failures are reported in
/// the returned [`SolveOutcome`], never by panicking.
pub trait MipBackend: Send + Sync {
    /// Solve `problem` to optimality or report why it could not.
    fn solve(&self, problem: &MiqpProblem) -> SolveOutcome;

    /// Human-readable name for this backend.
    fn name(&self) -> &str;
}

impl<B: MipBackend + ?Sized> MipBackend for Box<B> {
    fn solve(&self, problem: &MiqpProblem) -> SolveOutcome {
        (**self).solve(problem)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
