//! Receding-horizon controller with plan retention and graceful degradation.
//!
//! Each [`MpcController::step`] builds a fresh [`HorizonModel`], hands it to
//! the backend and acts on the first flap decision. The full plan is kept in
//! [`FallbackState`]; when a later solve fails the kept plan is aged by one
//! frame and reused, and once it runs out the do-nothing default is returned.
//! No solver failure ever reaches the caller.

use flappy_core::config::ControllerConfig;
use flappy_core::error::{ConfigError, SolverError};
use flappy_core::types::{BirdState, ControlOutput, Obstacle, PlanSource, Waypoint};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::MipBackend;
use crate::horizon::HorizonModel;
use crate::solver::BranchAndBound;
use crate::types::SolveOutcome;

// ---------------------------------------------------------------------------
// FallbackState
// ---------------------------------------------------------------------------

/// Last known good plan, aged forward on every reuse.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FallbackState {
    decisions: Vec<bool>,
    path: Vec<Waypoint>,
    age: usize,
}

impl FallbackState {
    pub const fn new() -> Self {
        Self {
            decisions: Vec::new(),
            path: Vec::new(),
            age: 0,
        }
    }

    pub fn decisions(&self) -> &[bool] {
        &self.decisions
    }

    pub fn path(&self) -> &[Waypoint] {
        &self.path
    }

    /// Frames elapsed since the plan was solved.
    pub const fn age(&self) -> usize {
        self.age
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty() && self.path.is_empty()
    }

    /// Replace the retained plan with a freshly solved one.
    pub fn replace(&mut self, decisions: Vec<bool>, path: Vec<Waypoint>) {
        self.decisions = decisions;
        self.path = path;
        self.age = 0;
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Age the plan by one frame and return its new head.
    ///
    /// Drops the oldest decision and waypoint and shifts every remaining
    /// waypoint back by `displacement`. Returns `None` and clears the state
    /// when too little is left to keep a decision and a two-point path.
    pub fn advance(&mut self, displacement: f64) -> Option<ControlOutput> {
        if self.decisions.len() < 2 || self.path.len() < 3 {
            self.clear();
            return None;
        }

        self.decisions.remove(0);
        self.path.remove(0);
        for waypoint in &mut self.path {
            waypoint.x -= displacement;
        }
        self.age += 1;

        Some(ControlOutput {
            flap: self.decisions[0],
            path: self.path.clone(),
            source: PlanSource::Fallback { age: self.age },
        })
    }
}

// ---------------------------------------------------------------------------
// ControllerStats
// ---------------------------------------------------------------------------

/// Running counters over the controller's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub steps: u64,
    pub solved: u64,
    pub infeasible: u64,
    pub solver_errors: u64,
    /// Steps answered from an aged plan.
    pub fallbacks: u64,
    /// Steps answered with the do-nothing default.
    pub defaults: u64,
}

// ---------------------------------------------------------------------------
// MpcController
// ---------------------------------------------------------------------------

/// Per-frame flap controller.
pub struct MpcController<B: MipBackend = BranchAndBound> {
    config: ControllerConfig,
    backend: B,
    fallback: FallbackState,
    stats: ControllerStats,
}

impl MpcController<BranchAndBound> {
    /// Controller using the bundled branch-and-bound backend.
    pub fn with_default_backend(config: ControllerConfig) -> Result<Self, ConfigError> {
        let backend = BranchAndBound::new(config.solver.clone());
        Self::new(config, backend)
    }
}

impl<B: MipBackend> MpcController<B> {
    /// Create a controller. Fails if `config` does not validate.
    pub fn new(config: ControllerConfig, backend: B) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            fallback: FallbackState::new(),
            stats: ControllerStats::default(),
        })
    }

    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub const fn fallback(&self) -> &FallbackState {
        &self.fallback
    }

    pub const fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    /// Forget the retained plan and counters.
    pub fn reset(&mut self) {
        self.fallback.clear();
        self.stats = ControllerStats::default();
    }

    /// Decide whether to flap this frame.
    ///
    /// Always returns a usable output: a fresh plan when the solve succeeds,
    /// otherwise the aged previous plan or the safe default.
    pub fn step(&mut self, state: BirdState, obstacles: &[Obstacle]) -> ControlOutput {
        self.stats.steps += 1;
        let model = HorizonModel::build(&self.config, state, obstacles);

        let error = match self.backend.solve(&model.problem) {
            SolveOutcome::Solved(assignment) => match model.extract(&assignment) {
                Ok(plan) => {
                    self.stats.solved += 1;
                    let flap = plan.decisions[0];
                    debug!(
                        flap,
                        objective = assignment.objective,
                        nodes = assignment.stats.nodes,
                        solve_time_us = assignment.stats.solve_time_us,
                        constrained_steps = model.constrained_steps,
                        "horizon solved"
                    );
                    self.fallback.replace(plan.decisions, plan.path.clone());
                    return ControlOutput {
                        flap,
                        path: plan.path,
                        source: PlanSource::Solved,
                    };
                }
                Err(err) => err,
            },
            SolveOutcome::Infeasible => {
                self.stats.infeasible += 1;
                warn!(y = state.y, vy = state.vy, "horizon infeasible");
                return self.recover();
            }
            SolveOutcome::Failed(err) => err,
        };

        self.stats.solver_errors += 1;
        self.log_failure(&error);
        self.recover()
    }

    fn log_failure(&self, error: &SolverError) {
        warn!(backend = self.backend.name(), %error, "horizon solve failed");
    }

    /// Serve the aged plan, or the default once it is exhausted.
    fn recover(&mut self) -> ControlOutput {
        if let Some(output) = self.fallback.advance(self.config.step_displacement()) {
            self.stats.fallbacks += 1;
            debug!(age = self.fallback.age(), remaining = output.path.len(), "using aged plan");
            return output;
        }
        self.stats.defaults += 1;
        warn!("no usable plan, holding");
        ControlOutput::safe_default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::horizon::rollout;
    use crate::types::{Assignment, MiqpProblem, SolveStats};
    use nalgebra::DVector;

    /// Replays canned outcomes; solved entries coast without flapping.
    struct Scripted {
        config: ControllerConfig,
        outcomes: Mutex<VecDeque<Option<SolverError>>>,
    }

    impl Scripted {
        fn new(config: &ControllerConfig, outcomes: Vec<Option<SolverError>>) -> Self {
            Self {
                config: config.clone(),
                outcomes: Mutex::new(outcomes.into()),
            }
        }
    }

    impl MipBackend for Scripted {
        fn solve(&self, problem: &MiqpProblem) -> SolveOutcome {
            let next = self.outcomes.lock().unwrap().pop_front();
            match next {
                Some(None) => {
                    let n = self.config.horizon;
                    let y0 = problem.b_eq[0];
                    let v0 = problem.b_eq[1];
                    let states = rollout(&self.config, BirdState::new(y0, v0), &vec![false; n - 1]);
                    let mut values = DVector::zeros(problem.n_vars());
                    for (t, s) in states.iter().enumerate() {
                        values[t] = s.y;
                        values[n + t] = s.vy;
                    }
                    SolveOutcome::Solved(Assignment {
                        values,
                        objective: 0.0,
                        stats: SolveStats::default(),
                    })
                }
                Some(Some(err)) => SolveOutcome::Failed(err),
                None => SolveOutcome::Infeasible,
            }
        }

        #[allow(clippy::unnecessary_literal_bound)]
        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            horizon: 5,
            ..ControllerConfig::default()
        }
    }

    fn numerical() -> Option<SolverError> {
        Some(SolverError::Numerical("stalled".into()))
    }

    #[test]
    fn rejects_invalid_config() {
        let cfg = ControllerConfig {
            horizon: 1,
            ..ControllerConfig::default()
        };
        let result = MpcController::new(cfg.clone(), Scripted::new(&cfg, vec![]));
        assert!(matches!(result, Err(ConfigError::InvalidHorizon(1))));
    }

    #[test]
    fn no_history_yields_safe_default() {
        let cfg = config();
        let mut controller = MpcController::new(cfg.clone(), Scripted::new(&cfg, vec![])).unwrap();
        let out = controller.step(BirdState::new(200.0, 0.0), &[]);
        assert_eq!(out, ControlOutput::safe_default());
        assert_eq!(controller.stats().infeasible, 1);
        assert_eq!(controller.stats().defaults, 1);
    }

    #[test]
    fn solved_plan_is_retained() {
        let cfg = config();
        let mut controller =
            MpcController::new(cfg.clone(), Scripted::new(&cfg, vec![None])).unwrap();
        let out = controller.step(BirdState::new(200.0, 0.0), &[]);

        assert!(!out.flap);
        assert_eq!(out.source, PlanSource::Solved);
        assert_eq!(out.path.len(), 5);
        assert!((out.path[0].x - 57.0).abs() < f64::EPSILON);
        assert!((out.path[0].y - 200.0).abs() < f64::EPSILON);
        assert_eq!(controller.fallback().decisions().len(), 4);
        assert_eq!(controller.fallback().path(), out.path.as_slice());
        assert_eq!(controller.fallback().age(), 0);
    }

    #[test]
    fn failure_ages_plan_by_one_frame() {
        let cfg = config();
        let mut controller =
            MpcController::new(cfg.clone(), Scripted::new(&cfg, vec![None, numerical()]))
                .unwrap();
        let solved = controller.step(BirdState::new(200.0, 0.0), &[]);
        let aged = controller.step(BirdState::new(201.0, 1.0), &[]);

        assert_eq!(aged.source, PlanSource::Fallback { age: 1 });
        assert_eq!(aged.path.len(), solved.path.len() - 1);
        for (old, new) in solved.path[1..].iter().zip(&aged.path) {
            assert!((old.x - 4.0 - new.x).abs() < 1e-12);
            assert!((old.y - new.y).abs() < f64::EPSILON);
        }
        assert_eq!(controller.stats().solver_errors, 1);
        assert_eq!(controller.stats().fallbacks, 1);
    }

    #[test]
    fn repeated_failures_exhaust_to_default() {
        let cfg = config();
        let outcomes = std::iter::once(None)
            .chain(std::iter::repeat_with(numerical).take(6))
            .collect();
        let mut controller = MpcController::new(cfg.clone(), Scripted::new(&cfg, outcomes)).unwrap();
        controller.step(BirdState::new(200.0, 0.0), &[]);

        // Horizon 5: paths of length 4, 3, 2 then the default.
        let lengths: Vec<usize> = (0..4)
            .map(|_| controller.step(BirdState::new(200.0, 0.0), &[]).path.len())
            .collect();
        assert_eq!(lengths, vec![4, 3, 2, 2]);
        assert!(controller.fallback().is_empty());

        let out = controller.step(BirdState::new(200.0, 0.0), &[]);
        assert_eq!(out, ControlOutput::safe_default());
        assert_eq!(controller.stats().fallbacks, 3);
        assert_eq!(controller.stats().defaults, 2);
    }

    #[test]
    fn success_after_failure_resets_age() {
        let cfg = config();
        let mut controller = MpcController::new(
            cfg.clone(),
            Scripted::new(&cfg, vec![None, numerical(), None]),
        )
        .unwrap();
        controller.step(BirdState::new(200.0, 0.0), &[]);
        controller.step(BirdState::new(200.0, 0.0), &[]);
        assert_eq!(controller.fallback().age(), 1);

        let out = controller.step(BirdState::new(150.0, 0.0), &[]);
        assert_eq!(out.source, PlanSource::Solved);
        assert_eq!(controller.fallback().age(), 0);
        assert_eq!(controller.fallback().path().len(), 5);
    }

    #[test]
    fn reset_forgets_plan() {
        let cfg = config();
        let mut controller =
            MpcController::new(cfg.clone(), Scripted::new(&cfg, vec![None])).unwrap();
        controller.step(BirdState::new(200.0, 0.0), &[]);
        controller.reset();
        assert!(controller.fallback().is_empty());
        assert_eq!(controller.stats(), &ControllerStats::default());
    }

    #[test]
    fn fallback_advance_requires_two_decisions() {
        let mut state = FallbackState::new();
        state.replace(
            vec![true, false],
            vec![Waypoint::new(57.0, 10.0), Waypoint::new(61.0, 11.0), Waypoint::new(65.0, 12.0)],
        );

        let out = state.advance(4.0).unwrap();
        assert!(!out.flap);
        assert_eq!(out.path, vec![Waypoint::new(57.0, 11.0), Waypoint::new(61.0, 12.0)]);
        assert_eq!(out.source, PlanSource::Fallback { age: 1 });

        assert!(state.advance(4.0).is_none());
        assert!(state.is_empty());
        assert_eq!(state.age(), 0);
    }
}
