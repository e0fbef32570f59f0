//! Horizon model builder: assembles the mixed-integer program for one frame.
//!
//! # Formulation
//!
//! Decision variables: `z = [y_0..y_{N-1}, v_0..v_{N-1}, f_0..f_{N-2}]`
//! where `y`/`v` are vertical position/velocity and `f_t` is the binary flap
//! decision applied between steps `t` and `t + 1`.
//!
//! For each transition, with `dt = dt(t)`:
//! - `v_{t+1} = v_t + gravity * dt - flap_kick * f_t`
//! - `y_{t+1} = y_t + v_{t+1} * dt`
//! - `x_{t+1} = x_t + approach_speed * dt` (pipe-relative, fixed snapshot)
//!
//! Constraints: `sky <= y_t <= ground`, `y_0`/`v_0` pinned to the measured
//! state, and the gap constraints of every obstacle active at `x_{t+1}`.
//!
//! Cost: `tracking_weight * sum (y_t - cruise_altitude)^2`
//! `+ obstacle_center_weight * sum (gap_center - y_t)^2 + flap_penalty * sum f_t`.

use flappy_core::config::ControllerConfig;
use flappy_core::error::SolverError;
use flappy_core::types::{BirdState, Obstacle, Waypoint};
use nalgebra::{DMatrix, DVector};

use crate::obstacle::{obstacle_terms, QuadraticPenalty};
use crate::types::{Assignment, MiqpProblem};

/// Column layout of the decision vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VariableLayout {
    horizon: usize,
}

impl VariableLayout {
    pub const fn new(horizon: usize) -> Self {
        Self { horizon }
    }

    pub const fn horizon(&self) -> usize {
        self.horizon
    }

    pub const fn n_flaps(&self) -> usize {
        self.horizon - 1
    }

    pub const fn n_vars(&self) -> usize {
        2 * self.horizon + self.n_flaps()
    }

    pub const fn y(&self, t: usize) -> usize {
        t
    }

    pub const fn v(&self, t: usize) -> usize {
        self.horizon + t
    }

    pub const fn flap(&self, t: usize) -> usize {
        2 * self.horizon + t
    }
}

/// Decisions and trajectory read back from a solved model.
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    /// One flap decision per transition (`N - 1`).
    pub decisions: Vec<bool>,
    /// Vertical state at every horizon step (`N`).
    pub trajectory: Vec<BirdState>,
    /// `(x, y)` at every horizon step (`N`).
    pub path: Vec<Waypoint>,
}

/// The assembled problem plus what is needed to interpret its solution.
#[derive(Clone, Debug)]
pub struct HorizonModel {
    pub problem: MiqpProblem,
    pub layout: VariableLayout,
    /// Horizontal position at each horizon step.
    pub xs: Vec<f64>,
    /// Measured state the trajectory starts from.
    pub initial: BirdState,
    /// Number of horizon steps with at least one active obstacle.
    pub constrained_steps: usize,
    sky: f64,
    ground: f64,
}

impl HorizonModel {
    /// Build a fresh problem for the current frame.
    ///
    /// `config` is expected to have passed [`ControllerConfig::validate`].
    pub fn build(config: &ControllerConfig, state: BirdState, obstacles: &[Obstacle]) -> Self {
        let n = config.horizon;
        let layout = VariableLayout::new(n);
        let geometry = &config.geometry;
        let dynamics = &config.dynamics;
        let objective = &config.objective;

        let mut cost = CostBuilder::new(layout.n_vars());
        let mut eq = RowBuilder::new(layout.n_vars());
        let mut ineq = RowBuilder::new(layout.n_vars());

        // Initial conditions
        eq.push(&[(layout.y(0), 1.0)], state.y);
        eq.push(&[(layout.v(0), 1.0)], state.vy);

        // Sky and ground, centerline tracking
        let mut tracking = QuadraticPenalty::default();
        tracking.add_squared_deviation(objective.cruise_altitude);
        for t in 0..n {
            ineq.push(&[(layout.y(t), 1.0)], geometry.ground);
            ineq.push(&[(layout.y(t), -1.0)], -geometry.sky);
            cost.add_penalty(layout.y(t), objective.tracking_weight, tracking);
        }

        let mut xs = Vec::with_capacity(n);
        let mut x = geometry.start_x;
        xs.push(x);
        let mut constrained_steps = 0;

        for t in 0..layout.n_flaps() {
            let dt = config.dt(t);
            x += dt * dynamics.approach_speed;
            xs.push(x);

            // v_{t+1} - v_t + kick * f_t = gravity * dt
            eq.push(
                &[
                    (layout.v(t + 1), 1.0),
                    (layout.v(t), -1.0),
                    (layout.flap(t), dynamics.flap_kick),
                ],
                dynamics.gravity * dt,
            );
            // y_{t+1} - y_t - dt * v_{t+1} = 0
            eq.push(
                &[
                    (layout.y(t + 1), 1.0),
                    (layout.y(t), -1.0),
                    (layout.v(t + 1), -dt),
                ],
                0.0,
            );

            let terms = obstacle_terms(x, obstacles, geometry);
            if !terms.is_empty() {
                constrained_steps += 1;
            }
            for gap in terms.constraints() {
                for (coeff, rhs) in gap.inequalities() {
                    ineq.push(&[(layout.y(t + 1), coeff)], rhs);
                }
            }
            cost.add_penalty(
                layout.y(t + 1),
                objective.obstacle_center_weight,
                terms.penalty(),
            );
            cost.add_linear(layout.flap(t), objective.flap_penalty);
        }

        let (a_eq, b_eq) = eq.finish();
        let (a_ineq, b_ineq) = ineq.finish();
        let (p_matrix, q_vector, constant) = cost.finish();

        Self {
            problem: MiqpProblem {
                p_matrix,
                q_vector,
                constant,
                a_eq,
                b_eq,
                a_ineq,
                b_ineq,
                binaries: (0..layout.n_flaps()).map(|t| layout.flap(t)).collect(),
            },
            layout,
            xs,
            initial: state,
            constrained_steps,
            sky: geometry.sky,
            ground: geometry.ground,
        }
    }

    /// Read decisions, trajectory and path out of a backend assignment.
    ///
    /// Step 0 is reported as the measured state verbatim and positions are
    /// clamped into `[sky, ground]` to strip interior-point round-off.
    pub fn extract(&self, assignment: &Assignment) -> Result<Plan, SolverError> {
        let values = &assignment.values;
        let expected = self.layout.n_vars();
        if values.len() != expected || values.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::MalformedSolution {
                expected,
                got: values.iter().filter(|v| v.is_finite()).count(),
            });
        }

        let n = self.layout.horizon();
        let mut trajectory = Vec::with_capacity(n);
        trajectory.push(self.initial);
        for t in 1..n {
            trajectory.push(BirdState::new(
                values[self.layout.y(t)].clamp(self.sky, self.ground),
                values[self.layout.v(t)],
            ));
        }

        let decisions = (0..self.layout.n_flaps())
            .map(|t| values[self.layout.flap(t)] >= 0.5)
            .collect();

        let path = self
            .xs
            .iter()
            .zip(&trajectory)
            .map(|(&x, s)| Waypoint::new(x, s.y))
            .collect();

        Ok(Plan {
            decisions,
            trajectory,
            path,
        })
    }
}

/// Forward-simulate the motion model for a given flap sequence.
///
/// Returns `flaps.len() + 1` states starting at `state`; no bounds applied.
pub fn rollout(config: &ControllerConfig, state: BirdState, flaps: &[bool]) -> Vec<BirdState> {
    let mut states = Vec::with_capacity(flaps.len() + 1);
    let mut current = state;
    states.push(current);
    for (t, &flap) in flaps.iter().enumerate() {
        let dt = config.dt(t);
        let kick = if flap { config.dynamics.flap_kick } else { 0.0 };
        let vy = current.vy + config.dynamics.gravity * dt - kick;
        current = BirdState::new(current.y + vy * dt, vy);
        states.push(current);
    }
    states
}

// ---------------------------------------------------------------------------
// Matrix assembly helpers
// ---------------------------------------------------------------------------

/// Accumulates sparse constraint rows `sum coeff * z_col (op) rhs`.
struct RowBuilder {
    n_cols: usize,
    rows: Vec<Vec<(usize, f64)>>,
    rhs: Vec<f64>,
}

impl RowBuilder {
    const fn new(n_cols: usize) -> Self {
        Self {
            n_cols,
            rows: Vec::new(),
            rhs: Vec::new(),
        }
    }

    fn push(&mut self, terms: &[(usize, f64)], rhs: f64) {
        self.rows.push(terms.to_vec());
        self.rhs.push(rhs);
    }

    fn finish(self) -> (DMatrix<f64>, DVector<f64>) {
        let mut a = DMatrix::zeros(self.rows.len(), self.n_cols);
        for (i, row) in self.rows.iter().enumerate() {
            for &(j, coeff) in row {
                a[(i, j)] += coeff;
            }
        }
        (a, DVector::from_vec(self.rhs))
    }
}

/// Accumulates `1/2 z^T P z + q^T z + constant`.
struct CostBuilder {
    p: DMatrix<f64>,
    q: DVector<f64>,
    constant: f64,
}

impl CostBuilder {
    fn new(n: usize) -> Self {
        Self {
            p: DMatrix::zeros(n, n),
            q: DVector::zeros(n),
            constant: 0.0,
        }
    }

    /// Add `weight * penalty(z_var)`.
    fn add_penalty(&mut self, var: usize, weight: f64, penalty: QuadraticPenalty) {
        if weight == 0.0 || penalty.is_zero() {
            return;
        }
        self.p[(var, var)] += 2.0 * weight * penalty.quadratic;
        self.q[var] += weight * penalty.linear;
        self.constant += weight * penalty.constant;
    }

    fn add_linear(&mut self, var: usize, coeff: f64) {
        self.q[var] += coeff;
    }

    fn finish(self) -> (DMatrix<f64>, DVector<f64>, f64) {
        (self.p, self.q, self.constant)
    }
}
