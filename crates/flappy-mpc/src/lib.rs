//! Receding-horizon mixed-integer controller for a flapping bird.
//!
//! Once per frame the controller decides whether the bird should flap so it
//! threads the upcoming pipe gaps while staying near a cruise altitude:
//!
//! 1. **Obstacle constraints**: gap bounds and centerline penalty for every
//!    pipe near a horizontal position
//! 2. **Horizon model**: vertical dynamics with one binary flap decision per
//!    step, assembled into a mixed-integer QP
//! 3. **Backend**: pluggable solver; the bundled one runs branch and bound
//!    over Clarabel QP relaxations
//! 4. **Controller**: acts on the first decision, keeps the plan, and ages
//!    it forward when a later solve fails
//!
//! # Architecture
//!
//! The problem is rebuilt from scratch every frame from the measured state
//! and an immutable obstacle snapshot. The only state carried between frames
//! is the controller's retained plan.

pub mod backend;
pub mod controller;
pub mod horizon;
pub mod obstacle;
pub mod solver;
pub mod types;

pub use backend::MipBackend;
pub use controller::{ControllerStats, FallbackState, MpcController};
pub use horizon::{rollout, HorizonModel, Plan, VariableLayout};
pub use obstacle::{is_active, obstacle_terms, GapConstraint, ObstacleTerms, QuadraticPenalty};
pub use solver::BranchAndBound;
pub use types::{Assignment, MiqpProblem, SolveOutcome, SolveStats};
