//! Shared test fixtures and utilities for flappy crates.
//!
//! Provides mock solver backends with scripted outcomes, scenario builders,
//! and deterministic RNG setup.

pub mod fixtures;
pub mod mocks;
pub mod rng;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use fixtures::{config_with_horizon, pipe_at_start, random_obstacles, threading_scenario};
pub use mocks::{complete_assignment, FailingBackend, Script, ScriptedBackend};
pub use rng::seeded_rng;
