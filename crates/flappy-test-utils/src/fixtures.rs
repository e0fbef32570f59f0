//! Scenario builders for controller tests.
//!
//! Horizons are kept short so real branch-and-bound solves stay fast in
//! debug builds.

use flappy_core::config::ControllerConfig;
use flappy_core::types::{BirdState, Obstacle};
use rand::Rng;

/// Default configuration with a shortened horizon.
pub fn config_with_horizon(horizon: usize) -> ControllerConfig {
    ControllerConfig {
        horizon,
        ..ControllerConfig::default()
    }
}

/// Pipe pair just ahead of the bird, opening `150 ..= 250`.
pub const fn pipe_at_start() -> Obstacle {
    Obstacle::new(100.0, 250.0)
}

/// Bird at rest inside the opening of [`pipe_at_start`], low enough that
/// coasting hits the lower pipe within four frames.
pub fn threading_scenario() -> (ControllerConfig, BirdState, Vec<Obstacle>) {
    (
        config_with_horizon(8),
        BirdState::new(200.0, 0.0),
        vec![pipe_at_start()],
    )
}

/// `count` pipe pairs spread across the visible field.
///
/// Openings stay fully on screen; they are not guaranteed to be reachable.
pub fn random_obstacles(rng: &mut impl Rng, config: &ControllerConfig, count: usize) -> Vec<Obstacle> {
    let geometry = &config.geometry;
    let lowest = geometry.sky + geometry.gap_height;
    (0..count)
        .map(|_| {
            Obstacle::new(
                rng.gen_range(geometry.start_x..geometry.start_x + 350.0),
                rng.gen_range(lowest..geometry.ground),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
