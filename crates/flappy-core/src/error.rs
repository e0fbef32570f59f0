use std::time::Duration;

use thiserror::Error;

/// Top-level error type for flappy-core.
#[derive(Debug, Error)]
pub enum FlappyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("Obstacle parse error: {0}")]
    ParseObstacle(#[from] ParseObstacleError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid horizon: {0} (must be >= 2)")]
    InvalidHorizon(usize),

    #[error("Gap height {gap} does not fit the bird extent {extent:.3}")]
    GapTooNarrow { gap: f64, extent: f64 },

    #[error("Ground boundary {ground} must exceed sky boundary {sky}")]
    InvertedBounds { sky: f64, ground: f64 },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Failures reported by a solver backend.
///
/// Every variant is absorbed by the controller's fallback path; callers of the
/// controller never see these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("Problem setup rejected: {0}")]
    Setup(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Node limit reached after {0} nodes")]
    NodeLimit(usize),

    #[error("Time limit of {0:?} exceeded")]
    TimeLimit(Duration),

    #[error("Solver backend unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed solution: expected {expected} finite values, got {got}")]
    MalformedSolution { expected: usize, got: usize },
}

/// Errors parsing an obstacle from its `x,y` text form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseObstacleError {
    #[error("Expected `x,y`, got {0:?}")]
    Format(String),

    #[error("Invalid number {0:?}")]
    Number(String),
}
