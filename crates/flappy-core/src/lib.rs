// flappy-core: Types, config and errors for the flappy MPC controller.

pub mod config;
pub mod error;
pub mod types;

pub mod prelude {
    pub use crate::config::{
        ControllerConfig, DynamicsConfig, GeometryConfig, ObjectiveConfig, SolverConfig,
    };
    pub use crate::error::{ConfigError, FlappyError, ParseObstacleError, SolverError};
    pub use crate::types::{BirdState, ControlOutput, Obstacle, PlanSource, Waypoint};
}
