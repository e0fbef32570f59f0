use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_horizon() -> usize {
    24
}
const fn default_coarsening_interval() -> usize {
    15
}
const fn default_gap_height() -> f64 {
    100.0
}
const fn default_obstacle_width() -> f64 {
    52.0
}
const fn default_bird_width() -> f64 {
    34.0
}
const fn default_bird_height() -> f64 {
    24.0
}
fn default_ground() -> f64 {
    // Base sprite covers the bottom 21% of a 512 px playfield.
    512.0 * 0.79 - 1.0
}
const fn default_start_x() -> f64 {
    57.0
}
const fn default_approach_speed() -> f64 {
    4.0
}
const fn default_gravity() -> f64 {
    1.0
}
const fn default_flap_kick() -> f64 {
    14.0
}
const fn default_flap_penalty() -> f64 {
    100.0
}
fn default_cruise_altitude() -> f64 {
    default_gap_height() / 2.0
}
const fn default_weight() -> f64 {
    1.0
}
const fn default_max_nodes() -> usize {
    20_000
}
const fn default_max_qp_iters() -> u32 {
    200
}
const fn default_integrality_tol() -> f64 {
    1e-6
}

// ---------------------------------------------------------------------------
// GeometryConfig
// ---------------------------------------------------------------------------

/// Playfield and sprite extents, in playfield units (y grows downward).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Vertical opening between an upper and lower pipe.
    #[serde(default = "default_gap_height")]
    pub gap_height: f64,

    /// Horizontal width of a pipe.
    #[serde(default = "default_obstacle_width")]
    pub obstacle_width: f64,

    #[serde(default = "default_bird_width")]
    pub bird_width: f64,

    #[serde(default = "default_bird_height")]
    pub bird_height: f64,

    /// Top of the playfield.
    #[serde(default)]
    pub sky: f64,

    /// Lowest vertical position the bird may occupy.
    #[serde(default = "default_ground")]
    pub ground: f64,

    /// Fixed horizontal position of the bird on screen.
    #[serde(default = "default_start_x")]
    pub start_x: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            gap_height: default_gap_height(),
            obstacle_width: default_obstacle_width(),
            bird_width: default_bird_width(),
            bird_height: default_bird_height(),
            sky: 0.0,
            ground: default_ground(),
            start_x: default_start_x(),
        }
    }
}

impl GeometryConfig {
    /// Effective collision extent of the bird.
    ///
    /// The sprite rotates in flight, so its diagonal bounds every pose.
    pub fn bird_diagonal(&self) -> f64 {
        self.bird_width.hypot(self.bird_height)
    }
}

// ---------------------------------------------------------------------------
// DynamicsConfig
// ---------------------------------------------------------------------------

/// Vertical motion model, per nominal frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicsConfig {
    /// Horizontal distance the pipes travel toward the bird per frame.
    #[serde(default = "default_approach_speed")]
    pub approach_speed: f64,

    /// Downward acceleration (units/frame^2).
    #[serde(default = "default_gravity")]
    pub gravity: f64,

    /// Upward velocity change applied by a flap.
    #[serde(default = "default_flap_kick")]
    pub flap_kick: f64,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            approach_speed: default_approach_speed(),
            gravity: default_gravity(),
            flap_kick: default_flap_kick(),
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectiveConfig
// ---------------------------------------------------------------------------

/// Cost weights of the horizon problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveConfig {
    /// Cost charged per flap over the horizon.
    #[serde(default = "default_flap_penalty")]
    pub flap_penalty: f64,

    /// Vertical position tracked at every horizon step.
    #[serde(default = "default_cruise_altitude")]
    pub cruise_altitude: f64,

    /// Weight of the squared deviation from `cruise_altitude`.
    #[serde(default = "default_weight")]
    pub tracking_weight: f64,

    /// Weight of the squared deviation from the center of each active gap.
    #[serde(default = "default_weight")]
    pub obstacle_center_weight: f64,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            flap_penalty: default_flap_penalty(),
            cruise_altitude: default_cruise_altitude(),
            tracking_weight: default_weight(),
            obstacle_center_weight: default_weight(),
        }
    }
}

// ---------------------------------------------------------------------------
// SolverConfig
// ---------------------------------------------------------------------------

/// Limits for the branch-and-bound backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum branch-and-bound nodes before the solve is abandoned.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,

    /// Wall-clock budget per solve in milliseconds (unbounded when absent).
    #[serde(default)]
    pub time_limit_ms: Option<u64>,

    /// Interior-point iteration cap for each relaxation.
    #[serde(default = "default_max_qp_iters")]
    pub max_qp_iters: u32,

    /// Distance from 0 or 1 under which a relaxed binary counts as integral.
    #[serde(default = "default_integrality_tol")]
    pub integrality_tol: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_nodes: default_max_nodes(),
            time_limit_ms: None,
            max_qp_iters: default_max_qp_iters(),
            integrality_tol: default_integrality_tol(),
        }
    }
}

impl SolverConfig {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// ControllerConfig
// ---------------------------------------------------------------------------

/// Main controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of planned positions, including the current one (default: 24).
    #[serde(default = "default_horizon")]
    pub horizon: usize,

    /// Steps per time-resolution band; step `t` spans `t / interval + 1` frames.
    #[serde(default = "default_coarsening_interval")]
    pub coarsening_interval: usize,

    #[serde(default)]
    pub geometry: GeometryConfig,

    #[serde(default)]
    pub dynamics: DynamicsConfig,

    #[serde(default)]
    pub objective: ObjectiveConfig,

    #[serde(default)]
    pub solver: SolverConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            horizon: default_horizon(),
            coarsening_interval: default_coarsening_interval(),
            geometry: GeometryConfig::default(),
            dynamics: DynamicsConfig::default(),
            objective: ObjectiveConfig::default(),
            solver: SolverConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon < 2 {
            return Err(ConfigError::InvalidHorizon(self.horizon));
        }
        if self.coarsening_interval == 0 {
            return Err(invalid("coarsening_interval", "must be > 0"));
        }

        let geometry = &self.geometry;
        if !(geometry.ground > geometry.sky) {
            return Err(ConfigError::InvertedBounds {
                sky: geometry.sky,
                ground: geometry.ground,
            });
        }
        if geometry.bird_width < 0.0 || geometry.bird_height < 0.0 {
            return Err(invalid("bird_width/bird_height", "must be non-negative"));
        }
        if !(geometry.gap_height > geometry.bird_diagonal()) {
            return Err(ConfigError::GapTooNarrow {
                gap: geometry.gap_height,
                extent: geometry.bird_diagonal(),
            });
        }
        if !(geometry.obstacle_width >= 0.0) {
            return Err(invalid("obstacle_width", "must be non-negative"));
        }

        let dynamics = &self.dynamics;
        for (field, value) in [
            ("approach_speed", dynamics.approach_speed),
            ("gravity", dynamics.gravity),
            ("flap_kick", dynamics.flap_kick),
        ] {
            if !value.is_finite() {
                return Err(invalid(field, "must be finite"));
            }
        }
        if dynamics.approach_speed < 0.0 {
            return Err(invalid("approach_speed", "must be non-negative"));
        }

        let objective = &self.objective;
        for (field, value) in [
            ("flap_penalty", objective.flap_penalty),
            ("tracking_weight", objective.tracking_weight),
            ("obstacle_center_weight", objective.obstacle_center_weight),
        ] {
            if !(value >= 0.0) {
                return Err(invalid(field, "must be non-negative"));
            }
        }

        if self.solver.max_nodes == 0 {
            return Err(invalid("max_nodes", "must be > 0"));
        }
        if !(self.solver.integrality_tol > 0.0 && self.solver.integrality_tol < 0.5) {
            return Err(invalid("integrality_tol", "must lie in (0, 0.5)"));
        }
        Ok(())
    }

    /// Duration of horizon step `t` in frames: `floor(t / interval) + 1`.
    ///
    /// Later steps are coarser, trading resolution for reach.
    #[allow(clippy::cast_precision_loss)]
    pub fn dt(&self, t: usize) -> f64 {
        (t / self.coarsening_interval + 1) as f64
    }

    /// Horizontal displacement of one nominal frame.
    pub const fn step_displacement(&self) -> f64 {
        self.dynamics.approach_speed
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
