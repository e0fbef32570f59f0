use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseObstacleError;

// ---------------------------------------------------------------------------
// BirdState
// ---------------------------------------------------------------------------

/// Vertical state of the bird at the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BirdState {
    /// Vertical position (screen units, grows downward).
    pub y: f64,
    /// Vertical velocity (units/frame, positive is falling).
    pub vy: f64,
}

impl BirdState {
    pub const fn new(y: f64, vy: f64) -> Self {
        Self { y, vy }
    }
}

// ---------------------------------------------------------------------------
// Obstacle
// ---------------------------------------------------------------------------

/// One upper/lower pipe pair, as seen in the current frame.
///
/// `y` is the top edge of the lower pipe; the opening spans
/// `y - gap_height ..= y`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub x: f64,
    pub y: f64,
}

impl Obstacle {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl FromStr for Obstacle {
    type Err = ParseObstacleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| ParseObstacleError::Format(s.to_string()))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| ParseObstacleError::Number(part.trim().to_string()))
        };
        Ok(Self::new(parse(x)?, parse(y)?))
    }
}

// ---------------------------------------------------------------------------
// Waypoint
// ---------------------------------------------------------------------------

/// A predicted `(x, y)` position along the planned path.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
}

impl Waypoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub const fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }
}

// ---------------------------------------------------------------------------
// ControlOutput
// ---------------------------------------------------------------------------

/// Where a control output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    /// Fresh optimal plan from this frame's solve.
    Solved,
    /// Retained plan aged forward by `age` frames.
    Fallback { age: usize },
    /// No usable plan; do nothing.
    Default,
}

/// Result of one control step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlOutput {
    /// Whether the bird should flap this frame.
    pub flap: bool,
    /// Predicted path, starting at the current frame.
    pub path: Vec<Waypoint>,
    pub source: PlanSource,
}

impl ControlOutput {
    /// The do-nothing output: no flap, two-point path at the origin.
    pub fn safe_default() -> Self {
        Self {
            flap: false,
            path: vec![Waypoint::origin(); 2],
            source: PlanSource::Default,
        }
    }

    pub const fn is_degraded(&self) -> bool {
        !matches!(self.source, PlanSource::Solved)
    }
}
