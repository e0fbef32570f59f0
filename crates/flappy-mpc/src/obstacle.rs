//! Gap constraints contributed by pipes near a horizontal position.
//!
//! A pipe pair is *active* at `x` once its front edge, widened by the bird's
//! diagonal, has reached `x` and until its back edge has passed `x`:
//!
//! ```text
//! obstacle.x - x - diagonal < 0  &&  obstacle.x - x + width > 0
//! ```
//!
//! While active, the bird's vertical position `y` must satisfy
//! `obstacle.y - gap_height <= y <= obstacle.y - diagonal` (clear of the upper
//! pipe and of the lower pipe respectively), and it is pulled toward the gap
//! center `obstacle.y - gap_height / 2`.

use flappy_core::config::GeometryConfig;
use flappy_core::types::Obstacle;

/// Bounds on `y` imposed by one active obstacle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GapConstraint {
    /// Index of the obstacle in the snapshot.
    pub obstacle: usize,
    /// Smallest admissible `y` (just below the upper pipe).
    pub lower: f64,
    /// Largest admissible `y` (bird fully above the lower pipe).
    pub upper: f64,
    /// Gap centerline.
    pub center: f64,
}

impl GapConstraint {
    /// The two linear inequalities `coeff * y <= rhs`.
    pub const fn inequalities(&self) -> [(f64, f64); 2] {
        [(1.0, self.upper), (-1.0, -self.lower)]
    }

    pub fn contains(&self, y: f64, tol: f64) -> bool {
        y <= self.upper + tol && y >= self.lower - tol
    }
}

/// Quadratic `a * y^2 + b * y + c` in the vertical position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct QuadraticPenalty {
    pub quadratic: f64,
    pub linear: f64,
    pub constant: f64,
}

impl QuadraticPenalty {
    /// Add `(center - y)^2`.
    pub fn add_squared_deviation(&mut self, center: f64) {
        self.quadratic += 1.0;
        self.linear -= 2.0 * center;
        self.constant += center * center;
    }

    pub fn eval(&self, y: f64) -> f64 {
        (self.quadratic * y + self.linear).mul_add(y, self.constant)
    }

    pub fn is_zero(&self) -> bool {
        self.quadratic == 0.0 && self.linear == 0.0 && self.constant == 0.0
    }
}

/// Constraints and centerline penalty from every obstacle active at one `x`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObstacleTerms {
    constraints: Vec<GapConstraint>,
    penalty: QuadraticPenalty,
}

impl ObstacleTerms {
    pub fn constraints(&self) -> &[GapConstraint] {
        &self.constraints
    }

    /// Sum of squared deviations from each active gap center.
    pub const fn penalty(&self) -> QuadraticPenalty {
        self.penalty
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Whether a concrete `y` clears every active obstacle.
    pub fn admits(&self, y: f64, tol: f64) -> bool {
        self.constraints.iter().all(|gap| gap.contains(y, tol))
    }
}

/// Whether `obstacle` constrains the bird at horizontal position `x`.
pub fn is_active(x: f64, obstacle: &Obstacle, geometry: &GeometryConfig) -> bool {
    let dist_from_front = obstacle.x - x - geometry.bird_diagonal();
    let dist_from_back = obstacle.x - x + geometry.obstacle_width;
    dist_from_front < 0.0 && dist_from_back > 0.0
}

/// Collect gap constraints and the centerline penalty at `x`.
pub fn obstacle_terms(x: f64, obstacles: &[Obstacle], geometry: &GeometryConfig) -> ObstacleTerms {
    let diagonal = geometry.bird_diagonal();
    let mut terms = ObstacleTerms::default();

    for (index, obstacle) in obstacles.iter().enumerate() {
        if !is_active(x, obstacle, geometry) {
            continue;
        }
        let center = obstacle.y - geometry.gap_height / 2.0;
        terms.constraints.push(GapConstraint {
            obstacle: index,
            lower: obstacle.y - geometry.gap_height,
            upper: obstacle.y - diagonal,
            center,
        });
        terms.penalty.add_squared_deviation(center);
    }

    terms
}
