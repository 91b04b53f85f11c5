//! Mock implementations of the estimator traits for testing.
//!
//! Both mocks return fixed values and count how often the controller drives
//! them, so tests can check call order and frequency.

use nalgebra::{Matrix3, Rotation3, Vector3};
use quadloco_core::traits::{GroundSurfaceEstimator, VelocityEstimator};
use quadloco_core::types::{NUM_LEGS, RobotState};

// ---------------------------------------------------------------------------
// FixedGroundEstimator
// ---------------------------------------------------------------------------

/// Ground estimator reporting a constant control frame.
#[derive(Debug, Clone)]
pub struct FixedGroundEstimator {
    directions: Matrix3<f64>,
    pub updates: usize,
    pub resets: usize,
    pub last_contacts: [bool; NUM_LEGS],
}

impl FixedGroundEstimator {
    pub fn new(directions: Matrix3<f64>) -> Self {
        Self {
            directions,
            updates: 0,
            resets: 0,
            last_contacts: [false; NUM_LEGS],
        }
    }

    /// Level ground under a level base.
    pub fn level() -> Self {
        Self::new(Matrix3::identity())
    }

    /// Ground pitched by `angle` rad relative to the base.
    pub fn pitched(angle: f64) -> Self {
        Self::new(*Rotation3::from_axis_angle(&Vector3::y_axis(), angle).matrix())
    }
}

impl GroundSurfaceEstimator for FixedGroundEstimator {
    fn reset(&mut self) {
        self.resets += 1;
    }

    fn update(&mut self, _state: &RobotState, contacts: &[bool; NUM_LEGS]) {
        self.updates += 1;
        self.last_contacts = *contacts;
    }

    fn aligned_directions(&self) -> Matrix3<f64> {
        self.directions
    }
}

// ---------------------------------------------------------------------------
// FixedVelocityEstimator
// ---------------------------------------------------------------------------

/// Velocity estimator reporting a constant twist.
#[derive(Debug, Clone, Default)]
pub struct FixedVelocityEstimator {
    pub linear: Vector3<f64>,
    pub angular: Vector3<f64>,
    pub updates: usize,
    pub resets: usize,
}

impl FixedVelocityEstimator {
    pub fn new(linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        Self {
            linear,
            angular,
            ..Self::default()
        }
    }

    pub fn at_rest() -> Self {
        Self::default()
    }
}

impl VelocityEstimator for FixedVelocityEstimator {
    fn reset(&mut self) {
        self.resets += 1;
    }

    fn update(&mut self, _state: &RobotState, _dt: f64) {
        self.updates += 1;
    }

    fn estimated_velocity(&self) -> Vector3<f64> {
        self.linear
    }

    fn estimated_angular_velocity(&self) -> Vector3<f64> {
        self.angular
    }
}
