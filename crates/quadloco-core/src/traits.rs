//! Contracts of the estimators the locomotion core consumes.
//!
//! Estimators are owned by the surrounding stack; the locomotion controller
//! borrows them for its lifetime and drives their `update` once per tick.

use nalgebra::{Matrix3, Vector3};

use crate::types::{NUM_LEGS, RobotState};

// ---------------------------------------------------------------------------
// GroundSurfaceEstimator
// ---------------------------------------------------------------------------

/// Estimates the local ground plane under the robot.
pub trait GroundSurfaceEstimator {
    /// Forget all history.
    fn reset(&mut self);

    /// Fold in the latest snapshot. `contacts[leg]` is true for stance-like legs.
    fn update(&mut self, state: &RobotState, contacts: &[bool; NUM_LEGS]);

    /// Rotation whose columns are the control-frame axes expressed in base
    /// frame. The third column is the ground normal.
    fn aligned_directions(&self) -> Matrix3<f64>;
}

// ---------------------------------------------------------------------------
// VelocityEstimator
// ---------------------------------------------------------------------------

/// Estimates base velocity.
pub trait VelocityEstimator {
    /// Forget all history.
    fn reset(&mut self);

    /// Fold in the latest snapshot; `dt` is the time since the previous call.
    fn update(&mut self, state: &RobotState, dt: f64);

    /// Base linear velocity in base frame.
    fn estimated_velocity(&self) -> Vector3<f64>;

    /// Base angular velocity in base frame.
    fn estimated_angular_velocity(&self) -> Vector3<f64>;
}
