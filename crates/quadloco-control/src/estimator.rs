//! Reference estimators for the traits in [`quadloco_core::traits`].
//!
//! Small, dependency-free implementations good enough for flat-ground
//! walking and for driving the controller in tests and simulation.

use std::collections::VecDeque;

use nalgebra::{Matrix3, Rotation3, Vector3};

use quadloco_core::traits::{GroundSurfaceEstimator, VelocityEstimator};
use quadloco_core::types::{LegIndex, LegState, NUM_LEGS, RobotState};

use crate::gait::GaitGenerator;

const DEFAULT_VELOCITY_WINDOW: usize = 20;
const DEFAULT_DISPLACEMENT_SCALE: f64 = 1.1;

// ---------------------------------------------------------------------------
// FlatGroundEstimator
// ---------------------------------------------------------------------------

/// Assumes the ground is the world horizontal plane.
///
/// The control frame is the yaw-aligned world frame, so it equals the base
/// frame whenever the base is level.
#[derive(Debug, Clone)]
pub struct FlatGroundEstimator {
    directions: Matrix3<f64>,
}

impl FlatGroundEstimator {
    pub fn new() -> Self {
        Self {
            directions: Matrix3::identity(),
        }
    }
}

impl Default for FlatGroundEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl GroundSurfaceEstimator for FlatGroundEstimator {
    fn reset(&mut self) {
        self.directions = Matrix3::identity();
    }

    fn update(&mut self, state: &RobotState, _contacts: &[bool; NUM_LEGS]) {
        let world_from_base = state.base_orientation.to_rotation_matrix();
        let (_, _, yaw) = state.base_orientation.euler_angles();
        let world_from_control = Rotation3::from_axis_angle(&Vector3::z_axis(), yaw);
        self.directions = *(world_from_base.inverse() * world_from_control).matrix();
    }

    fn aligned_directions(&self) -> Matrix3<f64> {
        self.directions
    }
}

// ---------------------------------------------------------------------------
// FilteredVelocityEstimator
// ---------------------------------------------------------------------------

/// Moving-window average of the base velocity reported in the snapshot.
#[derive(Debug, Clone)]
pub struct FilteredVelocityEstimator {
    window: usize,
    samples: VecDeque<Vector3<f64>>,
    sum: Vector3<f64>,
    angular: Vector3<f64>,
}

impl FilteredVelocityEstimator {
    /// `window` is clamped to at least one sample.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: Vector3::zeros(),
            angular: Vector3::zeros(),
        }
    }

    pub const fn window(&self) -> usize {
        self.window
    }
}

impl Default for FilteredVelocityEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_VELOCITY_WINDOW)
    }
}

impl VelocityEstimator for FilteredVelocityEstimator {
    fn reset(&mut self) {
        self.samples.clear();
        self.sum = Vector3::zeros();
        self.angular = Vector3::zeros();
    }

    fn update(&mut self, state: &RobotState, _dt: f64) {
        if self.samples.len() == self.window {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum -= oldest;
            }
        }
        self.samples.push_back(state.base_linear_velocity);
        self.sum += state.base_linear_velocity;
        self.angular = state.base_angular_velocity;
    }

    fn estimated_velocity(&self) -> Vector3<f64> {
        if self.samples.is_empty() {
            Vector3::zeros()
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    fn estimated_angular_velocity(&self) -> Vector3<f64> {
        self.angular
    }
}

// ---------------------------------------------------------------------------
// Height estimation
// ---------------------------------------------------------------------------

/// Base height above the ground along the control-frame normal.
///
/// Averages foot depth over legs that bear load: desired stance, or early
/// contact during swing. Returns `fallback` while every foot is airborne.
pub fn estimate_height_in_control_frame(
    state: &RobotState,
    gait: &GaitGenerator,
    ground: &dyn GroundSurfaceEstimator,
    fallback: f64,
) -> f64 {
    let control_from_base = ground.aligned_directions().transpose();
    let depths: Vec<f64> = LegIndex::ALL
        .iter()
        .filter(|&&leg| {
            gait.desired_state(leg) == LegState::Stance
                || gait.detected_state(leg) == LegState::EarlyContact
        })
        .map(|leg| -(control_from_base * state.foot_positions[leg.index()]).z)
        .collect();
    if depths.is_empty() {
        fallback
    } else {
        depths.iter().sum::<f64>() / depths.len() as f64
    }
}

// ---------------------------------------------------------------------------
// OdometryPoseEstimator
// ---------------------------------------------------------------------------

/// Planar dead reckoning from estimated velocity.
///
/// Integrated displacement is multiplied by `displacement_scale`, an
/// empirical calibration factor compensating systematic velocity
/// under-estimation.
#[derive(Debug, Clone)]
pub struct OdometryPoseEstimator {
    pub displacement_scale: f64,
    position: Vector3<f64>,
    yaw: f64,
}

impl OdometryPoseEstimator {
    pub fn new(displacement_scale: f64) -> Self {
        Self {
            displacement_scale,
            position: Vector3::zeros(),
            yaw: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.position = Vector3::zeros();
        self.yaw = 0.0;
    }

    /// Integrate one tick of `dt` seconds.
    pub fn update(
        &mut self,
        state: &RobotState,
        gait: &GaitGenerator,
        ground: &dyn GroundSurfaceEstimator,
        velocity: &dyn VelocityEstimator,
        dt: f64,
    ) {
        let heading = Rotation3::from_axis_angle(&Vector3::z_axis(), self.yaw);
        let control_from_base = ground.aligned_directions().transpose();
        let v_control = control_from_base * velocity.estimated_velocity();
        let displacement = heading * (v_control * dt);
        self.position.x += self.displacement_scale * displacement.x;
        self.position.y += self.displacement_scale * displacement.y;
        self.position.z = estimate_height_in_control_frame(state, gait, ground, self.position.z);
        self.yaw += (control_from_base * velocity.estimated_angular_velocity()).z * dt;
    }

    pub const fn position(&self) -> &Vector3<f64> {
        &self.position
    }

    pub const fn yaw(&self) -> f64 {
        self.yaw
    }
}

impl Default for OdometryPoseEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLACEMENT_SCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use quadloco_core::config::{GaitConfig, GaitType};
    use quadloco_test_utils::{FixedGroundEstimator, FixedVelocityEstimator, a1_config, standing_state};

    #[test]
    fn flat_ground_is_identity_for_level_base() {
        let mut ground = FlatGroundEstimator::new();
        let mut state = RobotState::default();
        state.base_orientation = UnitQuaternion::from_euler_angles(0.0, 0.0, 1.2);
        ground.update(&state, &[true; NUM_LEGS]);
        assert_relative_eq!(ground.aligned_directions(), Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn flat_ground_normal_follows_base_pitch() {
        let mut ground = FlatGroundEstimator::new();
        let mut state = RobotState::default();
        state.base_orientation = UnitQuaternion::from_euler_angles(0.0, 0.2, 0.0);
        ground.update(&state, &[true; NUM_LEGS]);
        // World up seen from a nose-down base tilts backwards.
        let normal = ground.aligned_directions().column(2).into_owned();
        assert_relative_eq!(normal, Vector3::new(-(0.2_f64.sin()), 0.0, 0.2_f64.cos()), epsilon = 1e-12);
    }

    #[test]
    fn velocity_window_averages() {
        let mut est = FilteredVelocityEstimator::new(4);
        let mut state = RobotState::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
            state.base_linear_velocity = Vector3::new(v, 0.0, 0.0);
            est.update(&state, 0.001);
        }
        assert_relative_eq!(est.estimated_velocity().x, 4.5, epsilon = 1e-12);
        est.reset();
        assert_relative_eq!(est.estimated_velocity(), Vector3::zeros());
        assert_eq!(FilteredVelocityEstimator::default().window(), 20);
    }

    #[test]
    fn height_from_stance_feet() {
        let config = a1_config();
        let state = standing_state(&config);
        let gait = GaitGenerator::new(GaitConfig::preset(GaitType::Stand));
        let ground = FixedGroundEstimator::level();
        let h = estimate_height_in_control_frame(&state, &gait, &ground, 0.0);
        assert_relative_eq!(h, config.robot.body_height, epsilon = 1e-9);
    }

    #[test]
    fn height_falls_back_when_airborne() {
        let config = a1_config();
        let state = standing_state(&config);
        // Every leg starts at phase 0.6 = duty factor: all in swing.
        let mut table = GaitConfig::preset(GaitType::Trot);
        table.phase_offset = [0.6; NUM_LEGS];
        let gait = GaitGenerator::new(table);
        let ground = FixedGroundEstimator::level();
        assert_relative_eq!(estimate_height_in_control_frame(&state, &gait, &ground, 0.31), 0.31);
    }

    #[test]
    fn odometry_applies_displacement_scale() {
        let config = a1_config();
        let state = standing_state(&config);
        let gait = GaitGenerator::new(GaitConfig::preset(GaitType::Stand));
        let ground = FixedGroundEstimator::level();
        let velocity = FixedVelocityEstimator::new(Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.5));
        let mut odom = OdometryPoseEstimator::default();
        for _ in 0..100 {
            odom.update(&state, &gait, &ground, &velocity, 0.01);
        }
        assert_relative_eq!(odom.yaw(), 0.5, epsilon = 1e-9);
        // Arc of radius 2 over 0.5 rad, scaled by 1.1.
        let forward: f64 = (0..100).map(|k| (0.005 * f64::from(k)).cos() * 0.01).sum();
        assert_relative_eq!(odom.position().x, 1.1 * forward, epsilon = 1e-9);
        assert_relative_eq!(odom.position().z, config.robot.body_height, epsilon = 1e-9);
        odom.reset();
        assert_relative_eq!(*odom.position(), Vector3::zeros());
    }
}
