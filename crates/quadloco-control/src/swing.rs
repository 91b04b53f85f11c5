//! Swing leg controller.
//!
//! Picks touchdown targets with a Raibert-style heuristic in the ground-aligned
//! control frame, drives one [`SwingFootTrajectory`] per leg and turns the
//! sampled foot motion into joint position/velocity commands through IK.

use log::debug;
use nalgebra::{Matrix3, Vector3};

use quadloco_core::config::{RobotParams, SwingConfig};
use quadloco_core::error::ConfigError;
use quadloco_core::traits::{GroundSurfaceEstimator, VelocityEstimator};
use quadloco_core::types::{
    ActionMap, LegIndex, LegState, MotorCommand, NUM_LEGS, RobotState, StepParameters,
};
use quadloco_kinematics::LegKinematics;

use crate::gait::GaitGenerator;
use crate::swing_trajectory::SwingFootTrajectory;

/// Raibert foothold in the control frame, before the height is fixed.
///
/// `hip` and both velocities are expressed in the control frame. The planar
/// offset from the hip is clamped to `max_reach`; `z` is copied from `hip`.
pub fn raibert_foot_target(
    hip: &Vector3<f64>,
    hip_velocity: &Vector3<f64>,
    desired_hip_velocity: &Vector3<f64>,
    stance_duration: f64,
    velocity_gain: f64,
    max_reach: f64,
) -> Vector3<f64> {
    let mut offset = hip_velocity * (stance_duration * 0.5)
        + (hip_velocity - desired_hip_velocity) * velocity_gain;
    offset.z = 0.0;
    let dist = offset.norm();
    if dist > max_reach {
        offset *= max_reach / dist;
    }
    hip + offset
}

/// Swing-phase control for all four legs.
#[derive(Debug, Clone)]
pub struct SwingLegController {
    config: SwingConfig,
    body_height: f64,
    /// Nominal foothold under each thigh joint, base frame, z ignored.
    neutral_footholds: [Vector3<f64>; NUM_LEGS],
    trajectories: [SwingFootTrajectory; NUM_LEGS],
    /// Whether the trajectory of a leg belongs to the swing in progress.
    active: [bool; NUM_LEGS],
    targets: [Vector3<f64>; NUM_LEGS],
    desired_linear: Vector3<f64>,
    desired_yaw_rate: f64,
}

impl SwingLegController {
    pub fn new(robot: &RobotParams, config: &SwingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let step = StepParameters::new(0.0, config.step_height, config.penetration);
        let trajectory = SwingFootTrajectory::new(&config.spline, step)?;
        Ok(Self {
            config: config.clone(),
            body_height: robot.body_height,
            neutral_footholds: LegIndex::ALL.map(|leg| {
                robot.hip_offset(leg) + Vector3::new(0.0, leg.side_sign() * robot.abad_length, 0.0)
            }),
            trajectories: [trajectory.clone(), trajectory.clone(), trajectory.clone(), trajectory],
            active: [false; NUM_LEGS],
            targets: [Vector3::zeros(); NUM_LEGS],
            desired_linear: Vector3::zeros(),
            desired_yaw_rate: 0.0,
        })
    }

    /// Drop every running swing. Desired speed is kept.
    pub fn reset(&mut self) {
        self.active = [false; NUM_LEGS];
        self.targets = [Vector3::zeros(); NUM_LEGS];
    }

    /// Desired body velocity in the control frame and yaw rate (rad/s).
    pub fn set_desired_speed(&mut self, linear: Vector3<f64>, yaw_rate: f64) {
        self.desired_linear = linear;
        self.desired_yaw_rate = yaw_rate;
    }

    pub const fn config(&self) -> &SwingConfig {
        &self.config
    }

    /// Current touchdown target of `leg` in base frame.
    pub const fn touchdown_target(&self, leg: LegIndex) -> &Vector3<f64> {
        &self.targets[leg.index()]
    }

    pub const fn trajectory(&self, leg: LegIndex) -> &SwingFootTrajectory {
        &self.trajectories[leg.index()]
    }

    /// Whether `leg` has a swing trajectory in flight.
    pub const fn is_active(&self, leg: LegIndex) -> bool {
        self.active[leg.index()]
    }

    /// Plan touchdown targets and start or re-target swings.
    pub fn update(
        &mut self,
        gait: &GaitGenerator,
        state: &RobotState,
        ground: &dyn GroundSurfaceEstimator,
        velocity: &dyn VelocityEstimator,
    ) {
        let base_from_control = ground.aligned_directions();
        let control_from_base = base_from_control.transpose();
        let linear = velocity.estimated_velocity();
        let angular = velocity.estimated_angular_velocity();

        for leg in LegIndex::ALL {
            let i = leg.index();
            if gait.desired_state(leg) != LegState::Swing {
                self.active[i] = false;
                continue;
            }

            let target = self.plan_target(
                leg,
                gait.stance_duration(leg),
                &base_from_control,
                &control_from_base,
                &linear,
                &angular,
            );
            let duration = gait.swing_duration(leg);

            if gait.entered_swing(leg) {
                let start = state.foot_positions[i];
                self.trajectories[i].reset_foot_trajectory(duration, &start, &target);
                self.active[i] = true;
                self.targets[i] = target;
                debug!("{leg} lift off: {start:?} -> {target:?} over {duration:.3} s");
            } else if !self.active[i] {
                // Reset or gait switch landed mid-swing: continue from the
                // foot's current position.
                let start = state.foot_positions[i];
                let phase = gait.normalized_phase(leg);
                self.trajectories[i].join_foot_trajectory(duration, phase, &start, &target);
                self.active[i] = true;
                self.targets[i] = target;
                debug!("{leg} joins swing at phase {phase:.2}: {start:?} -> {target:?}");
            } else if (target - self.targets[i]).norm() > self.config.retarget_threshold {
                let local_time = gait.normalized_phase(leg) * duration;
                if self.trajectories[i].retarget_foot_trajectory(duration, local_time, &target) {
                    debug!("{leg} re-target to {target:?} at {local_time:.3} s");
                    self.targets[i] = target;
                }
            }
        }
    }

    fn plan_target(
        &self,
        leg: LegIndex,
        stance_duration: f64,
        base_from_control: &Matrix3<f64>,
        control_from_base: &Matrix3<f64>,
        linear: &Vector3<f64>,
        angular: &Vector3<f64>,
    ) -> Vector3<f64> {
        let hip = self.neutral_footholds[leg.index()];
        let hip_c = control_from_base * hip;
        let hip_velocity = control_from_base * (linear + angular.cross(&hip));
        let desired_hip_velocity = self.desired_linear
            + Vector3::new(0.0, 0.0, self.desired_yaw_rate).cross(&hip_c);

        let mut target = raibert_foot_target(
            &hip_c,
            &hip_velocity,
            &desired_hip_velocity,
            stance_duration,
            self.config.velocity_gain,
            self.config.max_reach,
        );
        target.z = -self.body_height;
        base_from_control * target
    }

    /// Joint commands for every swing-owned leg.
    ///
    /// Legs in flight track their trajectory. A swing-owned leg with no
    /// trajectory (lost contact during stance) holds its current joint angles.
    pub fn get_action(
        &self,
        gait: &GaitGenerator,
        state: &RobotState,
        kinematics: &LegKinematics,
    ) -> ActionMap {
        let mut actions = ActionMap::new();
        for leg in LegIndex::ALL {
            if !gait.detected_state(leg).is_swing_owned() {
                continue;
            }
            let (q, qd) = if self.active[leg.index()] {
                self.track(leg, gait.normalized_phase(leg), kinematics)
            } else {
                (state.leg_joint_positions(leg), Vector3::zeros())
            };
            for (m, id) in leg.joint_ids().into_iter().enumerate() {
                actions.insert(
                    id,
                    MotorCommand::position(q[m], qd[m], self.config.kp[m], self.config.kd[m]),
                );
            }
        }
        actions
    }

    fn track(
        &self,
        leg: LegIndex,
        phase: f64,
        kinematics: &LegKinematics,
    ) -> (Vector3<f64>, Vector3<f64>) {
        let sample = self.trajectories[leg.index()].generate_trajectory_point(phase, true);
        let q = kinematics
            .inverse_kinematics(leg, &sample.position)
            .joint_positions;
        let qd = kinematics
            .joint_velocities(leg, &q, &sample.velocity)
            .unwrap_or_else(|err| {
                debug!("{err}; commanding zero joint velocity");
                Vector3::zeros()
            });
        (q, qd)
    }
}
