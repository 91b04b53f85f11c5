//! Stance leg controller.
//!
//! A PD law on the body pose gives a desired 6-dof acceleration; the force QP
//! in [`crate::qp`] distributes it over the loaded feet, and each foot force is
//! mapped to joint torques with `tau = J^T (-f)`.

use log::warn;
use nalgebra::{Matrix3, Matrix3x4, Rotation3, Vector3, Vector6};

use quadloco_core::config::{RobotParams, StanceConfig};
use quadloco_core::error::ConfigError;
use quadloco_core::traits::{GroundSurfaceEstimator, VelocityEstimator};
use quadloco_core::types::{ActionMap, GRAVITY, LegIndex, LegState, MotorCommand, NUM_LEGS, RobotState};
use quadloco_kinematics::LegKinematics;

use crate::estimator::estimate_height_in_control_frame;
use crate::gait::GaitGenerator;
use crate::qp::{ForceProblem, ForceQp};

/// Outcome of the force QP for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpStatus {
    /// Solved with every constraint.
    Optimal,
    /// Solved after dropping the acceleration box.
    Relaxed,
    /// Nothing to solve: every leg is swing-owned.
    NoStanceLegs,
    /// No solution; stance legs were commanded zero torque.
    Failed,
    /// The QP did not run for this action.
    Skipped,
}

/// Stance controller output.
#[derive(Debug, Clone, PartialEq)]
pub struct StanceAction {
    /// Torque commands for every stance-owned leg.
    pub commands: ActionMap,
    /// Ground reaction force on each foot (columns), control frame.
    pub forces: Matrix3x4<f64>,
    pub status: QpStatus,
}

/// Force-based balance controller for legs in contact.
#[derive(Debug, Clone)]
pub struct StanceLegController {
    config: StanceConfig,
    qp: ForceQp,
    weight: f64,
    body_height: f64,
    inertia_inv: Matrix3<f64>,
    /// Normal force bounds per leg, as multiples of body weight.
    f_min_ratio: [f64; NUM_LEGS],
    f_max_ratio: [f64; NUM_LEGS],
    desired_linear: Vector3<f64>,
    desired_yaw_rate: f64,
}

impl StanceLegController {
    pub fn new(robot: &RobotParams, config: &StanceConfig) -> Result<Self, ConfigError> {
        robot.validate()?;
        config.validate()?;
        let inertia_inv = robot
            .inertia_matrix()
            .try_inverse()
            .ok_or_else(|| ConfigError::invalid("robot.inertia", "must be invertible"))?;
        Ok(Self {
            config: config.clone(),
            qp: ForceQp::new(robot, config),
            weight: robot.mass * GRAVITY,
            body_height: robot.body_height,
            inertia_inv,
            f_min_ratio: [0.0; NUM_LEGS],
            f_max_ratio: [0.0; NUM_LEGS],
            desired_linear: Vector3::zeros(),
            desired_yaw_rate: 0.0,
        })
    }

    pub fn reset(&mut self) {
        self.f_min_ratio = [0.0; NUM_LEGS];
        self.f_max_ratio = [0.0; NUM_LEGS];
    }

    /// Desired body velocity in the control frame and yaw rate (rad/s).
    pub fn set_desired_speed(&mut self, linear: Vector3<f64>, yaw_rate: f64) {
        self.desired_linear = linear;
        self.desired_yaw_rate = yaw_rate;
    }

    pub const fn config(&self) -> &StanceConfig {
        &self.config
    }

    /// `(f_min_ratio, f_max_ratio)` of one leg from the last update.
    pub const fn f_ratio(&self, leg: LegIndex) -> (f64, f64) {
        (self.f_min_ratio[leg.index()], self.f_max_ratio[leg.index()])
    }

    /// Refresh the per-leg force bounds. Returns the number of stance legs.
    pub fn update(&mut self, gait: &GaitGenerator, move_base_phase: f64) -> usize {
        self.update_f_ratio(gait, move_base_phase)
    }

    /// Per-leg normal force bounds from the contact schedule.
    ///
    /// A stance leg loads over the first `ratio_ramp_phase` of its stance and
    /// unloads over the last. `move_base_phase` blends between no ramp (0)
    /// and the full ramp (1). The upper bound never drops below
    /// `ratio_floor * f_max_ratio`. Legs that touched down early load at the
    /// floor; legs that never swing are not ramped.
    pub fn update_f_ratio(&mut self, gait: &GaitGenerator, move_base_phase: f64) -> usize {
        let blend = move_base_phase.clamp(0.0, 1.0);
        let ramp = self.config.ratio_ramp_phase;
        let floor = self.config.ratio_floor;
        let mut count = 0;

        for leg in LegIndex::ALL {
            let i = leg.index();
            let detected = gait.detected_state(leg);
            if !detected.is_stance_owned() {
                self.f_min_ratio[i] = 0.0;
                self.f_max_ratio[i] = 0.0;
                continue;
            }
            count += 1;

            let load = if detected == LegState::EarlyContact {
                floor
            } else if ramp <= 0.0 || gait.swing_duration(leg) <= 0.0 {
                1.0
            } else {
                let sub = gait.normalized_phase(leg);
                let ramped = (sub / ramp).min((1.0 - sub) / ramp).min(1.0);
                (1.0 - blend * (1.0 - ramped)).max(floor)
            };
            self.f_max_ratio[i] = self.config.f_max_ratio * load;
            self.f_min_ratio[i] = self.config.f_min_ratio.min(self.f_max_ratio[i]);
        }
        count
    }

    /// PD body acceleration `[x, y, z, roll, pitch, yaw]` in the control
    /// frame, clipped to `[min_ddq, max_ddq]`.
    pub fn desired_acceleration(
        &self,
        gait: &GaitGenerator,
        state: &RobotState,
        ground: &dyn GroundSurfaceEstimator,
        velocity: &dyn VelocityEstimator,
    ) -> Vector6<f64> {
        let control_from_base = ground.aligned_directions().transpose();
        let height = estimate_height_in_control_frame(state, gait, ground, self.body_height);
        let (roll, pitch, _) = Rotation3::from_matrix_unchecked(control_from_base).euler_angles();

        // x, y and yaw are velocity-controlled: their position error is zero.
        let pose = Vector6::new(0.0, 0.0, height, roll, pitch, 0.0);
        let desired_pose = Vector6::new(0.0, 0.0, self.body_height, 0.0, 0.0, 0.0);

        let linear = control_from_base * velocity.estimated_velocity();
        let angular = control_from_base * velocity.estimated_angular_velocity();
        let twist = Vector6::new(linear.x, linear.y, linear.z, angular.x, angular.y, angular.z);
        let desired_twist = Vector6::new(
            self.desired_linear.x,
            self.desired_linear.y,
            0.0,
            0.0,
            0.0,
            self.desired_yaw_rate,
        );

        let kp = Vector6::from(self.config.kp);
        let kd = Vector6::from(self.config.kd);
        let ddq = kp.component_mul(&(desired_pose - pose)) + kd.component_mul(&(desired_twist - twist));
        Vector6::from_fn(|i, _| ddq[i].clamp(self.config.min_ddq[i], self.config.max_ddq[i]))
    }

    /// Solve for foot forces and turn them into joint torques.
    pub fn get_action(
        &self,
        gait: &GaitGenerator,
        state: &RobotState,
        ground: &dyn GroundSurfaceEstimator,
        velocity: &dyn VelocityEstimator,
        kinematics: &LegKinematics,
    ) -> StanceAction {
        let loaded = gait.stance_owned();
        if !loaded.iter().any(|&l| l) {
            return StanceAction {
                commands: ActionMap::new(),
                forces: Matrix3x4::zeros(),
                status: QpStatus::NoStanceLegs,
            };
        }

        let base_from_control = ground.aligned_directions();
        let control_from_base = base_from_control.transpose();
        let problem = ForceProblem {
            foot_positions: state.foot_positions.map(|p| control_from_base * p),
            inertia_inv: control_from_base * self.inertia_inv * base_from_control,
            ddq_desired: self.desired_acceleration(gait, state, ground, velocity),
            loaded,
            fz_min: self.f_min_ratio.map(|r| r * self.weight),
            fz_max: self.f_max_ratio.map(|r| r * self.weight),
        };

        let (forces, status) = self.solve(&problem);
        let mut commands = ActionMap::new();
        let mut force_matrix = Matrix3x4::zeros();
        for leg in LegIndex::ALL {
            let i = leg.index();
            if !loaded[i] {
                continue;
            }
            let torques = match &forces {
                Some(forces) => {
                    force_matrix.set_column(i, &forces[i]);
                    let f_base = base_from_control * forces[i];
                    kinematics.contact_force_to_torques(leg, &state.leg_joint_positions(leg), &-f_base)
                }
                None => Vector3::zeros(),
            };
            for (m, id) in leg.joint_ids().into_iter().enumerate() {
                commands.insert(id, MotorCommand::torque(torques[m]));
            }
        }

        StanceAction {
            commands,
            forces: force_matrix,
            status,
        }
    }

    fn solve(&self, problem: &ForceProblem) -> (Option<[Vector3<f64>; NUM_LEGS]>, QpStatus) {
        let finite = problem.ddq_desired.iter().all(|v| v.is_finite())
            && problem.foot_positions.iter().all(|p| p.iter().all(|v| v.is_finite()));
        if !finite {
            warn!("non-finite stance QP input, commanding zero torque");
            return (None, QpStatus::Failed);
        }
        if let Some(forces) = self.qp.solve(problem, true) {
            return (Some(forces), QpStatus::Optimal);
        }
        warn!("stance QP infeasible with acceleration box, retrying without it");
        if let Some(forces) = self.qp.solve(problem, false) {
            return (Some(forces), QpStatus::Relaxed);
        }
        warn!("stance QP failed, commanding zero torque");
        (None, QpStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quadloco_core::config::{GaitConfig, GaitType};
    use quadloco_test_utils::{FixedGroundEstimator, FixedVelocityEstimator, a1_config, standing_state};

    fn controller() -> StanceLegController {
        let config = a1_config();
        StanceLegController::new(&config.robot, &config.stance).unwrap()
    }

    fn standing_gait() -> GaitGenerator {
        let mut gait = GaitGenerator::new(GaitConfig::preset(GaitType::Stand));
        gait.update(0.1, &[true; NUM_LEGS]);
        gait
    }

    #[test]
    fn ratios_ramp_in_at_touchdown() {
        let mut gait = GaitGenerator::new(GaitConfig::preset(GaitType::Trot));
        gait.update(0.01, &[true; NUM_LEGS]);
        let mut stance = controller();

        assert_eq!(stance.update(&gait, 1.0), NUM_LEGS);
        // FR is 1/30 into stance: a third of the way up the ramp.
        let (f_min, f_max) = stance.f_ratio(LegIndex::FrontRight);
        assert_relative_eq!(f_max, 10.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(f_min, 0.01);
        // FL is mid-stance.
        assert_relative_eq!(stance.f_ratio(LegIndex::FrontLeft).1, 10.0, epsilon = 1e-9);

        stance.update(&gait, 0.0);
        assert_relative_eq!(stance.f_ratio(LegIndex::FrontRight).1, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn ratio_never_drops_below_floor() {
        let mut gait = GaitGenerator::new(GaitConfig::preset(GaitType::Trot));
        gait.update(0.001, &[true; NUM_LEGS]);
        let mut stance = controller();
        stance.update(&gait, 1.0);
        assert_relative_eq!(stance.f_ratio(LegIndex::FrontRight).1, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn swing_legs_have_zero_bounds() {
        let mut gait = GaitGenerator::new(GaitConfig::preset(GaitType::Trot));
        gait.update(0.06, &[true, false, false, true]);
        let mut stance = controller();
        assert_eq!(stance.update(&gait, 1.0), 2);
        assert_eq!(stance.f_ratio(LegIndex::FrontLeft), (0.0, 0.0));
    }

    #[test]
    fn level_standing_needs_no_correction() {
        let config = a1_config();
        let state = standing_state(&config);
        let ddq = controller().desired_acceleration(
            &standing_gait(),
            &state,
            &FixedGroundEstimator::level(),
            &FixedVelocityEstimator::at_rest(),
        );
        assert_relative_eq!(ddq, Vector6::zeros(), epsilon = 1e-9);
    }

    #[test]
    fn sagging_body_is_pushed_up_and_clipped() {
        let config = a1_config();
        let mut state = standing_state(&config);
        for foot in &mut state.foot_positions {
            foot.z += 0.02;
        }
        let stance = controller();
        let gait = standing_gait();
        let ground = FixedGroundEstimator::level();
        let ddq = stance.desired_acceleration(&gait, &state, &ground, &FixedVelocityEstimator::at_rest());
        assert_relative_eq!(ddq[2], 2.0, epsilon = 1e-9);

        let falling = FixedVelocityEstimator::new(Vector3::new(0.0, 0.0, -2.0), Vector3::zeros());
        let ddq = stance.desired_acceleration(&gait, &state, &ground, &falling);
        assert_relative_eq!(ddq[2], config.stance.max_ddq[2], epsilon = 1e-12);
    }

    #[test]
    fn standing_forces_carry_body_weight() {
        let config = a1_config();
        let state = standing_state(&config);
        let gait = standing_gait();
        let mut stance = controller();
        stance.update(&gait, 1.0);
        let kin = LegKinematics::from_params(&config.robot);
        let action = stance.get_action(
            &gait,
            &state,
            &FixedGroundEstimator::level(),
            &FixedVelocityEstimator::at_rest(),
            &kin,
        );

        assert_eq!(action.status, QpStatus::Optimal);
        assert_eq!(action.commands.len(), 12);
        let total_fz: f64 = action.forces.row(2).sum();
        assert_relative_eq!(total_fz, config.robot.mass * GRAVITY, epsilon = 1.0);

        let leg = LegIndex::RearLeft;
        let q = state.leg_joint_positions(leg);
        let expected = kin.contact_force_to_torques(leg, &q, &-action.forces.column(3).into_owned());
        for (m, id) in leg.joint_ids().into_iter().enumerate() {
            let cmd = action.commands[&id];
            assert_relative_eq!(cmd.torque, expected[m], epsilon = 1e-9);
            assert_relative_eq!(cmd.kp, 0.0);
            assert_relative_eq!(cmd.kd, 0.0);
        }
    }

    #[test]
    fn swing_legs_are_absent_and_unforced() {
        let config = a1_config();
        let state = standing_state(&config);
        let mut gait = GaitGenerator::new(GaitConfig::preset(GaitType::Trot));
        gait.update(0.06, &[true, false, false, true]);
        let mut stance = controller();
        stance.update(&gait, 1.0);
        let action = stance.get_action(
            &gait,
            &state,
            &FixedGroundEstimator::level(),
            &FixedVelocityEstimator::at_rest(),
            &LegKinematics::from_params(&config.robot),
        );

        assert_ne!(action.status, QpStatus::Failed);
        let joints: Vec<_> = action.commands.keys().copied().collect();
        assert_eq!(joints, vec![0, 1, 2, 9, 10, 11]);
        assert!(action.forces.column(1).norm() < 1e-4);
        assert!(action.forces.column(2).norm() < 1e-4);
    }

    #[test]
    fn all_swing_short_circuits() {
        let config = a1_config();
        let state = standing_state(&config);
        let mut table = GaitConfig::preset(GaitType::Trot);
        table.phase_offset = [0.6; NUM_LEGS];
        let gait = GaitGenerator::new(table);
        let mut stance = controller();
        assert_eq!(stance.update(&gait, 1.0), 0);
        let action = stance.get_action(
            &gait,
            &state,
            &FixedGroundEstimator::level(),
            &FixedVelocityEstimator::at_rest(),
            &LegKinematics::from_params(&config.robot),
        );
        assert_eq!(action.status, QpStatus::NoStanceLegs);
        assert!(action.commands.is_empty());
        assert_eq!(action.forces, Matrix3x4::zeros());
    }

    #[test]
    fn infeasible_box_is_relaxed() {
        let config = a1_config();
        let stance_config = StanceConfig {
            max_ddq: [10.0, 10.0, -20.0, 20.0, 20.0, 20.0],
            min_ddq: [-10.0, -10.0, -30.0, -20.0, -20.0, -20.0],
            ..StanceConfig::default()
        };
        let mut stance = StanceLegController::new(&config.robot, &stance_config).unwrap();
        let state = standing_state(&config);
        let gait = standing_gait();
        stance.update(&gait, 1.0);
        let action = stance.get_action(
            &gait,
            &state,
            &FixedGroundEstimator::level(),
            &FixedVelocityEstimator::at_rest(),
            &LegKinematics::from_params(&config.robot),
        );
        assert_eq!(action.status, QpStatus::Relaxed);
        assert!(action.forces.row(2).iter().all(|&fz| fz > 0.0));
    }

    #[test]
    fn bad_estimate_fails_safe() {
        let config = a1_config();
        let state = standing_state(&config);
        let gait = standing_gait();
        let mut stance = controller();
        stance.update(&gait, 1.0);
        let broken = FixedVelocityEstimator::new(Vector3::new(f64::NAN, 0.0, 0.0), Vector3::zeros());
        let action = stance.get_action(
            &gait,
            &state,
            &FixedGroundEstimator::level(),
            &broken,
            &LegKinematics::from_params(&config.robot),
        );
        assert_eq!(action.status, QpStatus::Failed);
        assert_eq!(action.commands.len(), 12);
        assert!(action.commands.values().all(|cmd| *cmd == MotorCommand::zero()));
        assert_eq!(action.forces, Matrix3x4::zeros());
    }
}
