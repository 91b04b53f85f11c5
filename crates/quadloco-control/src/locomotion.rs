//! Top-level locomotion loop.
//!
//! Once per tick the driver calls [`LocomotionController::update`] with a fresh
//! [`RobotState`], then [`LocomotionController::get_action`]. Inside `update`
//! the stages run strictly in order: gait, ground estimator, velocity
//! estimator, swing, stance.
//!
//! The gait runs on controller time: seconds since the last reset, minus any
//! time spent paused. While paused every stage still runs each tick, with the
//! gait evaluated at the frozen time so contact sensing keeps correcting the
//! detected leg states.

use log::{debug, info};
use nalgebra::{Matrix3x4, Vector3};

use quadloco_core::config::{GaitConfig, LocomotionConfig};
use quadloco_core::error::{ConfigError, ControlError};
use quadloco_core::traits::{GroundSurfaceEstimator, VelocityEstimator};
use quadloco_core::types::{ActionMap, MotorCommand, NUM_MOTORS, RobotState};
use quadloco_kinematics::LegKinematics;

use crate::gait::GaitGenerator;
use crate::stance::{QpStatus, StanceLegController};
use crate::swing::SwingLegController;

/// Lifecycle of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerMode {
    /// Constructed but never reset.
    Idle,
    Running,
    /// Gait clock frozen; contact sensing and stance keep running.
    Paused,
}

/// Everything the controller produces in one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct LocomotionAction {
    /// One command per motor, indexed by joint id.
    pub commands: [MotorCommand; NUM_MOTORS],
    /// Ground reaction forces from the stance QP, control frame.
    pub forces: Matrix3x4<f64>,
    pub qp_status: QpStatus,
}

impl LocomotionAction {
    /// Limp action: zero gains and torque on every motor, no contact forces.
    ///
    /// Needs no controller state, so drivers can send it before the first
    /// reset or while the robot is being set down.
    pub fn zero() -> Self {
        Self {
            commands: [MotorCommand::zero(); NUM_MOTORS],
            forces: Matrix3x4::zeros(),
            qp_status: QpStatus::Skipped,
        }
    }
}

/// Merge per-controller maps into one command per motor.
///
/// Every joint must be commanded by exactly one of the two maps.
pub fn merge_actions(
    swing: &ActionMap,
    stance: &ActionMap,
) -> Result<[MotorCommand; NUM_MOTORS], ControlError> {
    let mut commands = [MotorCommand::zero(); NUM_MOTORS];
    for (joint, command) in commands.iter_mut().enumerate() {
        *command = match (swing.get(&joint), stance.get(&joint)) {
            (Some(cmd), None) | (None, Some(cmd)) => *cmd,
            (Some(_), Some(_)) => return Err(ControlError::JointOwnershipConflict { joint }),
            (None, None) => return Err(ControlError::MissingJointCommand { joint }),
        };
    }
    Ok(commands)
}

/// Gait, swing and stance control for one quadruped.
///
/// Estimators are owned by the caller and borrowed for the controller's
/// lifetime; the controller drives their `reset` and `update`.
pub struct LocomotionController<'a> {
    config: LocomotionConfig,
    kinematics: LegKinematics,
    gait: GaitGenerator,
    swing: SwingLegController,
    stance: StanceLegController,
    ground: &'a mut dyn GroundSurfaceEstimator,
    velocity: &'a mut dyn VelocityEstimator,
    mode: ControllerMode,
    /// Robot clock value that corresponds to controller time zero.
    reset_time: f64,
    /// Controller time of the last gait update.
    elapsed: f64,
    /// Robot clock of the last update, for estimator `dt`.
    last_state_time: f64,
    /// Robot clock value at which the current pause began.
    pause_started: f64,
    move_base_phase: f64,
    stepping: bool,
    remaining_steps: usize,
}

impl<'a> LocomotionController<'a> {
    pub fn new(
        config: LocomotionConfig,
        ground: &'a mut dyn GroundSurfaceEstimator,
        velocity: &'a mut dyn VelocityEstimator,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            kinematics: LegKinematics::from_params(&config.robot),
            gait: GaitGenerator::new(config.gait.clone()),
            swing: SwingLegController::new(&config.robot, &config.swing)?,
            stance: StanceLegController::new(&config.robot, &config.stance)?,
            config,
            ground,
            velocity,
            mode: ControllerMode::Idle,
            reset_time: 0.0,
            elapsed: 0.0,
            last_state_time: 0.0,
            pause_started: 0.0,
            move_base_phase: 1.0,
            stepping: false,
            remaining_steps: 0,
        })
    }

    /// Restart every stage with `state.time` as controller time zero.
    pub fn reset(&mut self, state: &RobotState) {
        info!("locomotion reset at t={:.3}", state.time);
        self.gait.reset(0.0);
        self.swing.reset();
        self.stance.reset();
        self.ground.reset();
        self.velocity.reset();
        self.reset_time = state.time;
        self.elapsed = 0.0;
        self.last_state_time = state.time;
        self.pause_started = state.time;
        self.remaining_steps = 0;
        self.mode = ControllerMode::Running;
    }

    /// Advance all stages to `state`.
    pub fn update(&mut self, state: &RobotState) -> Result<(), ControlError> {
        match self.mode {
            ControllerMode::Idle => return Err(ControlError::NotReset),
            ControllerMode::Running => self.advance_clock(state),
            ControllerMode::Paused => {}
        }
        self.gait.update(self.elapsed, &state.foot_contacts);

        self.ground.update(state, &self.gait.stance_owned());
        let dt = (state.time - self.last_state_time).max(0.0);
        self.velocity.update(state, dt);
        self.last_state_time = state.time;

        self.swing
            .update(&self.gait, state, &*self.ground, &*self.velocity);
        self.stance.update(&self.gait, self.move_base_phase);
        Ok(())
    }

    /// Move controller time to `state`, unless stepping mode has to pause
    /// before an unpaid liftoff.
    fn advance_clock(&mut self, state: &RobotState) {
        let elapsed = state.time - self.reset_time;
        if self.stepping && self.gait.liftoff_pending(elapsed) {
            if self.remaining_steps == 0 {
                info!("step budget spent, pausing before liftoff at t={elapsed:.3}");
                self.enter_pause();
                return;
            }
            self.remaining_steps -= 1;
            debug!("step granted, {} left", self.remaining_steps);
        }
        self.elapsed = elapsed;
    }

    fn enter_pause(&mut self) {
        self.pause_started = self.reset_time + self.elapsed;
        self.mode = ControllerMode::Paused;
    }

    /// Merged motor commands for the current tick.
    pub fn get_action(&self, state: &RobotState) -> Result<LocomotionAction, ControlError> {
        if self.mode == ControllerMode::Idle {
            return Err(ControlError::NotReset);
        }
        let swing = self.swing.get_action(&self.gait, state, &self.kinematics);
        let stance = self.stance.get_action(
            &self.gait,
            state,
            &*self.ground,
            &*self.velocity,
            &self.kinematics,
        );
        let merged = merge_actions(&swing, &stance.commands);
        debug_assert!(merged.is_ok(), "swing/stance ownership broken: {merged:?}");
        Ok(LocomotionAction {
            commands: merged?,
            forces: stance.forces,
            qp_status: stance.status,
        })
    }

    /// `update` followed by `get_action`.
    pub fn tick(&mut self, state: &RobotState) -> Result<LocomotionAction, ControlError> {
        self.update(state)?;
        self.get_action(state)
    }

    /// Freeze the gait clock. Every stage keeps running at the frozen time.
    pub fn pause(&mut self, state: &RobotState) -> Result<(), ControlError> {
        match self.mode {
            ControllerMode::Idle => Err(ControlError::NotReset),
            ControllerMode::Paused => Ok(()),
            ControllerMode::Running => {
                info!("locomotion paused at t={:.3}", state.time);
                self.enter_pause();
                Ok(())
            }
        }
    }

    /// Resume from a pause, and in stepping mode grant one more step.
    ///
    /// Time spent paused is folded into the reset epoch, so the gait resumes
    /// from the phase it was frozen at.
    pub fn forward_one(&mut self, state: &RobotState) -> Result<(), ControlError> {
        match self.mode {
            ControllerMode::Idle => return Err(ControlError::NotReset),
            ControllerMode::Paused => {
                self.reset_time += state.time - self.pause_started;
                self.mode = ControllerMode::Running;
                info!("locomotion resumed at t={:.3}", state.time);
            }
            ControllerMode::Running => {}
        }
        if self.stepping {
            self.remaining_steps += 1;
        }
        Ok(())
    }

    /// In stepping mode every liftoff needs a step granted by `forward_one`.
    pub fn set_stepping_mode(&mut self, enabled: bool) {
        self.stepping = enabled;
        self.remaining_steps = 0;
    }

    pub const fn stepping_mode(&self) -> bool {
        self.stepping
    }

    pub const fn remaining_steps(&self) -> usize {
        self.remaining_steps
    }

    /// Desired body velocity in the control frame and yaw rate (rad/s).
    pub fn set_desired_speed(&mut self, linear: Vector3<f64>, yaw_rate: f64) {
        self.swing.set_desired_speed(linear, yaw_rate);
        self.stance.set_desired_speed(linear, yaw_rate);
    }

    /// Swap the gait timing table; the new gait starts at the current phase origin.
    pub fn switch_gait(&mut self, config: GaitConfig) -> Result<(), ConfigError> {
        self.gait.switch_gait(config.clone(), self.elapsed)?;
        self.config.gait = config;
        self.swing.reset();
        Ok(())
    }

    /// How strongly stance loads ramp at touchdown and liftoff, in `[0, 1]`.
    pub fn set_move_base_phase(&mut self, phase: f64) {
        self.move_base_phase = phase.clamp(0.0, 1.0);
    }

    pub const fn mode(&self) -> ControllerMode {
        self.mode
    }

    /// Controller time of the last gait update (s).
    pub const fn elapsed_time(&self) -> f64 {
        self.elapsed
    }

    pub const fn config(&self) -> &LocomotionConfig {
        &self.config
    }

    pub const fn gait(&self) -> &GaitGenerator {
        &self.gait
    }

    pub const fn swing(&self) -> &SwingLegController {
        &self.swing
    }

    pub const fn stance(&self) -> &StanceLegController {
        &self.stance
    }

    pub const fn kinematics(&self) -> &LegKinematics {
        &self.kinematics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quadloco_core::types::LegIndex;
    use quadloco_test_utils::{FixedGroundEstimator, FixedVelocityEstimator, a1_config, standing_state};

    fn map(joints: impl IntoIterator<Item = usize>, torque: f64) -> ActionMap {
        joints
            .into_iter()
            .map(|j| (j, MotorCommand::torque(torque)))
            .collect()
    }

    #[test]
    fn merge_takes_each_joint_from_its_owner() {
        let swing = map(LegIndex::FrontLeft.joint_ids(), 1.0);
        let stance = map((0..NUM_MOTORS).filter(|j| !(3..6).contains(j)), 2.0);
        let merged = merge_actions(&swing, &stance).unwrap();
        for (joint, cmd) in merged.iter().enumerate() {
            let expected = if (3..6).contains(&joint) { 1.0 } else { 2.0 };
            assert_relative_eq!(cmd.torque, expected);
        }
    }

    #[test]
    fn zero_action_is_limp() {
        let action = LocomotionAction::zero();
        assert_eq!(action.qp_status, QpStatus::Skipped);
        assert_relative_eq!(action.forces.norm(), 0.0);
        for cmd in action.commands {
            assert_eq!(cmd, MotorCommand::zero());
            assert_relative_eq!(cmd.kp + cmd.kd + cmd.torque, 0.0);
        }
    }

    #[test]
    fn merge_rejects_double_ownership() {
        let swing = map([0, 1, 2], 1.0);
        let stance = map(0..NUM_MOTORS, 2.0);
        assert_eq!(
            merge_actions(&swing, &stance),
            Err(ControlError::JointOwnershipConflict { joint: 0 })
        );
    }

    #[test]
    fn merge_rejects_uncommanded_joint() {
        let swing = ActionMap::new();
        let stance = map((0..NUM_MOTORS).filter(|&j| j != 7), 2.0);
        assert_eq!(
            merge_actions(&swing, &stance),
            Err(ControlError::MissingJointCommand { joint: 7 })
        );
    }

    #[test]
    fn update_before_reset_is_rejected() {
        let mut ground = FixedGroundEstimator::level();
        let mut velocity = FixedVelocityEstimator::at_rest();
        let state = standing_state(&a1_config());
        let mut ctl = LocomotionController::new(a1_config(), &mut ground, &mut velocity).unwrap();
        assert_eq!(ctl.mode(), ControllerMode::Idle);
        assert_eq!(ctl.update(&state), Err(ControlError::NotReset));
        assert_eq!(ctl.get_action(&state), Err(ControlError::NotReset));
        assert_eq!(ctl.pause(&state), Err(ControlError::NotReset));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut ground = FixedGroundEstimator::level();
        let mut velocity = FixedVelocityEstimator::at_rest();
        let mut config = a1_config();
        config.robot.mass = -1.0;
        assert!(LocomotionController::new(config, &mut ground, &mut velocity).is_err());
    }

    #[test]
    fn reset_drives_estimator_resets() {
        let mut ground = FixedGroundEstimator::level();
        let mut velocity = FixedVelocityEstimator::at_rest();
        {
            let state = standing_state(&a1_config());
            let mut ctl =
                LocomotionController::new(a1_config(), &mut ground, &mut velocity).unwrap();
            ctl.reset(&state);
            ctl.reset(&state);
            assert_eq!(ctl.mode(), ControllerMode::Running);
            assert_relative_eq!(ctl.elapsed_time(), 0.0);
        }
        assert_eq!(ground.resets, 2);
        assert_eq!(velocity.resets, 2);
    }
}
