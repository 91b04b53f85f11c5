//! Robot snapshots for controller tests.

use nalgebra::Vector3;
use rand::Rng;

use quadloco_core::config::LocomotionConfig;
use quadloco_core::types::{GRAVITY, LegIndex, NUM_LEGS, NUM_MOTORS, RobotState};
use quadloco_kinematics::LegKinematics;

/// Default configuration (A1-sized robot, trot).
pub fn a1_config() -> LocomotionConfig {
    LocomotionConfig::default()
}

/// Joint angles that put every foot under its thigh joint at nominal height.
pub fn standing_joint_positions(config: &LocomotionConfig) -> [f64; NUM_MOTORS] {
    let kin = LegKinematics::from_params(&config.robot);
    let mut q = [0.0; NUM_MOTORS];
    for leg in LegIndex::ALL {
        let foot = nominal_foot(config, leg);
        let sol = kin.inverse_kinematics(leg, &foot);
        for (id, angle) in leg.joint_ids().into_iter().zip(sol.joint_positions.iter()) {
            q[id] = *angle;
        }
    }
    q
}

/// Level base at nominal height, all feet loaded, at rest.
pub fn standing_state(config: &LocomotionConfig) -> RobotState {
    let kin = LegKinematics::from_params(&config.robot);
    let joint_positions = standing_joint_positions(config);
    let weight = config.robot.mass * GRAVITY / NUM_LEGS as f64;
    RobotState {
        base_position: Vector3::new(0.0, 0.0, config.robot.body_height),
        joint_positions,
        foot_positions: kin.foot_positions_in_base_frame(&joint_positions),
        foot_contacts: [true; NUM_LEGS],
        foot_forces: [weight; NUM_LEGS],
        ..RobotState::default()
    }
}

/// [`standing_state`] with every joint angle perturbed by up to `amplitude` rad.
pub fn jittered_standing_state(
    config: &LocomotionConfig,
    rng: &mut impl Rng,
    amplitude: f64,
) -> RobotState {
    let kin = LegKinematics::from_params(&config.robot);
    let mut state = standing_state(config);
    for q in &mut state.joint_positions {
        *q += rng.gen_range(-amplitude..=amplitude);
    }
    state.foot_positions = kin.foot_positions_in_base_frame(&state.joint_positions);
    state
}

fn nominal_foot(config: &LocomotionConfig, leg: LegIndex) -> Vector3<f64> {
    let robot = &config.robot;
    robot.hip_offset(leg)
        + Vector3::new(0.0, leg.side_sign() * robot.abad_length, -robot.body_height)
}
