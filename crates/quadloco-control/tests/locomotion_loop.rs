//! Integration test: run the full control loop against fixed robot snapshots.
//!
//! The robot is not simulated. Each tick the snapshot keeps the standing pose,
//! advances the clock by 2 ms and reports the contacts the gait scheduled on
//! the previous tick, which is enough to exercise scheduling, ownership
//! hand-over, pause/resume and stepping end to end.

use approx::assert_relative_eq;
use nalgebra::Vector3;

use quadloco_control::{
    ControllerMode, FilteredVelocityEstimator, FlatGroundEstimator, GaitGenerator,
    LocomotionController, QpStatus,
};
use quadloco_core::config::{GaitConfig, GaitType};
use quadloco_core::types::{LegIndex, LegState, MotorCommand, NUM_LEGS, RobotState};
use quadloco_test_utils::{
    FixedGroundEstimator, FixedVelocityEstimator, a1_config, jittered_standing_state, seeded_rng,
    standing_state,
};

const DT: f64 = 0.002;

fn clock(tick: usize) -> f64 {
    tick as f64 * DT
}

/// Advance the snapshot one tick and run the controller.
fn step(ctl: &mut LocomotionController<'_>, state: &mut RobotState, tick: usize) {
    state.time = clock(tick);
    state.foot_contacts = ctl.gait().desired_contacts();
    let action = ctl.tick(state).unwrap();
    assert!(
        action.commands.iter().all(MotorCommand::is_finite),
        "non-finite command at t={}",
        state.time
    );
}

fn phases(gait: &GaitGenerator) -> [f64; NUM_LEGS] {
    LegIndex::ALL.map(|leg| gait.phase(leg))
}

#[test]
fn trot_commands_every_motor_from_its_owner() {
    let config = a1_config();
    let mut ground = FixedGroundEstimator::level();
    let mut velocity = FixedVelocityEstimator::at_rest();
    let mut state = standing_state(&config);
    let owned_at_end;
    {
        let mut ctl = LocomotionController::new(config.clone(), &mut ground, &mut velocity).unwrap();
        ctl.reset(&state);
        for tick in 1..=500 {
            state.time = clock(tick);
            state.foot_contacts = ctl.gait().desired_contacts();
            let action = ctl.tick(&state).unwrap();
            assert_ne!(action.qp_status, QpStatus::Failed, "t={}", state.time);
            assert_ne!(action.qp_status, QpStatus::NoStanceLegs, "t={}", state.time);

            for leg in LegIndex::ALL {
                let swing_owned = ctl.gait().detected_state(leg).is_swing_owned();
                for (m, id) in leg.joint_ids().into_iter().enumerate() {
                    let cmd = action.commands[id];
                    assert!(cmd.is_finite());
                    if swing_owned {
                        assert_relative_eq!(cmd.kp, config.swing.kp[m]);
                        assert_relative_eq!(cmd.torque, 0.0);
                    } else {
                        assert_relative_eq!(cmd.kp, 0.0);
                    }
                }
                let column = action.forces.column(leg.index());
                if swing_owned {
                    assert_relative_eq!(column.norm(), 0.0);
                }
            }
        }
        assert_relative_eq!(ctl.elapsed_time(), 1.0, epsilon = 1e-9);
        owned_at_end = ctl.gait().stance_owned();
    }
    assert_eq!(ground.updates, 500);
    assert_eq!(velocity.updates, 500);
    assert_eq!(ground.resets, 1);
    // The ground estimator saw the contact set the gait had just computed.
    assert_eq!(ground.last_contacts, owned_at_end);
}

#[test]
fn trot_swings_each_diagonal_pair() {
    let config = a1_config();
    let mut ground = FixedGroundEstimator::level();
    let mut velocity = FixedVelocityEstimator::at_rest();
    let mut state = standing_state(&config);
    let mut ctl = LocomotionController::new(config, &mut ground, &mut velocity).unwrap();
    ctl.reset(&state);

    let mut swung = [false; NUM_LEGS];
    for tick in 1..=300 {
        step(&mut ctl, &mut state, tick);
        let desired = ctl.gait().desired_leg_state();
        assert_eq!(desired[0], desired[3], "FR and RL share a phase");
        assert_eq!(desired[1], desired[2], "FL and RR share a phase");
        for leg in LegIndex::ALL {
            swung[leg.index()] |= ctl.swing().is_active(leg);
        }
    }
    assert_eq!(swung, [true; NUM_LEGS]);
}

#[test]
fn pause_holds_gait_phase_and_resumes_without_jump() {
    let config = a1_config();
    let mut ground = FixedGroundEstimator::level();
    let mut velocity = FixedVelocityEstimator::at_rest();
    let mut state = standing_state(&config);
    let mut ctl = LocomotionController::new(config.clone(), &mut ground, &mut velocity).unwrap();
    ctl.reset(&state);

    for tick in 1..=50 {
        step(&mut ctl, &mut state, tick);
    }
    let frozen = phases(ctl.gait());
    ctl.pause(&state).unwrap();
    assert_eq!(ctl.mode(), ControllerMode::Paused);

    for tick in 51..=150 {
        step(&mut ctl, &mut state, tick);
        let now = phases(ctl.gait());
        for (a, b) in now.iter().zip(&frozen) {
            assert_relative_eq!(*a, *b);
        }
    }

    ctl.forward_one(&state).unwrap();
    assert_eq!(ctl.mode(), ControllerMode::Running);
    step(&mut ctl, &mut state, 151);

    // One tick after resuming, the gait is one tick past where it froze.
    let mut reference = GaitGenerator::new(config.gait.clone());
    reference.update(clock(51), &[true; NUM_LEGS]);
    assert_relative_eq!(ctl.elapsed_time(), clock(51), epsilon = 1e-9);
    for (a, b) in phases(ctl.gait()).iter().zip(&phases(&reference)) {
        assert_relative_eq!(*a, *b, epsilon = 1e-9);
    }
}

#[test]
fn paused_controller_still_detects_lost_contact() {
    let config = a1_config();
    let mut ground = FixedGroundEstimator::level();
    let mut velocity = FixedVelocityEstimator::at_rest();
    let mut state = standing_state(&config);
    let mut ctl = LocomotionController::new(config.clone(), &mut ground, &mut velocity).unwrap();
    ctl.reset(&state);

    for tick in 1..=10 {
        step(&mut ctl, &mut state, tick);
    }
    ctl.pause(&state).unwrap();

    // FL and RR are late in stance at the frozen time; FR and RL have only
    // just touched down and are inside the settling window.
    state.foot_contacts = [false; NUM_LEGS];
    let mut action = None;
    for tick in 11..=60 {
        state.time = clock(tick);
        action = Some(ctl.tick(&state).unwrap());
    }
    let action = action.unwrap();

    assert_eq!(ctl.mode(), ControllerMode::Paused);
    assert_relative_eq!(ctl.elapsed_time(), clock(10), epsilon = 1e-12);
    for leg in [LegIndex::FrontLeft, LegIndex::RearRight] {
        assert_eq!(ctl.gait().desired_state(leg), LegState::Stance);
        assert_eq!(ctl.gait().detected_state(leg), LegState::LoseContact);
        assert_relative_eq!(action.forces.column(leg.index()).norm(), 0.0);
        for (m, id) in leg.joint_ids().into_iter().enumerate() {
            assert_relative_eq!(action.commands[id].kp, config.swing.kp[m]);
            assert_relative_eq!(action.commands[id].position, state.joint_positions[id]);
        }
    }
    assert_eq!(ctl.gait().stance_owned(), [true, false, false, true]);
    assert_ne!(action.qp_status, QpStatus::Failed);
    assert_ne!(action.qp_status, QpStatus::NoStanceLegs);
}

#[test]
fn reset_into_mid_swing_keeps_feet_in_place() {
    let mut config = a1_config();
    config.gait.phase_offset = [0.8, 0.3, 0.3, 0.8];
    let mut ground = FixedGroundEstimator::level();
    let mut velocity = FixedVelocityEstimator::at_rest();
    let mut state = standing_state(&config);
    let mut ctl = LocomotionController::new(config, &mut ground, &mut velocity).unwrap();
    ctl.reset(&state);
    step(&mut ctl, &mut state, 1);

    state.time = clock(2);
    let action = ctl.tick(&state).unwrap();
    for leg in [LegIndex::FrontRight, LegIndex::RearLeft] {
        assert!(ctl.swing().is_active(leg));
        assert!(ctl.gait().normalized_phase(leg) > 0.5);
        let [a, b, c] = leg.joint_ids();
        let q = Vector3::new(
            action.commands[a].position,
            action.commands[b].position,
            action.commands[c].position,
        );
        let commanded = ctl.kinematics().foot_position_in_base_frame(leg, &q);
        // Two ticks into the joined swing the foot has barely moved.
        assert!(
            (commanded - state.foot_positions[leg.index()]).norm() < 0.01,
            "{leg}: commanded {commanded:?}"
        );
    }
}

#[test]
fn stepping_mode_pauses_before_each_unpaid_liftoff() {
    let config = a1_config();
    let mut ground = FixedGroundEstimator::level();
    let mut velocity = FixedVelocityEstimator::at_rest();
    let mut state = standing_state(&config);
    let mut ctl = LocomotionController::new(config, &mut ground, &mut velocity).unwrap();
    ctl.reset(&state);
    ctl.set_stepping_mode(true);

    let mut tick = 0;
    while ctl.mode() == ControllerMode::Running && tick < 500 {
        tick += 1;
        step(&mut ctl, &mut state, tick);
    }
    // FL and RR would lift off at 0.05 s.
    assert_eq!(ctl.mode(), ControllerMode::Paused);
    assert!(ctl.elapsed_time() < 0.05 + 1e-9);
    assert!(ctl.gait().desired_leg_state().iter().all(|&s| s == LegState::Stance));

    // Paused ticks keep producing commands but never lift a leg.
    for _ in 0..20 {
        tick += 1;
        step(&mut ctl, &mut state, tick);
    }
    assert!(ctl.gait().desired_leg_state().iter().all(|&s| s == LegState::Stance));

    ctl.forward_one(&state).unwrap();
    assert_eq!(ctl.remaining_steps(), 1);
    let granted_at = tick;
    while ctl.gait().desired_state(LegIndex::FrontLeft) != LegState::Swing && tick < granted_at + 5 {
        tick += 1;
        step(&mut ctl, &mut state, tick);
    }
    assert_eq!(ctl.gait().desired_state(LegIndex::FrontLeft), LegState::Swing);
    assert_eq!(ctl.gait().desired_state(LegIndex::RearRight), LegState::Swing);
    assert_eq!(ctl.remaining_steps(), 0);
    assert_eq!(ctl.mode(), ControllerMode::Running);

    // The next pair (FR and RL, at 0.3 s) needs another step.
    while ctl.mode() == ControllerMode::Running && tick < 1000 {
        tick += 1;
        step(&mut ctl, &mut state, tick);
    }
    assert_eq!(ctl.mode(), ControllerMode::Paused);
    assert!(ctl.elapsed_time() > 0.25 && ctl.elapsed_time() < 0.3 + 1e-9);
    assert_eq!(ctl.gait().desired_state(LegIndex::FrontRight), LegState::Stance);
    assert_eq!(ctl.gait().desired_state(LegIndex::RearLeft), LegState::Stance);
}

#[test]
fn reset_is_idempotent() {
    let config = a1_config();
    let state = standing_state(&config);
    let run = |resets: usize| {
        let mut ground = FixedGroundEstimator::level();
        let mut velocity = FixedVelocityEstimator::at_rest();
        let mut state = state.clone();
        let mut ctl = LocomotionController::new(config.clone(), &mut ground, &mut velocity).unwrap();
        for _ in 0..resets {
            ctl.reset(&state);
        }
        state.time = clock(40);
        ctl.tick(&state).unwrap()
    };
    assert_eq!(run(1), run(3));
}

#[test]
fn switching_to_stand_hands_every_leg_to_stance() {
    let config = a1_config();
    let mut ground = FixedGroundEstimator::level();
    let mut velocity = FixedVelocityEstimator::at_rest();
    let mut state = standing_state(&config);
    let mut ctl = LocomotionController::new(config, &mut ground, &mut velocity).unwrap();
    ctl.reset(&state);
    for tick in 1..=40 {
        step(&mut ctl, &mut state, tick);
    }
    assert!(ctl.gait().desired_leg_state().contains(&LegState::Swing));

    ctl.switch_gait(GaitConfig::preset(GaitType::Stand)).unwrap();
    state.time = clock(41);
    state.foot_contacts = [true; NUM_LEGS];
    let action = ctl.tick(&state).unwrap();

    assert_eq!(ctl.config().gait.name, "stand");
    assert_eq!(ctl.gait().stance_owned(), [true; NUM_LEGS]);
    assert_eq!(action.qp_status, QpStatus::Optimal);
    assert!(action.commands.iter().all(|cmd| cmd.kp == 0.0 && cmd.kd == 0.0));
    let total_fz: f64 = action.forces.row(2).sum();
    assert_relative_eq!(total_fz, ctl.config().robot.mass * 9.81, epsilon = 1.0);
}

#[test]
fn forward_command_pushes_body_forward() {
    let config = a1_config();
    let mut ground = FlatGroundEstimator::new();
    let mut velocity = FilteredVelocityEstimator::default();
    let mut state = standing_state(&config);
    let mut ctl = LocomotionController::new(config.clone(), &mut ground, &mut velocity).unwrap();
    ctl.reset(&state);
    ctl.set_desired_speed(Vector3::new(0.3, 0.0, 0.0), 0.0);

    for tick in 1..=100 {
        state.time = clock(tick);
        state.foot_contacts = ctl.gait().desired_contacts();
        let action = ctl.tick(&state).unwrap();
        assert_ne!(action.qp_status, QpStatus::Failed);
        let total_fx: f64 = action.forces.row(0).sum();
        assert!(total_fx > 0.0, "t={}: total fx {total_fx}", state.time);
    }
    // Still below the commanded speed: feet land behind the hips to speed up.
    for leg in [LegIndex::FrontLeft, LegIndex::RearRight] {
        assert!(ctl.swing().is_active(leg));
        assert!(ctl.swing().touchdown_target(leg).x < config.robot.hip_offset(leg).x);
    }
}

#[test]
fn jittered_posture_still_yields_finite_commands() {
    let config = a1_config();
    let mut rng = seeded_rng(7);
    let mut ground = FixedGroundEstimator::level();
    let mut velocity = FixedVelocityEstimator::new(Vector3::new(0.2, 0.05, 0.0), Vector3::new(0.0, 0.0, 0.3));
    let mut state = jittered_standing_state(&config, &mut rng, 0.05);
    let mut ctl = LocomotionController::new(config.clone(), &mut ground, &mut velocity).unwrap();
    ctl.reset(&state);
    for tick in 1..=200 {
        let jittered = jittered_standing_state(&config, &mut rng, 0.05);
        state.joint_positions = jittered.joint_positions;
        state.foot_positions = jittered.foot_positions;
        step(&mut ctl, &mut state, tick);
    }
}
