//! Core data model shared by every stage of the locomotion pipeline.

use std::collections::BTreeMap;
use std::fmt;

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Number of legs on the robot.
pub const NUM_LEGS: usize = 4;
/// Actuated joints per leg: hip abduction, hip pitch (thigh), knee (calf).
pub const MOTORS_PER_LEG: usize = 3;
/// Total number of motors.
pub const NUM_MOTORS: usize = NUM_LEGS * MOTORS_PER_LEG;
/// Standard gravity (m/s^2).
pub const GRAVITY: f64 = 9.81;

/// Global motor index in `0..NUM_MOTORS`.
pub type JointId = usize;

/// Per-joint commands produced by one controller, keyed by [`JointId`].
pub type ActionMap = BTreeMap<JointId, MotorCommand>;

// ---------------------------------------------------------------------------
// LegIndex
// ---------------------------------------------------------------------------

/// Leg identifier. The discriminant is the leg's slot in every per-leg array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(usize)]
pub enum LegIndex {
    FrontRight = 0,
    FrontLeft = 1,
    RearRight = 2,
    RearLeft = 3,
}

impl LegIndex {
    /// All legs in index order.
    pub const ALL: [Self; NUM_LEGS] = [
        Self::FrontRight,
        Self::FrontLeft,
        Self::RearRight,
        Self::RearLeft,
    ];

    /// Array slot of this leg.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Leg for an array slot, `None` if out of range.
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::FrontRight),
            1 => Some(Self::FrontLeft),
            2 => Some(Self::RearRight),
            3 => Some(Self::RearLeft),
            _ => None,
        }
    }

    /// Global joint ids of this leg's motors, ordered hip abduction, thigh, knee.
    pub const fn joint_ids(self) -> [JointId; MOTORS_PER_LEG] {
        let base = self.index() * MOTORS_PER_LEG;
        [base, base + 1, base + 2]
    }

    /// Leg owning a joint id.
    pub const fn of_joint(joint: JointId) -> Option<Self> {
        Self::from_index(joint / MOTORS_PER_LEG)
    }

    /// +1 for left legs, -1 for right legs (sign of the lateral hip offset).
    pub const fn side_sign(self) -> f64 {
        match self {
            Self::FrontLeft | Self::RearLeft => 1.0,
            Self::FrontRight | Self::RearRight => -1.0,
        }
    }

    /// Short name used in logs ("FR", "FL", ...).
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::FrontRight => "FR",
            Self::FrontLeft => "FL",
            Self::RearRight => "RR",
            Self::RearLeft => "RL",
        }
    }
}

impl fmt::Display for LegIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

// ---------------------------------------------------------------------------
// LegState
// ---------------------------------------------------------------------------

/// Discrete leg state.
///
/// The gait generator tracks a *desired* state (from the phase clock) and a
/// *detected* state (desired state corrected by contact sensing). The two may
/// diverge transiently as [`LegState::EarlyContact`] or [`LegState::LoseContact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegState {
    Swing,
    Stance,
    /// Contact sensed while the schedule says swing.
    EarlyContact,
    /// No contact sensed while the schedule says stance.
    LoseContact,
    /// Swing commanded outside the periodic schedule.
    UserDefinedSwing,
}

impl LegState {
    /// Whether the stance controller owns a leg in this (detected) state.
    pub const fn is_stance_owned(self) -> bool {
        matches!(self, Self::Stance | Self::EarlyContact)
    }

    /// Whether the swing controller owns a leg in this (detected) state.
    ///
    /// Always the complement of [`LegState::is_stance_owned`].
    pub const fn is_swing_owned(self) -> bool {
        !self.is_stance_owned()
    }

    /// Swing or user-defined swing, ignoring contact corrections.
    pub const fn is_swing(self) -> bool {
        matches!(self, Self::Swing | Self::UserDefinedSwing)
    }
}

// ---------------------------------------------------------------------------
// MotorCommand
// ---------------------------------------------------------------------------

/// Hybrid position/velocity/torque command for one motor.
///
/// The actuation layer applies `tau = kp*(position - q) + kd*(velocity - qd) + torque`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotorCommand {
    pub position: f64,
    pub velocity: f64,
    /// Position gain (Kp).
    pub kp: f64,
    /// Velocity gain (Kd).
    pub kd: f64,
    /// Feed-forward torque (Nm).
    pub torque: f64,
}

impl MotorCommand {
    /// Position/velocity tracking with zero feed-forward torque.
    pub const fn position(position: f64, velocity: f64, kp: f64, kd: f64) -> Self {
        Self {
            position,
            velocity,
            kp,
            kd,
            torque: 0.0,
        }
    }

    /// Pure torque command (zero gains).
    pub const fn torque(torque: f64) -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            kp: 0.0,
            kd: 0.0,
            torque,
        }
    }

    /// All fields zero: the motor is limp.
    pub const fn zero() -> Self {
        Self::torque(0.0)
    }

    /// Whether every field is finite.
    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.kp.is_finite()
            && self.kd.is_finite()
            && self.torque.is_finite()
    }
}

// ---------------------------------------------------------------------------
// StepParameters
// ---------------------------------------------------------------------------

/// Parameters of one swing step.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepParameters {
    /// Swing duration (s).
    pub duration: f64,
    /// Apex clearance above the higher of liftoff and touchdown (m).
    pub height: f64,
    /// Depth below the touchdown target the foot aims for (m).
    pub penetration: f64,
}

impl StepParameters {
    pub const fn new(duration: f64, height: f64, penetration: f64) -> Self {
        Self {
            duration,
            height,
            penetration,
        }
    }
}

// ---------------------------------------------------------------------------
// SplineInfo
// ---------------------------------------------------------------------------

/// Interpolation family used by a swing trajectory generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplineKind {
    /// Independent 1-D polynomials per axis (degree 3 or 5).
    Polynomial,
    /// Single clamped B-spline curve through normalized control points.
    BSpline,
}

/// Immutable description of a swing interpolant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineInfo {
    pub kind: SplineKind,
    /// Polynomial degree (3 or 5) or B-spline degree.
    pub degree: usize,
    /// B-spline control points in normalized step space:
    /// `[progress along start->target, lateral offset (m), fraction of clearance]`.
    #[serde(default)]
    pub control_points: Vec<[f64; 3]>,
    /// B-spline knot vector (clamped, `control_points.len() + degree + 1` entries).
    #[serde(default)]
    pub knots: Vec<f64>,
}

impl SplineInfo {
    /// Per-axis cubic polynomials (zero boundary velocity).
    pub const fn cubic() -> Self {
        Self {
            kind: SplineKind::Polynomial,
            degree: 3,
            control_points: Vec::new(),
            knots: Vec::new(),
        }
    }

    /// Per-axis quintic polynomials (zero boundary velocity and acceleration).
    pub const fn quintic() -> Self {
        Self {
            kind: SplineKind::Polynomial,
            degree: 5,
            control_points: Vec::new(),
            knots: Vec::new(),
        }
    }

    /// Cubic clamped B-spline with a symmetric lift-carry-lower profile.
    pub fn bspline() -> Self {
        Self {
            kind: SplineKind::BSpline,
            degree: 3,
            control_points: vec![
                [0.0, 0.0, 0.0],
                [0.0, 0.0, 0.8],
                [0.5, 0.0, 1.2],
                [1.0, 0.0, 0.8],
                [1.0, 0.0, 0.0],
            ],
            knots: vec![0.0, 0.0, 0.0, 0.0, 0.5, 1.0, 1.0, 1.0, 1.0],
        }
    }
}

impl Default for SplineInfo {
    fn default() -> Self {
        Self::quintic()
    }
}

// ---------------------------------------------------------------------------
// RobotState
// ---------------------------------------------------------------------------

/// Snapshot of the estimated robot state, refreshed once per tick by the
/// surrounding driver. Read-only to the controllers.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotState {
    /// Robot clock (s). Monotone between resets.
    pub time: f64,
    /// Base position in world frame.
    pub base_position: Vector3<f64>,
    /// Base orientation (body to world).
    pub base_orientation: UnitQuaternion<f64>,
    /// Base linear velocity in base frame.
    pub base_linear_velocity: Vector3<f64>,
    /// Base angular velocity in base frame.
    pub base_angular_velocity: Vector3<f64>,
    pub joint_positions: [f64; NUM_MOTORS],
    pub joint_velocities: [f64; NUM_MOTORS],
    /// Foot positions relative to the base, in base frame.
    pub foot_positions: [Vector3<f64>; NUM_LEGS],
    pub foot_contacts: [bool; NUM_LEGS],
    /// Measured normal contact force per foot (N).
    pub foot_forces: [f64; NUM_LEGS],
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            time: 0.0,
            base_position: Vector3::zeros(),
            base_orientation: UnitQuaternion::identity(),
            base_linear_velocity: Vector3::zeros(),
            base_angular_velocity: Vector3::zeros(),
            joint_positions: [0.0; NUM_MOTORS],
            joint_velocities: [0.0; NUM_MOTORS],
            foot_positions: [Vector3::zeros(); NUM_LEGS],
            foot_contacts: [false; NUM_LEGS],
            foot_forces: [0.0; NUM_LEGS],
        }
    }
}

impl RobotState {
    /// Joint positions of one leg.
    pub fn leg_joint_positions(&self, leg: LegIndex) -> Vector3<f64> {
        let [a, b, c] = leg.joint_ids();
        Vector3::new(
            self.joint_positions[a],
            self.joint_positions[b],
            self.joint_positions[c],
        )
    }

    /// Number of feet currently sensing contact.
    pub fn contact_count(&self) -> usize {
        self.foot_contacts.iter().filter(|&&c| c).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn joint_ids_are_contiguous_and_cover_all_motors() {
        let mut seen = [false; NUM_MOTORS];
        for leg in LegIndex::ALL {
            for id in leg.joint_ids() {
                assert!(!seen[id], "joint {id} assigned twice");
                seen[id] = true;
                assert_eq!(LegIndex::of_joint(id), Some(leg));
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn leg_index_roundtrip() {
        for (i, leg) in LegIndex::ALL.iter().enumerate() {
            assert_eq!(leg.index(), i);
            assert_eq!(LegIndex::from_index(i), Some(*leg));
        }
        assert_eq!(LegIndex::from_index(4), None);
    }

    #[test]
    fn side_signs() {
        assert_relative_eq!(LegIndex::FrontLeft.side_sign(), 1.0);
        assert_relative_eq!(LegIndex::RearRight.side_sign(), -1.0);
    }

    #[test]
    fn stance_and_swing_ownership_partition_states() {
        let all = [
            LegState::Swing,
            LegState::Stance,
            LegState::EarlyContact,
            LegState::LoseContact,
            LegState::UserDefinedSwing,
        ];
        for state in all {
            assert_ne!(state.is_stance_owned(), state.is_swing_owned(), "{state:?}");
        }
        assert!(LegState::EarlyContact.is_stance_owned());
        assert!(LegState::LoseContact.is_swing_owned());
    }

    #[test]
    fn motor_command_constructors() {
        let cmd = MotorCommand::position(0.5, -0.1, 100.0, 2.0);
        assert_relative_eq!(cmd.torque, 0.0);
        let cmd = MotorCommand::torque(3.0);
        assert_relative_eq!(cmd.kp, 0.0);
        assert_relative_eq!(cmd.torque, 3.0);
        assert!(MotorCommand::zero().is_finite());
        let bad = MotorCommand::torque(f64::NAN);
        assert!(!bad.is_finite());
    }

    #[test]
    fn leg_joint_accessors() {
        let mut state = RobotState::default();
        for (i, q) in state.joint_positions.iter_mut().enumerate() {
            *q = i as f64;
        }
        let q = state.leg_joint_positions(LegIndex::RearRight);
        assert_relative_eq!(q, Vector3::new(6.0, 7.0, 8.0));
    }

    #[test]
    fn default_bspline_has_clamped_knots() {
        let info = SplineInfo::bspline();
        assert_eq!(
            info.knots.len(),
            info.control_points.len() + info.degree + 1
        );
    }
}
