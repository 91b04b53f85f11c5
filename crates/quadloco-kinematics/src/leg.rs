//! Closed-form kinematics of one 3-DOF leg.
//!
//! Joint angles are `[abduction, hip pitch, knee]`. With all joints at zero
//! the leg hangs straight down from the hip, offset laterally by the
//! abduction link. Positive hip pitch swings the foot backwards; the knee
//! bends with negative angles.

use log::warn;
use nalgebra::{Matrix3, Rotation3, Vector3};

use quadloco_core::config::RobotParams;
use quadloco_core::error::KinematicsError;
use quadloco_core::types::{LegIndex, MOTORS_PER_LEG, NUM_LEGS, NUM_MOTORS};

use crate::jacobian::{compute_leg_jacobian, jacobian_transpose_torques};

/// Determinants below this are treated as singular.
const SINGULARITY_EPS: f64 = 1e-9;

/// Result of an inverse kinematics solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkSolution {
    /// Joint angles `[abduction, hip pitch, knee]`.
    pub joint_positions: Vector3<f64>,
    /// False when the target lay outside the workspace and was clamped.
    pub reachable: bool,
}

/// Leg geometry shared by all four legs.
#[derive(Debug, Clone, PartialEq)]
pub struct LegKinematics {
    hip_offsets: [Vector3<f64>; NUM_LEGS],
    abad_length: f64,
    thigh_length: f64,
    calf_length: f64,
}

impl LegKinematics {
    pub fn new(
        hip_offsets: [Vector3<f64>; NUM_LEGS],
        abad_length: f64,
        thigh_length: f64,
        calf_length: f64,
    ) -> Self {
        Self {
            hip_offsets,
            abad_length,
            thigh_length,
            calf_length,
        }
    }

    pub fn from_params(params: &RobotParams) -> Self {
        Self::new(
            LegIndex::ALL.map(|leg| params.hip_offset(leg)),
            params.abad_length,
            params.thigh_length,
            params.calf_length,
        )
    }

    pub fn hip_offset(&self, leg: LegIndex) -> Vector3<f64> {
        self.hip_offsets[leg.index()]
    }

    // ---------------------------------------------------------------------------
    // Forward kinematics
    // ---------------------------------------------------------------------------

    /// Foot position relative to the hip.
    pub fn foot_position_in_hip_frame(&self, leg: LegIndex, q: &Vector3<f64>) -> Vector3<f64> {
        let (_, _, foot) = self.chain_frames(leg, q);
        foot
    }

    /// Foot position relative to the base origin.
    pub fn foot_position_in_base_frame(&self, leg: LegIndex, q: &Vector3<f64>) -> Vector3<f64> {
        self.hip_offset(leg) + self.foot_position_in_hip_frame(leg, q)
    }

    /// Foot positions of all legs from the full 12-joint vector.
    pub fn foot_positions_in_base_frame(&self, q: &[f64; NUM_MOTORS]) -> [Vector3<f64>; NUM_LEGS] {
        LegIndex::ALL.map(|leg| {
            let [a, b, c] = leg.joint_ids();
            self.foot_position_in_base_frame(leg, &Vector3::new(q[a], q[b], q[c]))
        })
    }

    /// Joint origins, joint axes and foot position in hip frame.
    fn chain_frames(
        &self,
        leg: LegIndex,
        q: &Vector3<f64>,
    ) -> (
        [Vector3<f64>; MOTORS_PER_LEG],
        [Vector3<f64>; MOTORS_PER_LEG],
        Vector3<f64>,
    ) {
        let abad = Rotation3::from_axis_angle(&Vector3::x_axis(), q[0]);
        let pitch = Rotation3::from_axis_angle(&Vector3::y_axis(), q[1]);
        let knee = Rotation3::from_axis_angle(&Vector3::y_axis(), q[1] + q[2]);

        let thigh_origin = Vector3::new(0.0, self.abad_length * leg.side_sign(), 0.0);
        let knee_origin = thigh_origin + pitch * Vector3::new(0.0, 0.0, -self.thigh_length);
        let foot = knee_origin + knee * Vector3::new(0.0, 0.0, -self.calf_length);

        let pitch_axis = abad * Vector3::y();
        let origins = [Vector3::zeros(), abad * thigh_origin, abad * knee_origin];
        let axes = [Vector3::x(), pitch_axis, pitch_axis];
        (origins, axes, abad * foot)
    }

    // ---------------------------------------------------------------------------
    // Inverse kinematics
    // ---------------------------------------------------------------------------

    /// Joint angles placing the foot at `foot_in_base`.
    ///
    /// Targets outside the workspace are projected onto its boundary and
    /// reported with `reachable = false`.
    pub fn inverse_kinematics(&self, leg: LegIndex, foot_in_base: &Vector3<f64>) -> IkSolution {
        let p = foot_in_base - self.hip_offset(leg);
        let l1 = self.abad_length * leg.side_sign();
        let (l2, l3) = (self.thigh_length, self.calf_length);
        let mut reachable = true;

        // Abduction: (l1, z_leg) rotated by q0 lands on (p.y, p.z).
        let yz_sq = p.y * p.y + p.z * p.z - l1 * l1;
        if yz_sq < 0.0 {
            reachable = false;
        }
        let z_leg = -yz_sq.max(0.0).sqrt();
        let q0 = p.z.atan2(p.y) - z_leg.atan2(l1);

        // Knee from the law of cosines in the sagittal plane.
        let r_sq = p.x * p.x + z_leg * z_leg;
        let cos_knee = (r_sq - l2 * l2 - l3 * l3) / (2.0 * l2 * l3);
        if !(-1.0..=1.0).contains(&cos_knee) {
            reachable = false;
        }
        let q2 = -cos_knee.clamp(-1.0, 1.0).acos();

        let q1 = (-p.x).atan2(-z_leg) - (l3 * q2.sin()).atan2(l2 + l3 * q2.cos());

        if !reachable {
            warn!("IK target {p:?} outside workspace of leg {leg}, clamped");
        }
        IkSolution {
            joint_positions: Vector3::new(wrap_angle(q0), wrap_angle(q1), q2),
            reachable,
        }
    }

    // ---------------------------------------------------------------------------
    // Jacobian
    // ---------------------------------------------------------------------------

    /// Foot linear Jacobian, `v_foot = J q̇`, in base frame.
    pub fn jacobian(&self, leg: LegIndex, q: &Vector3<f64>) -> Matrix3<f64> {
        let (origins, axes, foot) = self.chain_frames(leg, q);
        compute_leg_jacobian(&origins, &axes, &foot)
    }

    /// Joint velocities producing `foot_velocity` (base frame).
    pub fn joint_velocities(
        &self,
        leg: LegIndex,
        q: &Vector3<f64>,
        foot_velocity: &Vector3<f64>,
    ) -> Result<Vector3<f64>, KinematicsError> {
        let j = self.jacobian(leg, q);
        if j.determinant().abs() < SINGULARITY_EPS {
            return Err(KinematicsError::SingularJacobian { leg });
        }
        j.lu()
            .solve(foot_velocity)
            .ok_or(KinematicsError::SingularJacobian { leg })
    }

    /// Joint torques realizing `force` (base frame) at the foot.
    pub fn contact_force_to_torques(
        &self,
        leg: LegIndex,
        q: &Vector3<f64>,
        force: &Vector3<f64>,
    ) -> Vector3<f64> {
        jacobian_transpose_torques(&self.jacobian(leg, q), force)
    }
}

impl Default for LegKinematics {
    fn default() -> Self {
        Self::from_params(&RobotParams::default())
    }
}

fn wrap_angle(a: f64) -> f64 {
    let wrapped = (a + std::f64::consts::PI).rem_euclid(std::f64::consts::TAU);
    wrapped - std::f64::consts::PI
}
