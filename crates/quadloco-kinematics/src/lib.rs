//! Analytic kinematics for 3-DOF quadruped legs.
//!
//! Each leg is a hip abduction joint about the body x axis followed by a hip
//! pitch (thigh) and knee joint about the abducted y axis:
//!
//! ```text
//! hip ──abad──► thigh ──l2──► knee ──l3──► foot
//! ```
//!
//! [`LegKinematics`] provides forward kinematics, a closed-form inverse, and
//! the foot Jacobian used both to convert swing foot velocities into joint
//! velocities and stance contact forces into joint torques.

pub mod jacobian;
pub mod leg;

pub use jacobian::{compute_leg_jacobian, jacobian_transpose_torques};
pub use leg::{IkSolution, LegKinematics};
