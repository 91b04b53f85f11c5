//! Quadruped locomotion control.
//!
//! One control tick runs this pipeline:
//!
//! 1. **Gait Generator**: per-leg stance/swing schedule with contact-based
//!    early/lost contact detection
//! 2. **Swing Leg Controller**: Raibert footholds, spline foot trajectories,
//!    IK to joint position commands
//! 3. **Stance Leg Controller**: PD body acceleration, contact force QP
//!    (Clarabel), `tau = J^T (-f)` torque commands
//! 4. **Locomotion Controller**: runs the stages in order and merges the
//!    per-leg outputs into one command per motor
//!
//! # Frames
//!
//! Foot positions and joint commands live in the base frame. Footholds, body
//! accelerations and contact forces are computed in the *control frame*, the
//! ground-aligned frame reported by [`quadloco_core::traits::GroundSurfaceEstimator`].

pub mod estimator;
pub mod gait;
pub mod locomotion;
pub mod qp;
pub mod spline;
pub mod stance;
pub mod swing;
pub mod swing_trajectory;

pub use estimator::{
    FilteredVelocityEstimator, FlatGroundEstimator, OdometryPoseEstimator,
    estimate_height_in_control_frame,
};
pub use gait::GaitGenerator;
pub use locomotion::{ControllerMode, LocomotionAction, LocomotionController, merge_actions};
pub use qp::{ForceProblem, ForceQp};
pub use spline::{SwingTrajectoryGenerator, TrajectorySample};
pub use stance::{QpStatus, StanceAction, StanceLegController};
pub use swing::{SwingLegController, raibert_foot_target};
pub use swing_trajectory::SwingFootTrajectory;
