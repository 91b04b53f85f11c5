// quadloco-core: Types, traits, config, errors shared by the quadloco locomotion crates.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{GaitConfig, GaitType, LocomotionConfig, RobotParams, StanceConfig, SwingConfig};
pub use error::{ConfigError, ControlError, KinematicsError, QuadlocoError};
pub use traits::{GroundSurfaceEstimator, VelocityEstimator};
pub use types::{
    ActionMap, GRAVITY, JointId, LegIndex, LegState, MOTORS_PER_LEG, MotorCommand, NUM_LEGS,
    NUM_MOTORS, RobotState, SplineInfo, SplineKind, StepParameters,
};
