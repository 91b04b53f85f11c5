use thiserror::Error;

use crate::types::{JointId, LegIndex};

/// Top-level error type for quadloco.
#[derive(Debug, Error)]
pub enum QuadlocoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Kinematics error: {0}")]
    Kinematics(#[from] KinematicsError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid duty factor for leg {leg}: {value} (must be in (0, 1])")]
    InvalidDutyFactor { leg: LegIndex, value: f64 },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Unsupported spline: {0}")]
    UnsupportedSpline(String),

    #[error("Unknown gait: {0}")]
    UnknownGait(String),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Per-tick control errors.
///
/// Copy + static messages for cheap propagation in the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("Controller used before reset")]
    NotReset,

    #[error("Joint {joint} commanded by both swing and stance controllers")]
    JointOwnershipConflict { joint: JointId },

    #[error("Joint {joint} commanded by neither swing nor stance controller")]
    MissingJointCommand { joint: JointId },
}

/// Leg kinematics errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KinematicsError {
    #[error("Singular Jacobian for leg {leg}")]
    SingularJacobian { leg: LegIndex },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadloco_error_from_config_error() {
        let err = ConfigError::InvalidDutyFactor {
            leg: LegIndex::FrontLeft,
            value: 1.5,
        };
        let top: QuadlocoError = err.into();
        assert!(matches!(top, QuadlocoError::Config(_)));
        assert!(top.to_string().contains("1.5"));
        assert!(top.to_string().contains("FL"));
    }

    #[test]
    fn quadloco_error_from_control_error() {
        let top: QuadlocoError = ControlError::NotReset.into();
        assert!(matches!(top, QuadlocoError::Control(_)));
    }

    #[test]
    fn config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let config_err: ConfigError = io_err.into();
        assert!(matches!(config_err, ConfigError::Io(_)));
    }

    #[test]
    fn control_error_is_copy() {
        let err = ControlError::JointOwnershipConflict { joint: 4 };
        let err2 = err;
        assert_eq!(err, err2);
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            ControlError::MissingJointCommand { joint: 7 }.to_string(),
            "Joint 7 commanded by neither swing nor stance controller"
        );
        assert_eq!(
            KinematicsError::SingularJacobian {
                leg: LegIndex::RearLeft
            }
            .to_string(),
            "Singular Jacobian for leg RL"
        );
        assert_eq!(
            ConfigError::invalid("swing.step_height", "must be >= 0").to_string(),
            "Invalid value for swing.step_height: must be >= 0"
        );
    }
}
