use std::fmt;
use std::str::FromStr;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{LegIndex, NUM_LEGS, SplineInfo, SplineKind};

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_mass() -> f64 {
    10.0
}
const fn default_inertia() -> [[f64; 3]; 3] {
    [[0.068, 0.0, 0.0], [0.0, 0.228, 0.0], [0.0, 0.0, 0.256]]
}
const fn default_body_height() -> f64 {
    0.27
}
const fn default_hip_offsets() -> [[f64; 3]; NUM_LEGS] {
    [
        [0.1805, -0.047, 0.0],
        [0.1805, 0.047, 0.0],
        [-0.1805, -0.047, 0.0],
        [-0.1805, 0.047, 0.0],
    ]
}
const fn default_abad_length() -> f64 {
    0.0838
}
const fn default_link_length() -> f64 {
    0.2
}
const fn default_friction_coeff() -> f64 {
    0.45
}
const fn default_contact_threshold() -> f64 {
    0.1
}
const fn default_step_height() -> f64 {
    0.08
}
const fn default_penetration() -> f64 {
    0.005
}
const fn default_swing_kp() -> [f64; 3] {
    [100.0, 100.0, 100.0]
}
const fn default_swing_kd() -> [f64; 3] {
    [1.0, 2.0, 2.0]
}
const fn default_velocity_gain() -> f64 {
    0.03
}
const fn default_max_reach() -> f64 {
    0.25
}
const fn default_retarget_threshold() -> f64 {
    0.02
}
const fn default_stance_kp() -> [f64; 6] {
    [0.0, 0.0, 100.0, 100.0, 100.0, 0.0]
}
const fn default_stance_kd() -> [f64; 6] {
    [40.0, 30.0, 10.0, 10.0, 10.0, 30.0]
}
const fn default_max_ddq() -> [f64; 6] {
    [10.0, 10.0, 10.0, 20.0, 20.0, 20.0]
}
const fn default_min_ddq() -> [f64; 6] {
    [-10.0, -10.0, -10.0, -20.0, -20.0, -20.0]
}
const fn default_acc_weight() -> [f64; 6] {
    [1.0, 1.0, 1.0, 10.0, 10.0, 1.0]
}
const fn default_regularization() -> f64 {
    1e-4
}
const fn default_f_min_ratio() -> f64 {
    0.01
}
const fn default_f_max_ratio() -> f64 {
    10.0
}
const fn default_ratio_ramp_phase() -> f64 {
    0.1
}
const fn default_ratio_floor() -> f64 {
    0.2
}
const fn default_max_solver_iters() -> u32 {
    100
}

// ---------------------------------------------------------------------------
// RobotParams
// ---------------------------------------------------------------------------

/// Rigid-body and leg geometry of the robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotParams {
    /// Total mass (kg).
    #[serde(default = "default_mass")]
    pub mass: f64,
    /// Body-frame inertia about the CoM, row-major.
    #[serde(default = "default_inertia")]
    pub inertia: [[f64; 3]; 3],
    /// Nominal standing height of the base above the ground (m).
    #[serde(default = "default_body_height")]
    pub body_height: f64,
    /// Hip positions in base frame, indexed by [`LegIndex`].
    #[serde(default = "default_hip_offsets")]
    pub hip_offsets: [[f64; 3]; NUM_LEGS],
    /// Lateral offset from the abduction axis to the thigh (m).
    #[serde(default = "default_abad_length")]
    pub abad_length: f64,
    #[serde(default = "default_link_length")]
    pub thigh_length: f64,
    #[serde(default = "default_link_length")]
    pub calf_length: f64,
    /// Coulomb friction coefficient between feet and ground.
    #[serde(default = "default_friction_coeff")]
    pub friction_coeff: f64,
}

impl Default for RobotParams {
    fn default() -> Self {
        Self {
            mass: default_mass(),
            inertia: default_inertia(),
            body_height: default_body_height(),
            hip_offsets: default_hip_offsets(),
            abad_length: default_abad_length(),
            thigh_length: default_link_length(),
            calf_length: default_link_length(),
            friction_coeff: default_friction_coeff(),
        }
    }
}

impl RobotParams {
    /// Inertia tensor as a matrix.
    pub fn inertia_matrix(&self) -> Matrix3<f64> {
        let i = &self.inertia;
        Matrix3::new(
            i[0][0], i[0][1], i[0][2], i[1][0], i[1][1], i[1][2], i[2][0], i[2][1], i[2][2],
        )
    }

    /// Hip position of one leg in base frame.
    pub fn hip_offset(&self, leg: LegIndex) -> Vector3<f64> {
        Vector3::from(self.hip_offsets[leg.index()])
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mass <= 0.0 {
            return Err(ConfigError::invalid("robot.mass", "must be > 0"));
        }
        if self.body_height <= 0.0 {
            return Err(ConfigError::invalid("robot.body_height", "must be > 0"));
        }
        if self.thigh_length <= 0.0 || self.calf_length <= 0.0 {
            return Err(ConfigError::invalid("robot.thigh_length", "link lengths must be > 0"));
        }
        if self.abad_length < 0.0 {
            return Err(ConfigError::invalid("robot.abad_length", "must be >= 0"));
        }
        if self.friction_coeff <= 0.0 {
            return Err(ConfigError::invalid("robot.friction_coeff", "must be > 0"));
        }
        if self.inertia_matrix().try_inverse().is_none() {
            return Err(ConfigError::invalid("robot.inertia", "must be invertible"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GaitType / GaitConfig
// ---------------------------------------------------------------------------

/// Named gait presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GaitType {
    /// All feet on the ground.
    Stand,
    /// Diagonal pairs alternate: FR+RL and FL+RR.
    Trot,
    /// One foot lifts at a time.
    Walk,
    /// Lateral pairs alternate: FR+RR and FL+RL.
    Pace,
    /// Front pair and rear pair alternate.
    Bound,
}

impl GaitType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stand => "stand",
            Self::Trot => "trot",
            Self::Walk => "walk",
            Self::Pace => "pace",
            Self::Bound => "bound",
        }
    }
}

impl fmt::Display for GaitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GaitType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stand" => Ok(Self::Stand),
            "trot" => Ok(Self::Trot),
            "walk" => Ok(Self::Walk),
            "pace" => Ok(Self::Pace),
            "bound" => Ok(Self::Bound),
            _ => Err(ConfigError::UnknownGait(s.to_owned())),
        }
    }
}

/// Gait timing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaitConfig {
    pub name: String,
    /// Stance duration per leg (s).
    pub stance_duration: [f64; NUM_LEGS],
    /// Fraction of the cycle spent in stance, per leg.
    pub duty_factor: [f64; NUM_LEGS],
    /// Phase offset per leg in [0, 1).
    pub phase_offset: [f64; NUM_LEGS],
    /// Fraction of each stance/swing sub-phase during which contact
    /// disagreements are ignored.
    #[serde(default = "default_contact_threshold")]
    pub contact_detection_phase_threshold: f64,
}

impl GaitConfig {
    /// Timing table for a named preset.
    pub fn preset(gait: GaitType) -> Self {
        let (stance, duty, offsets) = match gait {
            GaitType::Stand => (0.3, 1.0, [0.0; NUM_LEGS]),
            GaitType::Trot => (0.3, 0.6, [0.0, 0.5, 0.5, 0.0]),
            GaitType::Walk => (0.6, 0.75, [0.0, 0.5, 0.25, 0.75]),
            GaitType::Pace => (0.3, 0.6, [0.0, 0.5, 0.0, 0.5]),
            GaitType::Bound => (0.3, 0.6, [0.0, 0.0, 0.5, 0.5]),
        };
        Self {
            name: gait.name().to_owned(),
            stance_duration: [stance; NUM_LEGS],
            duty_factor: [duty; NUM_LEGS],
            phase_offset: offsets,
            contact_detection_phase_threshold: default_contact_threshold(),
        }
    }

    /// Full cycle period of one leg (s).
    pub fn cycle_time(&self, leg: LegIndex) -> f64 {
        self.stance_duration[leg.index()] / self.duty_factor[leg.index()]
    }

    /// Swing duration of one leg (s). Zero for a leg that never swings.
    pub fn swing_duration(&self, leg: LegIndex) -> f64 {
        self.cycle_time(leg) - self.stance_duration[leg.index()]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for leg in LegIndex::ALL {
            let i = leg.index();
            let duty = self.duty_factor[i];
            if !(duty > 0.0 && duty <= 1.0) {
                return Err(ConfigError::InvalidDutyFactor { leg, value: duty });
            }
            if self.stance_duration[i] <= 0.0 {
                return Err(ConfigError::invalid(
                    "gait.stance_duration",
                    format!("leg {leg} must be > 0"),
                ));
            }
            if !(0.0..1.0).contains(&self.phase_offset[i]) {
                return Err(ConfigError::invalid(
                    "gait.phase_offset",
                    format!("leg {leg} must be in [0, 1)"),
                ));
            }
        }
        if !(0.0..1.0).contains(&self.contact_detection_phase_threshold) {
            return Err(ConfigError::invalid(
                "gait.contact_detection_phase_threshold",
                "must be in [0, 1)",
            ));
        }
        Ok(())
    }
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self::preset(GaitType::Trot)
    }
}

// ---------------------------------------------------------------------------
// SwingConfig
// ---------------------------------------------------------------------------

/// Swing leg controller parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingConfig {
    /// Apex clearance of the swing foot (m).
    #[serde(default = "default_step_height")]
    pub step_height: f64,
    /// How far below the touchdown target the trajectory ends (m).
    #[serde(default = "default_penetration")]
    pub penetration: f64,
    /// Joint position gains [abduction, thigh, knee].
    #[serde(default = "default_swing_kp")]
    pub kp: [f64; 3],
    /// Joint velocity gains [abduction, thigh, knee].
    #[serde(default = "default_swing_kd")]
    pub kd: [f64; 3],
    /// Raibert feedback gain on hip velocity error (s).
    #[serde(default = "default_velocity_gain")]
    pub velocity_gain: f64,
    /// Maximum horizontal distance of the foot target from the hip (m).
    #[serde(default = "default_max_reach")]
    pub max_reach: f64,
    /// Mid-flight target change that triggers a re-target (m).
    #[serde(default = "default_retarget_threshold")]
    pub retarget_threshold: f64,
    #[serde(default)]
    pub spline: SplineInfo,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            step_height: default_step_height(),
            penetration: default_penetration(),
            kp: default_swing_kp(),
            kd: default_swing_kd(),
            velocity_gain: default_velocity_gain(),
            max_reach: default_max_reach(),
            retarget_threshold: default_retarget_threshold(),
            spline: SplineInfo::default(),
        }
    }
}

impl SwingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_height < 0.0 {
            return Err(ConfigError::invalid("swing.step_height", "must be >= 0"));
        }
        if self.penetration < 0.0 {
            return Err(ConfigError::invalid("swing.penetration", "must be >= 0"));
        }
        if self.max_reach <= 0.0 {
            return Err(ConfigError::invalid("swing.max_reach", "must be > 0"));
        }
        validate_spline(&self.spline)
    }
}

fn validate_spline(info: &SplineInfo) -> Result<(), ConfigError> {
    match info.kind {
        SplineKind::Polynomial => {
            if info.degree != 3 && info.degree != 5 {
                return Err(ConfigError::UnsupportedSpline(format!(
                    "polynomial degree {} (expected 3 or 5)",
                    info.degree
                )));
            }
        }
        SplineKind::BSpline => {
            let n = info.control_points.len();
            if info.degree == 0 || n <= info.degree {
                return Err(ConfigError::UnsupportedSpline(format!(
                    "B-spline of degree {} needs more than {} control points, got {n}",
                    info.degree, info.degree
                )));
            }
            if info.knots.len() != n + info.degree + 1 {
                return Err(ConfigError::UnsupportedSpline(format!(
                    "expected {} knots, got {}",
                    n + info.degree + 1,
                    info.knots.len()
                )));
            }
            if info.knots.windows(2).any(|w| w[1] < w[0]) {
                return Err(ConfigError::UnsupportedSpline(
                    "knot vector must be non-decreasing".into(),
                ));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// StanceConfig
// ---------------------------------------------------------------------------

/// Stance leg controller parameters.
///
/// Six-vectors are ordered `[x, y, z, roll, pitch, yaw]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StanceConfig {
    #[serde(default = "default_stance_kp")]
    pub kp: [f64; 6],
    #[serde(default = "default_stance_kd")]
    pub kd: [f64; 6],
    #[serde(default = "default_max_ddq")]
    pub max_ddq: [f64; 6],
    #[serde(default = "default_min_ddq")]
    pub min_ddq: [f64; 6],
    /// Diagonal weight on the body acceleration tracking error.
    #[serde(default = "default_acc_weight")]
    pub acc_weight: [f64; 6],
    /// Quadratic penalty on force magnitude.
    #[serde(default = "default_regularization")]
    pub regularization: f64,
    /// Minimum vertical force of a loaded leg, as a multiple of body weight.
    #[serde(default = "default_f_min_ratio")]
    pub f_min_ratio: f64,
    /// Maximum vertical force of a loaded leg, as a multiple of body weight.
    #[serde(default = "default_f_max_ratio")]
    pub f_max_ratio: f64,
    /// Fraction of the stance sub-phase over which a leg loads and unloads.
    #[serde(default = "default_ratio_ramp_phase")]
    pub ratio_ramp_phase: f64,
    /// Lowest fraction of `f_max_ratio` a stance leg is ever limited to.
    #[serde(default = "default_ratio_floor")]
    pub ratio_floor: f64,
    #[serde(default = "default_max_solver_iters")]
    pub max_solver_iters: u32,
}

impl Default for StanceConfig {
    fn default() -> Self {
        Self {
            kp: default_stance_kp(),
            kd: default_stance_kd(),
            max_ddq: default_max_ddq(),
            min_ddq: default_min_ddq(),
            acc_weight: default_acc_weight(),
            regularization: default_regularization(),
            f_min_ratio: default_f_min_ratio(),
            f_max_ratio: default_f_max_ratio(),
            ratio_ramp_phase: default_ratio_ramp_phase(),
            ratio_floor: default_ratio_floor(),
            max_solver_iters: default_max_solver_iters(),
        }
    }
}

impl StanceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_ddq.iter().zip(&self.max_ddq).any(|(lo, hi)| lo > hi) {
            return Err(ConfigError::invalid("stance.min_ddq", "must be <= max_ddq"));
        }
        if self.acc_weight.iter().any(|&w| w < 0.0) {
            return Err(ConfigError::invalid("stance.acc_weight", "must be >= 0"));
        }
        if self.regularization <= 0.0 {
            return Err(ConfigError::invalid("stance.regularization", "must be > 0"));
        }
        if self.f_min_ratio < 0.0 || self.f_min_ratio > self.f_max_ratio {
            return Err(ConfigError::invalid(
                "stance.f_min_ratio",
                "must satisfy 0 <= f_min_ratio <= f_max_ratio",
            ));
        }
        if !(0.0..0.5).contains(&self.ratio_ramp_phase) {
            return Err(ConfigError::invalid("stance.ratio_ramp_phase", "must be in [0, 0.5)"));
        }
        if !(self.ratio_floor > 0.0 && self.ratio_floor <= 1.0) {
            return Err(ConfigError::invalid("stance.ratio_floor", "must be in (0, 1]"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LocomotionConfig
// ---------------------------------------------------------------------------

/// Complete locomotion configuration, loaded once at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocomotionConfig {
    #[serde(default)]
    pub robot: RobotParams,
    #[serde(default)]
    pub gait: GaitConfig,
    #[serde(default)]
    pub swing: SwingConfig,
    #[serde(default)]
    pub stance: StanceConfig,
}

impl LocomotionConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.robot.validate()?;
        self.gait.validate()?;
        self.swing.validate()?;
        self.stance.validate()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
