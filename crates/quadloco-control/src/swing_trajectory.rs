//! Per-leg swing foot trajectory with phase bookkeeping.

use log::debug;
use nalgebra::Vector3;

use quadloco_core::error::ConfigError;
use quadloco_core::types::{SplineInfo, StepParameters};

use crate::spline::{SwingTrajectoryGenerator, TrajectorySample};

/// Durations closer than this are considered equal.
const DURATION_TOLERANCE: f64 = 1e-6;

/// One generator plus the step it is currently executing.
///
/// Swings run on a local clock that starts at 0 at liftoff and ends at the
/// step duration. A swing joined late only spans the tail of that window.
#[derive(Debug, Clone, PartialEq)]
pub struct SwingFootTrajectory {
    generator: SwingTrajectoryGenerator,
    step: StepParameters,
}

impl SwingFootTrajectory {
    pub fn new(spline: &SplineInfo, step: StepParameters) -> Result<Self, ConfigError> {
        Ok(Self {
            generator: SwingTrajectoryGenerator::new(spline)?,
            step,
        })
    }

    pub const fn step_parameters(&self) -> &StepParameters {
        &self.step
    }

    /// Sample the swing.
    ///
    /// With `phase_module` set, `t` is a swing phase in `[0, 1]` and is mapped
    /// onto the local clock; otherwise it is local time since liftoff.
    pub fn generate_trajectory_point(&self, t: f64, phase_module: bool) -> TrajectorySample {
        let time = if phase_module { t * self.step.duration } else { t };
        self.generator.generate_trajectory(time)
    }

    /// Start a fresh swing at local time 0.
    pub fn reset_foot_trajectory(
        &mut self,
        duration: f64,
        initial_pos: &Vector3<f64>,
        target_pos: &Vector3<f64>,
    ) {
        self.join_foot_trajectory(duration, 0.0, initial_pos, target_pos);
    }

    /// Start a swing that is already `phase` of the way through.
    ///
    /// The interpolant covers the rest of the swing, from `initial_pos` at
    /// `phase * duration` to touchdown at `duration`.
    pub fn join_foot_trajectory(
        &mut self,
        duration: f64,
        phase: f64,
        initial_pos: &Vector3<f64>,
        target_pos: &Vector3<f64>,
    ) {
        let start = phase.clamp(0.0, 1.0) * duration;
        self.step.duration = duration;
        let remaining = StepParameters {
            duration: duration - start,
            ..self.step
        };
        self.generator
            .set_parameters(start, initial_pos, target_pos, &remaining);
    }

    /// Move the touchdown target of the running swing.
    ///
    /// The trajectory is spliced from its own state at `current_time`, so the
    /// commanded foot position never jumps. Returns false when the swing
    /// cannot be spliced: `current_time` outside the window, or `duration`
    /// differing from the running swing.
    pub fn retarget_foot_trajectory(
        &mut self,
        duration: f64,
        current_time: f64,
        target_pos: &Vector3<f64>,
    ) -> bool {
        if (duration - self.step.duration).abs() > DURATION_TOLERANCE {
            debug!(
                "re-target rejected: duration {duration} differs from running swing {}",
                self.step.duration
            );
            return false;
        }
        self.generator
            .update_spline(current_time, target_pos, self.step.height)
    }
}
