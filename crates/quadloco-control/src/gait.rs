//! Periodic gait generator.
//!
//! Each leg runs its own phase clock:
//!
//! ```text
//! T_cycle = stance_duration / duty_factor
//! phase   = frac(t / T_cycle + offset)
//! desired = Stance if phase < duty_factor else Swing
//! ```
//!
//! The *detected* state starts from the desired one and is corrected by
//! contact sensing once the leg is past the settling window at the start of
//! its stance or swing sub-phase.

use log::{info, warn};

use quadloco_core::config::GaitConfig;
use quadloco_core::error::ConfigError;
use quadloco_core::types::{LegIndex, LegState, NUM_LEGS};

/// Desired state for a cycle phase. The boundary `phase == duty_factor` is swing.
pub fn leg_state_for_phase(phase: f64, duty_factor: f64) -> LegState {
    if phase < duty_factor {
        LegState::Stance
    } else {
        LegState::Swing
    }
}

/// Progress through the current stance or swing sub-phase, in `[0, 1)`.
pub fn sub_phase(phase: f64, duty_factor: f64) -> f64 {
    if phase < duty_factor {
        phase / duty_factor
    } else {
        (phase - duty_factor) / (1.0 - duty_factor)
    }
}

/// Per-leg stance/swing scheduler with contact-based state correction.
#[derive(Clone, Debug)]
pub struct GaitGenerator {
    config: GaitConfig,
    /// Clock value at the last reset.
    origin: f64,
    last_time: f64,
    phase: [f64; NUM_LEGS],
    normalized_phase: [f64; NUM_LEGS],
    desired: [LegState; NUM_LEGS],
    previous_desired: [LegState; NUM_LEGS],
    detected: [LegState; NUM_LEGS],
}

impl GaitGenerator {
    /// Create a generator reset at time 0. `config` must already be validated.
    pub fn new(config: GaitConfig) -> Self {
        let mut gait = Self {
            config,
            origin: 0.0,
            last_time: 0.0,
            phase: [0.0; NUM_LEGS],
            normalized_phase: [0.0; NUM_LEGS],
            desired: [LegState::Stance; NUM_LEGS],
            previous_desired: [LegState::Stance; NUM_LEGS],
            detected: [LegState::Stance; NUM_LEGS],
        };
        gait.reset(0.0);
        gait
    }

    pub const fn config(&self) -> &GaitConfig {
        &self.config
    }

    /// Restart the phase clocks at `current_time`.
    ///
    /// Leg states take the pattern the offsets prescribe at phase zero, with
    /// contact sensing assumed to agree.
    pub fn reset(&mut self, current_time: f64) {
        self.origin = current_time;
        self.last_time = current_time;
        for leg in LegIndex::ALL {
            let i = leg.index();
            let (phase, state, sub) = self.evaluate(leg, 0.0);
            self.phase[i] = phase;
            self.normalized_phase[i] = sub;
            self.desired[i] = state;
            self.previous_desired[i] = state;
            self.detected[i] = state;
        }
    }

    /// Swap the timing table and restart the clocks at `current_time`.
    pub fn switch_gait(&mut self, config: GaitConfig, current_time: f64) -> Result<(), ConfigError> {
        config.validate()?;
        info!("switching gait {} -> {}", self.config.name, config.name);
        self.config = config;
        self.reset(current_time);
        Ok(())
    }

    /// Advance to `current_time` and fold in the sensed contacts.
    pub fn update(&mut self, current_time: f64, contacts: &[bool; NUM_LEGS]) {
        if current_time < self.last_time {
            warn!(
                "gait clock went backwards ({} -> {current_time}) without reset",
                self.last_time
            );
        }
        self.last_time = current_time;
        let elapsed = current_time - self.origin;
        let threshold = self.config.contact_detection_phase_threshold;

        for leg in LegIndex::ALL {
            let i = leg.index();
            let (phase, desired, sub) = self.evaluate(leg, elapsed);
            self.phase[i] = phase;
            self.normalized_phase[i] = sub;
            self.previous_desired[i] = self.desired[i];
            self.desired[i] = desired;
            self.detected[i] = if sub < threshold {
                desired
            } else {
                match (desired, contacts[i]) {
                    (LegState::Swing, true) => LegState::EarlyContact,
                    (LegState::Stance, false) => LegState::LoseContact,
                    (state, _) => state,
                }
            };
        }
    }

    /// Cycle phase, desired state and sub-phase of `leg` at `elapsed` seconds
    /// after the origin.
    fn evaluate(&self, leg: LegIndex, elapsed: f64) -> (f64, LegState, f64) {
        let i = leg.index();
        let duty = self.config.duty_factor[i];
        let phase = (elapsed / self.config.cycle_time(leg) + self.config.phase_offset[i]).rem_euclid(1.0);
        (phase, leg_state_for_phase(phase, duty), sub_phase(phase, duty))
    }

    /// Desired states the schedule prescribes at `current_time`, without
    /// touching the generator.
    pub fn desired_states_at(&self, current_time: f64) -> [LegState; NUM_LEGS] {
        let elapsed = current_time - self.origin;
        LegIndex::ALL.map(|leg| self.evaluate(leg, elapsed).1)
    }

    /// Whether advancing to `current_time` would lift any leg off.
    pub fn liftoff_pending(&self, current_time: f64) -> bool {
        let next = self.desired_states_at(current_time);
        LegIndex::ALL
            .iter()
            .any(|leg| self.desired[leg.index()] != LegState::Swing && next[leg.index()] == LegState::Swing)
    }

    // ---------------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------------

    pub const fn desired_leg_state(&self) -> &[LegState; NUM_LEGS] {
        &self.desired
    }

    pub const fn detected_leg_state(&self) -> &[LegState; NUM_LEGS] {
        &self.detected
    }

    pub const fn desired_state(&self, leg: LegIndex) -> LegState {
        self.desired[leg.index()]
    }

    pub const fn detected_state(&self, leg: LegIndex) -> LegState {
        self.detected[leg.index()]
    }

    /// Cycle phase in `[0, 1)`.
    pub const fn phase(&self, leg: LegIndex) -> f64 {
        self.phase[leg.index()]
    }

    /// Progress through the current stance or swing sub-phase, in `[0, 1)`.
    pub const fn normalized_phase(&self, leg: LegIndex) -> f64 {
        self.normalized_phase[leg.index()]
    }

    pub fn stance_duration(&self, leg: LegIndex) -> f64 {
        self.config.stance_duration[leg.index()]
    }

    pub fn swing_duration(&self, leg: LegIndex) -> f64 {
        self.config.swing_duration(leg)
    }

    pub fn cycle_time(&self, leg: LegIndex) -> f64 {
        self.config.cycle_time(leg)
    }

    /// True on the update at which `leg` went from stance to swing.
    pub fn entered_swing(&self, leg: LegIndex) -> bool {
        let i = leg.index();
        self.desired[i] == LegState::Swing && self.previous_desired[i] != LegState::Swing
    }

    /// Scheduled contact per leg (desired state is stance).
    pub fn desired_contacts(&self) -> [bool; NUM_LEGS] {
        self.desired.map(|s| s == LegState::Stance)
    }

    /// Legs the stance controller owns this tick.
    pub fn stance_owned(&self) -> [bool; NUM_LEGS] {
        self.detected.map(LegState::is_stance_owned)
    }
}
