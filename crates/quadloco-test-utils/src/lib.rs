//! Shared test fixtures and utilities for quadloco crates.
//!
//! Provides a standing robot snapshot built through the leg kinematics,
//! mock estimators with fixed outputs, and deterministic RNG setup.

pub mod fixtures;
pub mod mocks;
pub mod rng;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use fixtures::{a1_config, jittered_standing_state, standing_joint_positions, standing_state};
pub use mocks::{FixedGroundEstimator, FixedVelocityEstimator};
pub use rng::seeded_rng;
