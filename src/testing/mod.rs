//! Testing utilities for rigstream
//!
//! Deterministic synthetic frames and a simulated focus rig, so the pipeline
//! and the depth scan can be exercised offline without camera hardware.

pub mod rig;
pub mod synthetic_data;

pub use rig::{SimulatedActuator, SimulatedFocusCamera};
pub use synthetic_data::{blurred_frame, shifted_frame, texture_value, textured_frame};
