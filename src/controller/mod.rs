//! # Controller Module
//!
//! Handheld-side input handling.
//!
//! This module handles:
//! - Gamepad detection and event reading via evdev
//! - Normalizing raw samples, deadzones and the cubic response curve
//! - Calibration offsets and button release detection

pub mod calibration;
pub mod gamepad;
pub mod shaper;

pub use shaper::{Axis, ButtonEdges, ButtonSet, ControlVector, InputShaper, RawInputSource, RawSample, ShaperSettings};
