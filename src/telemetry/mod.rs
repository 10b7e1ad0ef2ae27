//! # Telemetry Module
//!
//! Robot-to-controller telemetry and local status output.
//!
//! This module handles:
//! - Deciding which controller packets get a telemetry answer
//! - Battery voltage readout
//! - JSONL logging with file rotation
//! - Status display rendering

pub mod battery;
pub mod display;
pub mod logger;

use crate::packet::protocol::TelemetryPayload;

/// Multiplexes telemetry onto the controller's packet stream.
///
/// The robot answers a ControllerData update with TelemetryData when the
/// update's id is a multiple of `interval`. An interval of 0 disables
/// telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryScheduler {
    interval: u32,
}

impl TelemetryScheduler {
    #[must_use]
    pub fn new(interval: u32) -> Self {
        Self { interval }
    }

    #[must_use]
    pub fn should_respond(&self, id: u32) -> bool {
        self.interval != 0 && id != 0 && id % self.interval == 0
    }

    /// Payload for the answer.
    #[must_use]
    pub fn payload(battery_voltage: Option<f32>, frame_rate: u32) -> TelemetryPayload {
        TelemetryPayload {
            battery_voltage: battery_voltage.unwrap_or(0.0),
            frame_rate: frame_rate.min(u32::from(u16::MAX)) as u16,
        }
    }
}
