//! # Packet Module
//!
//! Wire format of the controller/mobile-unit link.
//!
//! This module handles:
//! - Packet header encoding (sender, receiver, type, id, previous id)
//! - ControllerData and TelemetryData payload formats
//! - Explicit big-endian float conversion for telemetry values

pub mod protocol;
pub mod encoder;
pub mod decoder;
