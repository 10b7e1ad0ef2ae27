//! # Packet Protocol Constants and Types
//!
//! Core wire definitions shared by the controller and the mobile unit.
//!
//! ## Frame Layout
//!
//! ```text
//! +--------+----------+------+-----------+-------------------+-------------+
//! | sender | receiver | type | id (u32)  | previous_id (u32) | payload ... |
//! |   1B   |    1B    |  1B  | 4B BE     | 4B BE             | 0..N bytes  |
//! +--------+----------+------+-----------+-------------------+-------------+
//! ```
//!
//! There is no length field and no checksum: the radio delivers whole frames,
//! so the payload length is whatever remains after the 11-byte header.

use crate::error::CodecError;

/// Header size in bytes (sender + receiver + type + id + previous_id)
pub const PACKET_HEADER_SIZE: usize = 11;

/// Largest frame a LoRa-class radio carries in one transmission
pub const MAX_FRAME_SIZE: usize = 255;

/// Largest payload that fits [`MAX_FRAME_SIZE`]
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - PACKET_HEADER_SIZE;

/// Reserved id meaning "no previous packet yet"
pub const NO_PACKET_ID: u32 = 0;

/// ControllerData payload size: buttons(1) + sticks(4) + triggers(2 x 2)
pub const CONTROLLER_PAYLOAD_SIZE: usize = 9;

/// TelemetryData payload size: battery voltage f32(4) + frame rate u16(2)
pub const TELEMETRY_PAYLOAD_SIZE: usize = 6;

/// Full-scale trigger value (unsigned, asymmetric to the sticks)
pub const TRIGGER_MAX: u16 = 32768;

/// Packet type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Robot to controller: battery and link telemetry
    TelemetryData,
    /// Controller to robot: shaped stick/trigger/button state
    ControllerData,
}

impl PacketType {
    /// Wire value of this packet type.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            PacketType::TelemetryData => 0x00,
            PacketType::ControllerData => 0x01,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PacketType::TelemetryData),
            0x01 => Ok(PacketType::ControllerData),
            other => Err(CodecError::UnknownType(other)),
        }
    }
}

/// One radio frame.
///
/// `id` identifies the logical update, not the frame: redundant copies of the
/// same update share an id. `previous_id` is the id of the sender's preceding
/// logical update, which lets the receiver notice gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sender: u8,
    pub receiver: u8,
    pub packet_type: PacketType,
    pub id: u32,
    pub previous_id: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Builds an unnumbered packet; the transport fills `id` and `previous_id` on send.
    #[must_use]
    pub fn new(sender: u8, receiver: u8, packet_type: PacketType, payload: Vec<u8>) -> Self {
        Self {
            sender,
            receiver,
            packet_type,
            id: NO_PACKET_ID,
            previous_id: NO_PACKET_ID,
            payload,
        }
    }

    /// Encoded size of this packet in bytes.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }
}

/// Controller buttons, in payload bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    Cross,
    Circle,
    Square,
    Triangle,
    Select,
    Start,
    L1,
    R1,
}

impl Button {
    /// All buttons, in bit order.
    pub const ALL: [Button; 8] = [
        Button::Cross,
        Button::Circle,
        Button::Square,
        Button::Triangle,
        Button::Select,
        Button::Start,
        Button::L1,
        Button::R1,
    ];

    /// Bit mask of this button in the payload `buttons` byte.
    #[must_use]
    pub fn mask(self) -> u8 {
        1 << (self as u8)
    }
}

/// Decoded ControllerData payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerPayload {
    pub buttons: u8,
    pub left_x: i8,
    pub left_y: i8,
    pub right_x: i8,
    pub right_y: i8,
    pub trigger_left: u16,
    pub trigger_right: u16,
}

/// Decoded TelemetryData payload.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetryPayload {
    /// Mobile unit battery voltage in volts
    pub battery_voltage: f32,
    /// Frames per second the mobile unit is receiving
    pub frame_rate: u16,
}
