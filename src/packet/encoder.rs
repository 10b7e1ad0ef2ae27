//! # Packet Encoder
//!
//! Serializes packets and payloads into wire bytes. All multi-byte integers
//! are big-endian.

use bytes::{BufMut, BytesMut};

use super::protocol::*;

/// Encode a packet into a complete frame
///
/// # Arguments
///
/// * `packet` - Packet to serialize
///
/// # Returns
///
/// * `Vec<u8>` - Header (11 bytes) followed by the payload
///
/// # Examples
///
/// ```
/// use rc_link::packet::encoder::encode_packet;
/// use rc_link::packet::protocol::{Packet, PacketType};
///
/// let mut packet = Packet::new(0xA0, 0xB0, PacketType::ControllerData, vec![0x10]);
/// packet.id = 2;
/// packet.previous_id = 1;
///
/// let frame = encode_packet(&packet);
/// assert_eq!(frame, vec![0xA0, 0xB0, 0x01, 0, 0, 0, 2, 0, 0, 0, 1, 0x10]);
/// ```
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let mut frame = BytesMut::with_capacity(packet.frame_size());
    frame.put_u8(packet.sender);
    frame.put_u8(packet.receiver);
    frame.put_u8(packet.packet_type.as_byte());
    frame.put_u32(packet.id);
    frame.put_u32(packet.previous_id);
    frame.put_slice(&packet.payload);
    frame.to_vec()
}

/// Encode a ControllerData payload (9 bytes)
///
/// ```text
/// Byte 0:    buttons bitmask
/// Byte 1-4:  left_x, left_y, right_x, right_y (i8)
/// Byte 5-6:  trigger_left (u16 BE)
/// Byte 7-8:  trigger_right (u16 BE)
/// ```
pub fn encode_controller_payload(payload: &ControllerPayload) -> Vec<u8> {
    let mut bytes = BytesMut::with_capacity(CONTROLLER_PAYLOAD_SIZE);
    bytes.put_u8(payload.buttons);
    bytes.put_i8(payload.left_x);
    bytes.put_i8(payload.left_y);
    bytes.put_i8(payload.right_x);
    bytes.put_i8(payload.right_y);
    bytes.put_u16(payload.trigger_left);
    bytes.put_u16(payload.trigger_right);
    bytes.to_vec()
}

/// Encode a TelemetryData payload (6 bytes)
pub fn encode_telemetry_payload(payload: &TelemetryPayload) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(TELEMETRY_PAYLOAD_SIZE);
    bytes.extend_from_slice(&float_to_wire(payload.battery_voltage));
    bytes.extend_from_slice(&payload.frame_rate.to_be_bytes());
    bytes
}

/// IEEE-754 bits of `value`, most significant byte first
#[must_use]
pub fn float_to_wire(value: f32) -> [u8; 4] {
    value.to_bits().to_be_bytes()
}
