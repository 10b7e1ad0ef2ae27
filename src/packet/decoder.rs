//! # Packet Decoder
//!
//! Decodes frames received from the radio. Decoding is receiver-tolerant:
//! the payload is whatever follows the header, and payload decoders ignore
//! trailing bytes.

use super::protocol::*;
use crate::error::CodecError;

/// Decode a complete frame
///
/// # Arguments
///
/// * `frame` - Raw frame bytes as delivered by the radio
///
/// # Returns
///
/// * `Result<Packet, CodecError>` - Decoded packet
///
/// # Errors
///
/// Returns error if:
/// - Frame is shorter than the 11-byte header
/// - Type byte is unknown
pub fn decode_packet(frame: &[u8]) -> Result<Packet, CodecError> {
    if frame.len() < PACKET_HEADER_SIZE {
        return Err(CodecError::Truncated { len: frame.len() });
    }

    let packet_type = PacketType::try_from(frame[2])?;

    Ok(Packet {
        sender: frame[0],
        receiver: frame[1],
        packet_type,
        id: u32::from_be_bytes([frame[3], frame[4], frame[5], frame[6]]),
        previous_id: u32::from_be_bytes([frame[7], frame[8], frame[9], frame[10]]),
        payload: frame[PACKET_HEADER_SIZE..].to_vec(),
    })
}

/// Decode a ControllerData payload
pub fn decode_controller_payload(payload: &[u8]) -> Result<ControllerPayload, CodecError> {
    ensure_len(payload, CONTROLLER_PAYLOAD_SIZE)?;

    Ok(ControllerPayload {
        buttons: payload[0],
        left_x: payload[1] as i8,
        left_y: payload[2] as i8,
        right_x: payload[3] as i8,
        right_y: payload[4] as i8,
        trigger_left: u16::from_be_bytes([payload[5], payload[6]]),
        trigger_right: u16::from_be_bytes([payload[7], payload[8]]),
    })
}

/// Decode a TelemetryData payload
pub fn decode_telemetry_payload(payload: &[u8]) -> Result<TelemetryPayload, CodecError> {
    ensure_len(payload, TELEMETRY_PAYLOAD_SIZE)?;

    Ok(TelemetryPayload {
        battery_voltage: float_from_wire([payload[0], payload[1], payload[2], payload[3]]),
        frame_rate: u16::from_be_bytes([payload[4], payload[5]]),
    })
}

/// Rebuild an `f32` from its IEEE-754 bits, most significant byte first
#[must_use]
pub fn float_from_wire(bytes: [u8; 4]) -> f32 {
    f32::from_bits(u32::from_be_bytes(bytes))
}

fn ensure_len(payload: &[u8], expected: usize) -> Result<(), CodecError> {
    if payload.len() < expected {
        return Err(CodecError::PayloadTooShort {
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}
