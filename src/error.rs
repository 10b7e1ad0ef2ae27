//! # Error Types
//!
//! Custom error types for RC Link using `thiserror`.

use thiserror::Error;

/// Errors produced while decoding a wire packet or one of its payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Fewer bytes than the fixed packet header.
    #[error("frame truncated: {len} bytes, header needs 11")]
    Truncated { len: usize },

    /// Packet type byte is not a known [`PacketType`](crate::packet::protocol::PacketType).
    #[error("unknown packet type: 0x{0:02X}")]
    UnknownType(u8),

    /// Payload shorter than the format it is decoded as.
    #[error("payload too short: expected {expected} bytes, got {actual}")]
    PayloadTooShort { expected: usize, actual: usize },
}

/// Main error type for RC Link
#[derive(Debug, Error)]
pub enum RcLinkError {
    /// Wire codec errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors (telemetry log, calibration store)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Radio channel errors
    #[error("Radio channel error: {0}")]
    Channel(String),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Encoded frame does not fit the channel
    #[error("Frame of {size} bytes exceeds channel maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Input device errors
    #[error("Controller error: {0}")]
    Controller(String),

    /// A runtime task panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),

    /// No usable input device found
    #[error("No gamepad input device found")]
    ControllerNotFound,
}

/// Result type alias for RC Link
pub type Result<T> = std::result::Result<T, RcLinkError>;
