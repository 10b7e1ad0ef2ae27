//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::actuation::{ActuationSettings, MOTOR_SPEED_MAX};
use crate::controller::calibration::{ResponseCurve, MAX_STICK_DEADZONE};
use crate::controller::shaper::{Axis, ShaperSettings};
use crate::error::{RcLinkError, Result};
use crate::link::{IdWidth, TransportSettings};
use crate::packet::protocol::{Button, CONTROLLER_PAYLOAD_SIZE, MAX_FRAME_SIZE, PACKET_HEADER_SIZE, TRIGGER_MAX};
use crate::telemetry::battery::BatteryKind;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub radio: RadioConfig,
    pub input: InputConfig,
    pub actuation: ActuationConfig,
    pub state: StateConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

/// Which end of the link this process is.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Controller,
    Robot,
}

/// Radio backend selection.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RadioBackend {
    Udp,
    Serial,
}

/// Node identity
#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    #[serde(default = "default_role")]
    pub role: Role,

    #[serde(default = "default_own_id")]
    pub own_id: u8,

    #[serde(default = "default_peer_id")]
    pub peer_id: u8,
}

/// Radio channel and transport configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    #[serde(default = "default_backend")]
    pub backend: RadioBackend,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_peer_addr")]
    pub peer_addr: String,

    #[serde(default = "default_serial_port")]
    pub serial_port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    #[serde(default = "default_id_width")]
    pub id_width: IdWidth,

    #[serde(default = "default_redundant_copies")]
    pub redundant_copies: u8,

    #[serde(default = "default_receive_budget_ms")]
    pub receive_budget_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,
}

/// Controller input configuration
#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    #[serde(default)]
    pub device_path: String,

    #[serde(default = "default_adc_bits")]
    pub adc_bits: u8,

    #[serde(default = "default_stick_deadzone")]
    pub stick_deadzone: i32,

    #[serde(default = "default_trigger_deadzone")]
    pub trigger_deadzone: u16,

    #[serde(default = "default_expo")]
    pub expo: f32,

    #[serde(default = "default_calibration_samples")]
    pub calibration_samples: usize,

    #[serde(default)]
    pub invert: Vec<Axis>,
}

/// Motor and steering configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ActuationConfig {
    #[serde(default = "default_max_speed")]
    pub max_speed: u8,

    #[serde(default = "default_speed_ceiling")]
    pub speed_ceiling: u8,

    #[serde(default = "default_rotation_limit")]
    pub rotation_limit: i32,

    #[serde(default = "default_servo_min")]
    pub servo_min: i32,

    #[serde(default = "default_servo_max")]
    pub servo_max: i32,

    #[serde(default = "default_middle")]
    pub default_middle: i32,

    #[serde(default = "default_calibration_file")]
    pub calibration_file: String,
}

/// State machine and loop timing
#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_setup_button")]
    pub setup_button: Button,

    #[serde(default = "default_capture_button")]
    pub capture_button: Button,

    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_request_interval")]
    pub request_interval: u32,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,

    #[serde(default = "default_log_format")]
    pub format: String,

    #[serde(default = "default_display_interval_ms")]
    pub display_interval_ms: u64,

    #[serde(default = "default_battery_kind")]
    pub battery_kind: BatteryKind,

    #[serde(default)]
    pub battery_path: String,

    #[serde(default = "default_battery_fixed_volts")]
    pub battery_fixed_volts: f32,

    #[serde(default = "default_battery_interval_ms")]
    pub battery_interval_ms: u64,
}

/// Process logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; empty logs to stderr only
    #[serde(default)]
    pub file_dir: String,
}

// Default value functions
fn default_role() -> Role { Role::Controller }
fn default_own_id() -> u8 { 0x01 }
fn default_peer_id() -> u8 { 0x02 }

fn default_backend() -> RadioBackend { RadioBackend::Udp }
fn default_bind_addr() -> String { "0.0.0.0:7400".to_string() }
fn default_peer_addr() -> String { "127.0.0.1:7401".to_string() }
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_max_frame_size() -> usize { MAX_FRAME_SIZE }
fn default_id_width() -> IdWidth { IdWidth::U32 }
fn default_redundant_copies() -> u8 { 2 }
fn default_receive_budget_ms() -> u64 { 30 }
fn default_poll_interval_ms() -> u64 { 2 }
fn default_connection_timeout_ms() -> u64 { 500 }
fn default_rate_window_ms() -> u64 { 1000 }

fn default_adc_bits() -> u8 { 8 }
fn default_stick_deadzone() -> i32 { 5 }
fn default_trigger_deadzone() -> u16 { 1024 }
fn default_expo() -> f32 { 1.0 }
fn default_calibration_samples() -> usize { 32 }

fn default_max_speed() -> u8 { 250 }
fn default_speed_ceiling() -> u8 { 250 }
fn default_rotation_limit() -> i32 { 30 }
fn default_servo_min() -> i32 { 60 }
fn default_servo_max() -> i32 { 140 }
fn default_middle() -> i32 { 90 }
fn default_calibration_file() -> String { "./calibration.json".to_string() }

fn default_debounce_ms() -> u64 { 300 }
fn default_setup_button() -> Button { Button::Select }
fn default_capture_button() -> Button { Button::Start }
fn default_tick_ms() -> u64 { 20 }

fn default_telemetry_enabled() -> bool { true }
fn default_request_interval() -> u32 { 16 }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_interval_ms() -> u64 { 100 }
fn default_log_format() -> String { "jsonl".to_string() }
fn default_display_interval_ms() -> u64 { 50 }
fn default_battery_kind() -> BatteryKind { BatteryKind::None }
fn default_battery_fixed_volts() -> f32 { 0.0 }
fn default_battery_interval_ms() -> u64 { 1000 }

fn default_log_level() -> String { "info".to_string() }

fn invalid(message: impl std::fmt::Display) -> RcLinkError {
    RcLinkError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rc_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Node identity
        if self.node.own_id == self.node.peer_id {
            return Err(invalid("own_id and peer_id must differ"));
        }

        // Radio backend
        match self.radio.backend {
            RadioBackend::Udp => {
                for (name, addr) in [("bind_addr", &self.radio.bind_addr), ("peer_addr", &self.radio.peer_addr)] {
                    if addr.parse::<SocketAddr>().is_err() {
                        return Err(invalid(format!("{} '{}' is not a socket address", name, addr)));
                    }
                }
            }
            RadioBackend::Serial => {
                if self.radio.serial_port.is_empty() {
                    return Err(invalid("serial_port cannot be empty"));
                }
                if self.radio.baud_rate == 0 {
                    return Err(invalid("baud_rate must be positive"));
                }
            }
        }

        let min_frame = PACKET_HEADER_SIZE + CONTROLLER_PAYLOAD_SIZE;
        if self.radio.max_frame_size < min_frame || self.radio.max_frame_size > MAX_FRAME_SIZE {
            return Err(invalid(format!(
                "max_frame_size must be between {} and {}",
                min_frame, MAX_FRAME_SIZE
            )));
        }

        if self.radio.redundant_copies > 10 {
            return Err(invalid("redundant_copies must be between 0 and 10"));
        }

        if self.radio.receive_budget_ms == 0 || self.radio.receive_budget_ms > 1000 {
            return Err(invalid("receive_budget_ms must be between 1 and 1000"));
        }

        if self.radio.poll_interval_ms == 0 || self.radio.poll_interval_ms > self.radio.receive_budget_ms {
            return Err(invalid("poll_interval_ms must be between 1 and receive_budget_ms"));
        }

        if self.radio.connection_timeout_ms < 10 || self.radio.connection_timeout_ms > 60000 {
            return Err(invalid("connection_timeout_ms must be between 10 and 60000"));
        }

        if self.radio.rate_window_ms < 100 || self.radio.rate_window_ms > 10000 {
            return Err(invalid("rate_window_ms must be between 100 and 10000"));
        }

        // Input shaping
        if self.input.adc_bits == 0 || self.input.adc_bits > 16 {
            return Err(invalid("adc_bits must be between 1 and 16"));
        }

        if self.input.stick_deadzone < 0 || self.input.stick_deadzone > MAX_STICK_DEADZONE {
            return Err(invalid(format!("stick_deadzone must be between 0 and {}", MAX_STICK_DEADZONE)));
        }

        if self.input.trigger_deadzone > TRIGGER_MAX / 4 {
            return Err(invalid(format!("trigger_deadzone must be between 0 and {}", TRIGGER_MAX / 4)));
        }

        if !(0.0..=1.0).contains(&self.input.expo) {
            return Err(invalid("expo must be between 0.0 and 1.0"));
        }

        if self.input.calibration_samples > 10000 {
            return Err(invalid("calibration_samples must be at most 10000"));
        }

        for axis in &self.input.invert {
            if !Axis::STICKS.contains(axis) {
                return Err(invalid(format!("invert only applies to stick axes, got {:?}", axis)));
            }
        }

        // Actuation limits
        if self.actuation.speed_ceiling >= MOTOR_SPEED_MAX {
            return Err(invalid(format!("speed_ceiling must be below {}", MOTOR_SPEED_MAX)));
        }

        if self.actuation.max_speed > self.actuation.speed_ceiling {
            return Err(invalid("max_speed must not exceed speed_ceiling"));
        }

        if self.actuation.servo_min < 0 || self.actuation.servo_max > 180 {
            return Err(invalid("servo range must be within 0 and 180 degrees"));
        }

        if self.actuation.servo_min >= self.actuation.servo_max {
            return Err(invalid("servo_min must be less than servo_max"));
        }

        if self.actuation.default_middle < self.actuation.servo_min
            || self.actuation.default_middle > self.actuation.servo_max
        {
            return Err(invalid("default_middle must be within servo range (servo_min to servo_max)"));
        }

        if self.actuation.rotation_limit < 1 || self.actuation.rotation_limit > 90 {
            return Err(invalid("rotation_limit must be between 1 and 90"));
        }

        if self.actuation.calibration_file.is_empty() {
            return Err(invalid("calibration_file cannot be empty"));
        }

        // State machine timing
        if self.state.debounce_ms > 5000 {
            return Err(invalid("debounce_ms must be at most 5000"));
        }

        if self.state.tick_ms == 0 || self.state.tick_ms > 1000 {
            return Err(invalid("tick_ms must be between 1 and 1000"));
        }

        if self.state.setup_button == self.state.capture_button {
            return Err(invalid("setup_button and capture_button must differ"));
        }

        // Telemetry
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be positive"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be positive"));
        }

        if self.telemetry.log_interval_ms == 0 || self.telemetry.log_interval_ms > 60000 {
            return Err(invalid("log_interval_ms must be between 1 and 60000"));
        }

        if self.telemetry.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        if self.telemetry.display_interval_ms < 10 || self.telemetry.display_interval_ms > 10000 {
            return Err(invalid("display_interval_ms must be between 10 and 10000"));
        }

        if matches!(self.telemetry.battery_kind, BatteryKind::Sysfs | BatteryKind::Divider)
            && self.telemetry.battery_path.is_empty()
        {
            return Err(invalid("battery_path cannot be empty for sysfs or divider batteries"));
        }

        if self.telemetry.battery_interval_ms == 0 {
            return Err(invalid("battery_interval_ms must be positive"));
        }

        if self.logging.level.is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        Ok(())
    }

    /// Transport tuning derived from `[radio]`
    #[must_use]
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            id_width: self.radio.id_width,
            connection_timeout: Duration::from_millis(self.radio.connection_timeout_ms),
            rate_window: Duration::from_millis(self.radio.rate_window_ms),
            max_frame_size: self.radio.max_frame_size,
        }
    }

    /// Input shaping derived from `[input]`
    #[must_use]
    pub fn shaper_settings(&self) -> ShaperSettings {
        ShaperSettings {
            adc_bits: self.input.adc_bits,
            stick_curve: ResponseCurve::new(self.input.stick_deadzone, self.input.expo),
            trigger_deadzone: self.input.trigger_deadzone,
            inverted: self.input.invert.clone(),
        }
    }

    /// Mapper limits derived from `[actuation]`
    #[must_use]
    pub fn actuation_settings(&self) -> ActuationSettings {
        ActuationSettings {
            max_speed: self.actuation.max_speed,
            speed_ceiling: self.actuation.speed_ceiling,
            rotation_limit: self.actuation.rotation_limit,
            servo_min: self.actuation.servo_min,
            servo_max: self.actuation.servo_max,
        }
    }
}
