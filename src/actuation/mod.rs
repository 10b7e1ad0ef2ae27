//! # Actuation Module
//!
//! Maps a [`ControlVector`] plus the current [`LinkState`] to motor and
//! steering servo commands.
//!
//! ## Policy per state
//!
//! | State | Motor | Servo |
//! |-------|-------|-------|
//! | Running | from triggers | from yaw (left stick X) |
//! | Setup | stopped | from yaw, middle can be captured |
//! | Disconnected / Initializing | stopped | calibrated middle |
//!
//! ## Motor
//!
//! Speed is non-zero only when exactly one trigger is pressed. The right
//! trigger drives forward and the left one backward, scaled linearly from
//! 0..=32768 to 0..=`max_speed` and capped at `speed_ceiling`.
//!
//! ## Servo
//!
//! `angle = middle + yaw * rotation_limit / 127`, clamped to
//! `middle ± rotation_limit` and to the absolute `servo_min..=servo_max`.
//!
//! Commands reach the [`ActuatorSink`] only when they change.

pub mod store;

use tracing::{debug, info};

use crate::controller::shaper::ControlVector;
use crate::packet::protocol::TRIGGER_MAX;
use crate::state::LinkState;

/// Motor spin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotorDirection {
    #[default]
    Forward,
    Backward,
}

/// One full actuator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub motor_speed: u8,
    pub motor_direction: MotorDirection,
    /// Steering servo angle in degrees
    pub servo_angle: i32,
}

/// Hardware-facing actuator output. Calls are fire-and-forget.
#[cfg_attr(test, mockall::automock)]
pub trait ActuatorSink: Send {
    fn set_motor(&mut self, speed: u8, direction: MotorDirection);

    fn set_servo_angle(&mut self, degrees: i32);
}

/// Sink that only logs; used when no actuator hardware is attached.
#[derive(Debug, Default)]
pub struct TracingActuator;

impl ActuatorSink for TracingActuator {
    fn set_motor(&mut self, speed: u8, direction: MotorDirection) {
        info!(target: "rc_link::actuator", "motor speed={} direction={:?}", speed, direction);
    }

    fn set_servo_angle(&mut self, degrees: i32) {
        info!(target: "rc_link::actuator", "servo angle={}", degrees);
    }
}

/// Absolute maximum speed the motor driver accepts.
pub const MOTOR_SPEED_MAX: u8 = 255;

/// Mapper limits, usually from the `[actuation]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuationSettings {
    /// Speed at full trigger
    pub max_speed: u8,
    /// Hard cap on any emitted speed, kept below [`MOTOR_SPEED_MAX`]
    pub speed_ceiling: u8,
    /// Largest steering deviation from the middle, in degrees
    pub rotation_limit: i32,
    pub servo_min: i32,
    pub servo_max: i32,
}

impl Default for ActuationSettings {
    fn default() -> Self {
        Self {
            max_speed: 250,
            speed_ceiling: 250,
            rotation_limit: 30,
            servo_min: 60,
            servo_max: 140,
        }
    }
}

/// Control vector to actuator command mapping with emit-on-change.
#[derive(Debug, Clone)]
pub struct ActuationMapper {
    settings: ActuationSettings,
    middle: i32,
    last_emitted: Option<ActuatorCommand>,
}

impl ActuationMapper {
    /// Creates a mapper steering around `middle` (clamped to the servo range).
    #[must_use]
    pub fn new(mut settings: ActuationSettings, middle: i32) -> Self {
        settings.speed_ceiling = settings.speed_ceiling.min(MOTOR_SPEED_MAX - 1);
        Self {
            settings,
            middle: middle.clamp(settings.servo_min, settings.servo_max),
            last_emitted: None,
        }
    }

    #[must_use]
    pub fn middle(&self) -> i32 {
        self.middle
    }

    /// Replaces the steering middle; clamped to the servo range.
    pub fn set_middle(&mut self, middle: i32) {
        self.middle = middle.clamp(self.settings.servo_min, self.settings.servo_max);
    }

    /// Fail-safe command: motor stopped, steering centered.
    #[must_use]
    pub fn neutral(&self) -> ActuatorCommand {
        ActuatorCommand {
            motor_speed: 0,
            motor_direction: MotorDirection::Forward,
            servo_angle: self.middle,
        }
    }

    /// Command for `vector` under `state`. Pure; nothing is emitted.
    #[must_use]
    pub fn apply(&self, vector: &ControlVector, state: LinkState) -> ActuatorCommand {
        match state {
            LinkState::Running => {
                let (motor_speed, motor_direction) = self.motor(vector);
                ActuatorCommand {
                    motor_speed,
                    motor_direction,
                    servo_angle: self.servo_angle(vector.left_x),
                }
            }
            LinkState::Setup => ActuatorCommand {
                servo_angle: self.servo_angle(vector.left_x),
                ..self.neutral()
            },
            LinkState::Disconnected | LinkState::Initializing => self.neutral(),
        }
    }

    /// Applies and forwards whatever changed since the last emission.
    pub fn drive(&mut self, vector: &ControlVector, state: LinkState, sink: &mut dyn ActuatorSink) -> ActuatorCommand {
        let command = self.apply(vector, state);
        self.emit(command, sink);
        command
    }

    /// Forwards `command` to `sink`, skipping parts equal to the last emission.
    pub fn emit(&mut self, command: ActuatorCommand, sink: &mut dyn ActuatorSink) {
        let last = self.last_emitted;

        let motor_changed = last.map_or(true, |l| {
            l.motor_speed != command.motor_speed || l.motor_direction != command.motor_direction
        });
        if motor_changed {
            sink.set_motor(command.motor_speed, command.motor_direction);
        }

        if last.map_or(true, |l| l.servo_angle != command.servo_angle) {
            sink.set_servo_angle(command.servo_angle);
        }

        self.last_emitted = Some(command);
    }

    #[must_use]
    pub fn last_emitted(&self) -> Option<ActuatorCommand> {
        self.last_emitted
    }

    /// Makes the steering angle currently commanded by `vector` the new
    /// middle and returns it.
    pub fn capture_middle(&mut self, vector: &ControlVector) -> i32 {
        let angle = self.servo_angle(vector.left_x);
        debug!("Steering middle {} -> {}", self.middle, angle);
        self.set_middle(angle);
        self.middle
    }

    fn motor(&self, vector: &ControlVector) -> (u8, MotorDirection) {
        let (trigger, direction) = match (vector.trigger_left, vector.trigger_right) {
            (0, 0) => return (0, MotorDirection::Forward),
            (0, forward) => (forward, MotorDirection::Forward),
            (backward, 0) => (backward, MotorDirection::Backward),
            _ => return (0, MotorDirection::Forward),
        };

        let trigger = u32::from(trigger.min(TRIGGER_MAX));
        let scaled = trigger * u32::from(self.settings.max_speed) / u32::from(TRIGGER_MAX);
        let speed = scaled.min(u32::from(self.settings.speed_ceiling)) as u8;
        (speed, direction)
    }

    fn servo_angle(&self, yaw: i8) -> i32 {
        let limit = self.settings.rotation_limit;
        let yaw = i32::from(yaw).clamp(-127, 127);
        let offset = (yaw as f32 * limit as f32 / 127.0).round() as i32;

        let low = (self.middle - limit).max(self.settings.servo_min);
        let high = (self.middle + limit).min(self.settings.servo_max);
        (self.middle + offset).clamp(low, high.max(low))
    }
}
