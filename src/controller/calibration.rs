//! # Calibration Module
//!
//! Deadzone and response-curve primitives for stick inputs, plus conversion
//! of raw ADC counts into the signed/unsigned control ranges.
//!
//! ## Deadzone
//!
//! Stick values whose magnitude is below the deadzone collapse to 0. Values
//! outside it pass through unscaled, so full deflection still reaches the
//! endpoint.
//!
//! ## Response Curve
//!
//! `output = sign(x) * ((1 - expo) * |x|/127 + expo * (|x|/127)³) * 127`
//!
//! - `expo = 0.0`: linear
//! - `expo = 1.0`: pure cubic (default), small deflections give much smaller
//!   output, which keeps actuators calm around center
//!
//! The curve is computed on the magnitude and the sign re-applied, so it is
//! exactly odd-symmetric, and `f(0) = 0`, `f(±127) = ±127`.
//!
//! ## Usage
//!
//! ```
//! use rc_link::controller::calibration::ResponseCurve;
//!
//! let curve = ResponseCurve::new(5, 1.0);
//!
//! assert_eq!(curve.apply(3), 0);       // inside deadzone
//! assert_eq!(curve.apply(127), 127);   // endpoint preserved
//! assert_eq!(curve.apply(-64), -curve.apply(64));
//! ```

use crate::packet::protocol::TRIGGER_MAX;

/// Largest stick magnitude the curve produces
pub const STICK_MAX: i32 = 127;

/// Lowest signed stick value before the curve
pub const STICK_MIN: i32 = -128;

/// Largest deadzone accepted, in stick units
pub const MAX_STICK_DEADZONE: i32 = 32;

/// Deadzone plus cubic response for a signed stick axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseCurve {
    /// Deadzone threshold in stick units (0..=32).
    deadzone: i32,
    /// Cubic blend factor (0.0 to 1.0).
    expo: f32,
}

impl Default for ResponseCurve {
    fn default() -> Self {
        Self {
            deadzone: 5,
            expo: 1.0,
        }
    }
}

impl ResponseCurve {
    /// Creates a curve; out-of-range parameters are clamped.
    ///
    /// # Arguments
    ///
    /// * `deadzone` - Threshold in stick units (0 to 32)
    /// * `expo` - Cubic blend factor (0.0 = linear, 1.0 = pure cubic)
    #[must_use]
    pub fn new(deadzone: i32, expo: f32) -> Self {
        Self {
            deadzone: deadzone.clamp(0, MAX_STICK_DEADZONE),
            expo: expo.clamp(0.0, 1.0),
        }
    }

    /// Linear response without deadzone.
    #[must_use]
    pub fn linear() -> Self {
        Self {
            deadzone: 0,
            expo: 0.0,
        }
    }

    #[must_use]
    pub fn deadzone(&self) -> i32 {
        self.deadzone
    }

    #[must_use]
    pub fn expo(&self) -> f32 {
        self.expo
    }

    /// Applies deadzone and curve to a calibrated stick value.
    ///
    /// Inputs beyond ±127 are clamped first; never fails.
    #[must_use]
    pub fn apply(&self, value: i32) -> i32 {
        let magnitude = value.abs().min(STICK_MAX);
        if magnitude < self.deadzone {
            return 0;
        }

        let shaped = self.apply_expo(magnitude as f32 / STICK_MAX as f32);
        let out = (shaped * STICK_MAX as f32).round() as i32;
        value.signum() * out.clamp(0, STICK_MAX)
    }

    #[inline]
    fn apply_expo(&self, input: f32) -> f32 {
        if self.expo == 0.0 {
            input
        } else {
            let linear = (1.0 - self.expo) * input;
            let cubic = self.expo * input * input * input;
            linear + cubic
        }
    }
}

/// Largest raw count for an ADC of `bits` resolution.
#[must_use]
pub fn adc_max(bits: u8) -> u32 {
    (1u32 << bits.clamp(1, 16)) - 1
}

/// Converts a raw stick count to the signed range -128..=127.
///
/// Counts above the ADC's range are clamped.
///
/// # Examples
///
/// ```
/// use rc_link::controller::calibration::normalize_stick;
///
/// assert_eq!(normalize_stick(0, 12), -128);
/// assert_eq!(normalize_stick(2048, 12), 0);
/// assert_eq!(normalize_stick(4095, 12), 127);
/// assert_eq!(normalize_stick(u16::MAX, 12), 127);
/// ```
#[must_use]
pub fn normalize_stick(raw: u16, bits: u8) -> i32 {
    let max = adc_max(bits);
    let raw = u32::from(raw).min(max);
    ((raw * 255 + max / 2) / max) as i32 + STICK_MIN
}

/// Converts a raw trigger count to 0..=32768.
///
/// # Examples
///
/// ```
/// use rc_link::controller::calibration::normalize_trigger;
///
/// assert_eq!(normalize_trigger(0, 8), 0);
/// assert_eq!(normalize_trigger(255, 8), 32768);
/// ```
#[must_use]
pub fn normalize_trigger(raw: u16, bits: u8) -> u16 {
    let max = adc_max(bits);
    let raw = u32::from(raw).min(max);
    (raw * u32::from(TRIGGER_MAX) / max) as u16
}
