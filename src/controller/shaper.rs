//! # Input Shaper
//!
//! Turns raw analog/button samples into a [`ControlVector`]: calibration
//! offsets, deadzone and response curve for sticks, linear scaling with a
//! deadzone for triggers, and one-tick button release pulses.
//!
//! Out-of-range raw counts are clamped, never rejected, so a noisy input
//! device cannot stall the control loop.

use serde::Deserialize;

use crate::controller::calibration::{
    adc_max, normalize_stick, normalize_trigger, ResponseCurve, STICK_MAX, STICK_MIN,
};
use crate::packet::protocol::{Button, ControllerPayload};

/// Analog channels of a raw input source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    LeftX,
    LeftY,
    RightX,
    RightY,
    TriggerLeft,
    TriggerRight,
}

impl Axis {
    /// Stick axes, in [`RawSample::sticks`] order.
    pub const STICKS: [Axis; 4] = [Axis::LeftX, Axis::LeftY, Axis::RightX, Axis::RightY];

    /// Trigger axes, in [`RawSample::triggers`] order.
    pub const TRIGGERS: [Axis; 2] = [Axis::TriggerLeft, Axis::TriggerRight];
}

/// Hardware-facing input: polled once per control tick.
pub trait RawInputSource: Send {
    /// Raw ADC count of `axis`.
    fn sample_axis(&mut self, axis: Axis) -> u16;

    fn sample_button(&mut self, button: Button) -> bool;
}

/// One raw reading of every input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    pub sticks: [u16; 4],
    pub triggers: [u16; 2],
    pub buttons: ButtonSet,
}

impl RawSample {
    /// Polls every channel of `source` once.
    pub fn read(source: &mut dyn RawInputSource) -> Self {
        let mut sample = RawSample::default();
        for (slot, axis) in sample.sticks.iter_mut().zip(Axis::STICKS) {
            *slot = source.sample_axis(axis);
        }
        for (slot, axis) in sample.triggers.iter_mut().zip(Axis::TRIGGERS) {
            *slot = source.sample_axis(axis);
        }
        for button in Button::ALL {
            if source.sample_button(button) {
                sample.buttons.insert(button);
            }
        }
        sample
    }

    /// Sticks at the ADC midpoint, triggers and buttons at rest.
    #[must_use]
    pub fn centered(adc_bits: u8) -> Self {
        let mid = (adc_max(adc_bits) / 2 + 1) as u16;
        Self {
            sticks: [mid; 4],
            triggers: [0; 2],
            buttons: ButtonSet::EMPTY,
        }
    }
}

/// Set of pressed buttons, stored as the payload bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ButtonSet(u8);

impl ButtonSet {
    pub const EMPTY: ButtonSet = ButtonSet(0);

    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn contains(self, button: Button) -> bool {
        self.0 & button.mask() != 0
    }

    pub fn insert(&mut self, button: Button) {
        self.0 |= button.mask();
    }

    pub fn remove(&mut self, button: Button) {
        self.0 &= !button.mask();
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Buttons in `self` that are not in `current`.
    #[must_use]
    pub fn released_in(self, current: ButtonSet) -> ButtonSet {
        ButtonSet(self.0 & !current.0)
    }
}

impl FromIterator<Button> for ButtonSet {
    fn from_iter<I: IntoIterator<Item = Button>>(iter: I) -> Self {
        let mut set = ButtonSet::EMPTY;
        for button in iter {
            set.insert(button);
        }
        set
    }
}

/// Shaped control input.
///
/// Values are processed (offset, deadzone, curve applied), never raw counts.
/// `released` holds buttons that went from pressed to not pressed on the
/// tick that produced this vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlVector {
    pub left_x: i8,
    pub left_y: i8,
    pub right_x: i8,
    pub right_y: i8,
    /// 0..=32768
    pub trigger_left: u16,
    /// 0..=32768
    pub trigger_right: u16,
    pub buttons: ButtonSet,
    pub released: ButtonSet,
}

impl ControlVector {
    /// Rebuilds a vector from a received payload. Release pulses are not on
    /// the wire; see [`ButtonEdges::annotate`].
    #[must_use]
    pub fn from_payload(payload: &ControllerPayload) -> Self {
        Self {
            left_x: payload.left_x,
            left_y: payload.left_y,
            right_x: payload.right_x,
            right_y: payload.right_y,
            trigger_left: payload.trigger_left,
            trigger_right: payload.trigger_right,
            buttons: ButtonSet::from_bits(payload.buttons),
            released: ButtonSet::EMPTY,
        }
    }

    #[must_use]
    pub fn to_payload(&self) -> ControllerPayload {
        ControllerPayload {
            buttons: self.buttons.bits(),
            left_x: self.left_x,
            left_y: self.left_y,
            right_x: self.right_x,
            right_y: self.right_y,
            trigger_left: self.trigger_left,
            trigger_right: self.trigger_right,
        }
    }

    #[must_use]
    pub fn is_pressed(&self, button: Button) -> bool {
        self.buttons.contains(button)
    }

    #[must_use]
    pub fn is_released(&self, button: Button) -> bool {
        self.released.contains(button)
    }

    /// Ends the release pulses of this tick.
    pub fn clear_edges(&mut self) {
        self.released = ButtonSet::EMPTY;
    }
}

/// Derives release pulses from consecutive button states.
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonEdges {
    previous: ButtonSet,
}

impl ButtonEdges {
    /// Records `current` and returns the buttons released since the last call.
    pub fn update(&mut self, current: ButtonSet) -> ButtonSet {
        let released = self.previous.released_in(current);
        self.previous = current;
        released
    }

    /// Sets `vector.released` from its button state.
    pub fn annotate(&mut self, vector: &mut ControlVector) {
        vector.released = self.update(vector.buttons);
    }
}

/// Shaping parameters, usually from the `[input]` config section.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaperSettings {
    /// Resolution of the raw ADC counts
    pub adc_bits: u8,
    pub stick_curve: ResponseCurve,
    /// Trigger deadzone in trigger units (0..=32768)
    pub trigger_deadzone: u16,
    /// Stick axes whose sign is flipped after shaping
    pub inverted: Vec<Axis>,
}

impl Default for ShaperSettings {
    fn default() -> Self {
        Self {
            adc_bits: 12,
            stick_curve: ResponseCurve::default(),
            trigger_deadzone: 1024,
            inverted: Vec::new(),
        }
    }
}

/// Stateful shaper; keeps calibration offsets and the previous button state.
#[derive(Debug, Clone)]
pub struct InputShaper {
    settings: ShaperSettings,
    stick_offsets: [i32; 4],
    trigger_offsets: [u16; 2],
    edges: ButtonEdges,
}

impl InputShaper {
    #[must_use]
    pub fn new(settings: ShaperSettings) -> Self {
        Self {
            settings,
            stick_offsets: [0; 4],
            trigger_offsets: [0; 2],
            edges: ButtonEdges::default(),
        }
    }

    /// Shapes one raw sample.
    pub fn shape(&mut self, sample: &RawSample) -> ControlVector {
        let mut sticks = [0i8; 4];
        for (i, axis) in Axis::STICKS.iter().enumerate() {
            sticks[i] = self.shape_stick(*axis, sample.sticks[i], self.stick_offsets[i]);
        }

        let triggers = [
            self.shape_trigger(sample.triggers[0], self.trigger_offsets[0]),
            self.shape_trigger(sample.triggers[1], self.trigger_offsets[1]),
        ];

        ControlVector {
            left_x: sticks[0],
            left_y: sticks[1],
            right_x: sticks[2],
            right_y: sticks[3],
            trigger_left: triggers[0],
            trigger_right: triggers[1],
            buttons: sample.buttons,
            released: self.edges.update(sample.buttons),
        }
    }

    /// Learns zero offsets from samples taken with the controls at rest.
    ///
    /// An empty slice leaves the offsets unchanged.
    pub fn calibrate(&mut self, samples: &[RawSample]) {
        if samples.is_empty() {
            return;
        }
        let bits = self.settings.adc_bits;
        let count = samples.len() as i64;

        for i in 0..4 {
            let sum: i64 = samples
                .iter()
                .map(|s| i64::from(normalize_stick(s.sticks[i], bits)))
                .sum();
            self.stick_offsets[i] = (sum as f64 / count as f64).round() as i32;
        }
        for i in 0..2 {
            let sum: i64 = samples
                .iter()
                .map(|s| i64::from(normalize_trigger(s.triggers[i], bits)))
                .sum();
            self.trigger_offsets[i] = (sum / count) as u16;
        }
    }

    #[must_use]
    pub fn stick_offsets(&self) -> [i32; 4] {
        self.stick_offsets
    }

    #[must_use]
    pub fn trigger_offsets(&self) -> [u16; 2] {
        self.trigger_offsets
    }

    #[must_use]
    pub fn settings(&self) -> &ShaperSettings {
        &self.settings
    }

    fn shape_stick(&self, axis: Axis, raw: u16, offset: i32) -> i8 {
        let centered = (normalize_stick(raw, self.settings.adc_bits) - offset).clamp(STICK_MIN, STICK_MAX);
        let shaped = self.settings.stick_curve.apply(centered);
        let shaped = if self.settings.inverted.contains(&axis) { -shaped } else { shaped };
        shaped as i8
    }

    fn shape_trigger(&self, raw: u16, offset: u16) -> u16 {
        let value = normalize_trigger(raw, self.settings.adc_bits).saturating_sub(offset);
        if value < self.settings.trigger_deadzone {
            0
        } else {
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::protocol::TRIGGER_MAX;

    const BITS: u8 = 12;
    const MID: u16 = 2048;
    const FULL: u16 = 4095;

    fn shaper() -> InputShaper {
        InputShaper::new(ShaperSettings {
            adc_bits: BITS,
            stick_curve: ResponseCurve::new(5, 1.0),
            trigger_deadzone: 1024,
            inverted: Vec::new(),
        })
    }

    fn sample_with_left_x(raw: u16) -> RawSample {
        let mut sample = RawSample::centered(BITS);
        sample.sticks[0] = raw;
        sample
    }

    struct FixedSource {
        axes: [u16; 6],
        buttons: ButtonSet,
    }

    impl RawInputSource for FixedSource {
        fn sample_axis(&mut self, axis: Axis) -> u16 {
            self.axes[axis as usize]
        }

        fn sample_button(&mut self, button: Button) -> bool {
            self.buttons.contains(button)
        }
    }

    // ==================== RawSample Tests ====================

    #[test]
    fn test_read_polls_every_channel() {
        let mut source = FixedSource {
            axes: [1, 2, 3, 4, 5, 6],
            buttons: [Button::Cross, Button::R1].into_iter().collect(),
        };

        let sample = RawSample::read(&mut source);
        assert_eq!(sample.sticks, [1, 2, 3, 4]);
        assert_eq!(sample.triggers, [5, 6]);
        assert!(sample.buttons.contains(Button::Cross));
        assert!(sample.buttons.contains(Button::R1));
        assert!(!sample.buttons.contains(Button::Start));
    }

    #[test]
    fn test_centered_sample() {
        let sample = RawSample::centered(8);
        assert_eq!(sample.sticks, [128; 4]);
        assert_eq!(sample.triggers, [0, 0]);
        assert!(sample.buttons.is_empty());
    }

    // ==================== ButtonSet Tests ====================

    #[test]
    fn test_button_set_insert_remove() {
        let mut set = ButtonSet::EMPTY;
        set.insert(Button::Select);
        assert!(set.contains(Button::Select));
        assert_eq!(set.bits(), 0x10);

        set.remove(Button::Select);
        assert!(set.is_empty());
    }

    #[test]
    fn test_released_in() {
        let before: ButtonSet = [Button::Cross, Button::Select].into_iter().collect();
        let after: ButtonSet = [Button::Cross].into_iter().collect();

        let released = before.released_in(after);
        assert!(released.contains(Button::Select));
        assert!(!released.contains(Button::Cross));
    }

    // ==================== Stick Shaping Tests ====================

    #[test]
    fn test_centered_sticks_shape_to_zero() {
        let mut shaper = shaper();
        let vector = shaper.shape(&RawSample::centered(BITS));
        assert_eq!(vector.left_x, 0);
        assert_eq!(vector.left_y, 0);
        assert_eq!(vector.right_x, 0);
        assert_eq!(vector.right_y, 0);
    }

    #[test]
    fn test_deadzone_samples_shape_to_zero() {
        let mut shaper = shaper();
        // ±4 stick units around center (1 unit is ~16 counts at 12 bits)
        for raw in (MID - 64)..=(MID + 64) {
            let vector = shaper.shape(&sample_with_left_x(raw));
            assert_eq!(vector.left_x, 0, "raw {}", raw);
        }
    }

    #[test]
    fn test_full_deflection_reaches_endpoints() {
        let mut shaper = shaper();
        assert_eq!(shaper.shape(&sample_with_left_x(FULL)).left_x, 127);
        assert_eq!(shaper.shape(&sample_with_left_x(0)).left_x, -127);
    }

    #[test]
    fn test_stick_shaping_odd_symmetric() {
        // At 8 bits raw 128 ± k normalizes to exactly ±k
        let mut shaper = InputShaper::new(ShaperSettings {
            adc_bits: 8,
            ..ShaperSettings::default()
        });
        for k in 5..=127u16 {
            let mut plus = RawSample::centered(8);
            plus.sticks[2] = 128 + k;
            let mut minus = RawSample::centered(8);
            minus.sticks[2] = 128 - k;
            assert_eq!(shaper.shape(&plus).right_x, -shaper.shape(&minus).right_x, "k {}", k);
        }
    }

    #[test]
    fn test_out_of_range_raw_is_clamped() {
        let mut shaper = shaper();
        let vector = shaper.shape(&sample_with_left_x(u16::MAX));
        assert_eq!(vector.left_x, 127);
    }

    #[test]
    fn test_inverted_axis() {
        let mut shaper = InputShaper::new(ShaperSettings {
            inverted: vec![Axis::LeftY],
            ..ShaperSettings::default()
        });
        let mut sample = RawSample::centered(BITS);
        sample.sticks[1] = FULL;
        sample.sticks[0] = FULL;

        let vector = shaper.shape(&sample);
        assert_eq!(vector.left_y, -127);
        assert_eq!(vector.left_x, 127);
    }

    // ==================== Trigger Shaping Tests ====================

    #[test]
    fn test_trigger_rest_is_zero() {
        let mut shaper = shaper();
        let mut sample = RawSample::centered(BITS);
        sample.triggers = [50, 100];
        let vector = shaper.shape(&sample);
        assert_eq!(vector.trigger_left, 0);
        assert_eq!(vector.trigger_right, 0);
    }

    #[test]
    fn test_trigger_full_scale() {
        let mut shaper = shaper();
        let mut sample = RawSample::centered(BITS);
        sample.triggers = [FULL, 2048];
        let vector = shaper.shape(&sample);
        assert_eq!(vector.trigger_left, TRIGGER_MAX);
        assert!(vector.trigger_right > 16000 && vector.trigger_right < 16500);
    }

    // ==================== Release Edge Tests ====================

    #[test]
    fn test_release_is_one_tick_pulse() {
        let mut shaper = shaper();
        let mut pressed = RawSample::centered(BITS);
        pressed.buttons.insert(Button::Select);
        let released = RawSample::centered(BITS);

        let v1 = shaper.shape(&pressed);
        assert!(v1.is_pressed(Button::Select));
        assert!(!v1.is_released(Button::Select));

        let v2 = shaper.shape(&released);
        assert!(!v2.is_pressed(Button::Select));
        assert!(v2.is_released(Button::Select));

        let v3 = shaper.shape(&released);
        assert!(!v3.is_released(Button::Select));
    }

    #[test]
    fn test_no_release_without_prior_press() {
        let mut shaper = shaper();
        let vector = shaper.shape(&RawSample::centered(BITS));
        assert!(vector.released.is_empty());
    }

    #[test]
    fn test_button_edges_annotate_received_vectors() {
        let mut edges = ButtonEdges::default();
        let mut first = ControlVector::from_payload(&ControllerPayload {
            buttons: Button::Start.mask(),
            ..ControllerPayload::default()
        });
        edges.annotate(&mut first);
        assert!(first.released.is_empty());

        let mut second = ControlVector::from_payload(&ControllerPayload::default());
        edges.annotate(&mut second);
        assert!(second.is_released(Button::Start));

        second.clear_edges();
        assert!(second.released.is_empty());
    }

    // ==================== Calibration Tests ====================

    #[test]
    fn test_calibrate_learns_offsets() {
        let mut shaper = shaper();
        // Left X rests about 10 units right of center
        let rest = sample_with_left_x(MID + 160);
        shaper.calibrate(&[rest; 8]);

        let expected = normalize_stick(MID + 160, BITS);
        assert!(expected >= 9);
        assert_eq!(shaper.stick_offsets(), [expected, 0, 0, 0]);
        assert_eq!(shaper.shape(&rest).left_x, 0);
    }

    #[test]
    fn test_calibrate_trigger_offsets() {
        let mut shaper = shaper();
        let mut rest = RawSample::centered(BITS);
        rest.triggers = [200, 0];
        shaper.calibrate(&[rest; 4]);
        assert_eq!(shaper.trigger_offsets()[0], normalize_trigger(200, BITS));

        rest.triggers = [FULL, 0];
        let vector = shaper.shape(&rest);
        assert_eq!(vector.trigger_left, TRIGGER_MAX - normalize_trigger(200, BITS));
    }

    #[test]
    fn test_calibrate_empty_keeps_offsets() {
        let mut shaper = shaper();
        shaper.calibrate(&[]);
        assert_eq!(shaper.stick_offsets(), [0; 4]);
    }

    // ==================== Payload Conversion Tests ====================

    #[test]
    fn test_payload_conversion() {
        let vector = ControlVector {
            left_x: -40,
            left_y: 12,
            right_x: 127,
            right_y: -127,
            trigger_left: 0,
            trigger_right: 30000,
            buttons: [Button::L1].into_iter().collect(),
            released: [Button::R1].into_iter().collect(),
        };

        let payload = vector.to_payload();
        assert_eq!(payload.buttons, Button::L1.mask());

        let back = ControlVector::from_payload(&payload);
        assert_eq!(back.left_x, -40);
        assert_eq!(back.trigger_right, 30000);
        assert!(back.released.is_empty());
    }
}
