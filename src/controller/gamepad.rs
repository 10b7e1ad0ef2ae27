//! # Gamepad Input Module
//!
//! evdev-backed [`RawInputSource`]. A reader thread drains device events
//! through an [`EventMapper`] into a shared snapshot; the control loop
//! samples that snapshot without blocking.
//!
//! ## Device Detection
//!
//! With an explicit `device_path` that node is opened. Otherwise every
//! `/dev/input/event*` node is scanned in sorted order and the first one
//! exposing both `ABS_X` and `BTN_SOUTH` is used.
//!
//! ## Axis Codes (EV_ABS)
//!
//! | Axis | evdev Code | Range |
//! |------|------------|-------|
//! | Left Stick X | ABS_X | 0-255 |
//! | Left Stick Y | ABS_Y | 0-255 |
//! | Right Stick X | ABS_Z | 0-255 |
//! | Right Stick Y | ABS_RZ | 0-255 |
//! | Left Trigger | ABS_RX | 0-255 |
//! | Right Trigger | ABS_RY | 0-255 |
//!
//! ## Button Codes (EV_KEY)
//!
//! | Button | evdev Code |
//! |--------|------------|
//! | Cross | BTN_SOUTH |
//! | Circle | BTN_EAST |
//! | Square | BTN_WEST |
//! | Triangle | BTN_NORTH |
//! | Select | BTN_SELECT |
//! | Start | BTN_START |
//! | L1 | BTN_TL |
//! | R1 | BTN_TR |

use evdev::{AbsoluteAxisType, Device, InputEvent, Key};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::controller::shaper::{Axis, ButtonSet, RawInputSource};
use crate::error::{RcLinkError, Result};
use crate::packet::protocol::Button;

/// Raw axis range reported by common gamepads.
pub const AXIS_MAX: i32 = 255;
/// Raw axis center value.
pub const AXIS_CENTER: u16 = 128;
/// ADC resolution matching [`AXIS_MAX`].
pub const GAMEPAD_ADC_BITS: u8 = 8;

/// Latest raw state of the gamepad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GamepadState {
    /// Indexed by [`Axis`] discriminant
    pub axes: [u16; 6],
    pub buttons: ButtonSet,
}

impl Default for GamepadState {
    fn default() -> Self {
        Self {
            axes: [AXIS_CENTER, AXIS_CENTER, AXIS_CENTER, AXIS_CENTER, 0, 0],
            buttons: ButtonSet::EMPTY,
        }
    }
}

impl GamepadState {
    #[must_use]
    pub fn axis(&self, axis: Axis) -> u16 {
        self.axes[axis as usize]
    }
}

/// Folds evdev events into a [`GamepadState`].
#[derive(Debug, Default)]
pub struct EventMapper {
    state: GamepadState,
}

impl EventMapper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> &GamepadState {
        &self.state
    }

    /// Applies one event. Sync events and unmapped codes are ignored.
    pub fn process_event(&mut self, event: &InputEvent) {
        match event.kind() {
            evdev::InputEventKind::AbsAxis(axis) => self.process_axis_event(axis, event.value()),
            evdev::InputEventKind::Key(key) => self.process_key_event(key, event.value() != 0),
            _ => {}
        }
    }

    fn process_axis_event(&mut self, axis: AbsoluteAxisType, value: i32) {
        let slot = match axis {
            AbsoluteAxisType::ABS_X => Axis::LeftX,
            AbsoluteAxisType::ABS_Y => Axis::LeftY,
            AbsoluteAxisType::ABS_Z => Axis::RightX,
            AbsoluteAxisType::ABS_RZ => Axis::RightY,
            AbsoluteAxisType::ABS_RX => Axis::TriggerLeft,
            AbsoluteAxisType::ABS_RY => Axis::TriggerRight,
            _ => return,
        };
        self.state.axes[slot as usize] = value.clamp(0, AXIS_MAX) as u16;
    }

    fn process_key_event(&mut self, key: Key, pressed: bool) {
        let button = match key {
            Key::BTN_SOUTH => Button::Cross,
            Key::BTN_EAST => Button::Circle,
            Key::BTN_WEST => Button::Square,
            Key::BTN_NORTH => Button::Triangle,
            Key::BTN_SELECT => Button::Select,
            Key::BTN_START => Button::Start,
            Key::BTN_TL => Button::L1,
            Key::BTN_TR => Button::R1,
            _ => return,
        };
        if pressed {
            self.state.buttons.insert(button);
        } else {
            self.state.buttons.remove(button);
        }
    }

    /// Centers sticks and releases everything.
    pub fn reset(&mut self) {
        self.state = GamepadState::default();
    }
}

/// Gamepad handle implementing [`RawInputSource`].
///
/// When the device disappears the reader thread exits and sampling returns
/// the at-rest state.
pub struct GamepadInput {
    shared: Arc<Mutex<GamepadState>>,
    connected: Arc<AtomicBool>,
    device_path: String,
}

impl GamepadInput {
    /// Opens the gamepad and starts its reader thread.
    ///
    /// # Errors
    ///
    /// - `ControllerNotFound`: no matching device
    /// - `Controller`: `/dev/input` unreadable or `device_path` cannot be opened
    /// - `Io`: the reader thread could not be spawned
    pub fn open(device_path: Option<&str>) -> Result<Self> {
        let (device, device_path) = match device_path {
            Some(path) => {
                let device = Device::open(path)
                    .map_err(|e| RcLinkError::Controller(format!("Failed to open {}: {}", path, e)))?;
                (device, path.to_string())
            }
            None => find_gamepad()?,
        };

        info!(
            "Using gamepad {} at {}",
            device.name().unwrap_or("<unnamed>"),
            device_path
        );

        let shared = Arc::new(Mutex::new(GamepadState::default()));
        let connected = Arc::new(AtomicBool::new(true));

        let thread_shared = Arc::clone(&shared);
        let thread_connected = Arc::clone(&connected);
        let thread_path = device_path.clone();
        std::thread::Builder::new()
            .name("gamepad-reader".to_string())
            .spawn(move || read_events(device, &thread_path, &thread_shared, &thread_connected))?;

        Ok(Self {
            shared,
            connected,
            device_path,
        })
    }

    #[must_use]
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> GamepadState {
        if !self.is_connected() {
            return GamepadState::default();
        }
        match self.shared.lock() {
            Ok(state) => *state,
            Err(_) => GamepadState::default(),
        }
    }
}

impl RawInputSource for GamepadInput {
    fn sample_axis(&mut self, axis: Axis) -> u16 {
        self.snapshot().axis(axis)
    }

    fn sample_button(&mut self, button: Button) -> bool {
        self.snapshot().buttons.contains(button)
    }
}

fn read_events(
    mut device: Device,
    path: &str,
    shared: &Mutex<GamepadState>,
    connected: &AtomicBool,
) {
    let mut mapper = EventMapper::new();
    loop {
        match device.fetch_events() {
            Ok(events) => {
                for event in events {
                    mapper.process_event(&event);
                }
                if let Ok(mut state) = shared.lock() {
                    *state = *mapper.state();
                }
            }
            Err(e) => {
                warn!("Gamepad {} lost: {}", path, e);
                connected.store(false, Ordering::Relaxed);
                return;
            }
        }
    }
}

fn looks_like_gamepad(device: &Device) -> bool {
    let has_stick = device
        .supported_absolute_axes()
        .map_or(false, |axes| axes.contains(AbsoluteAxisType::ABS_X));
    let has_face_button = device
        .supported_keys()
        .map_or(false, |keys| keys.contains(Key::BTN_SOUTH));
    has_stick && has_face_button
}

fn find_gamepad() -> Result<(Device, String)> {
    let input_dir = Path::new("/dev/input");
    if !input_dir.exists() {
        return Err(RcLinkError::Controller(
            "/dev/input directory not found".to_string(),
        ));
    }

    let mut entries: Vec<_> = std::fs::read_dir(input_dir)
        .map_err(|e| RcLinkError::Controller(format!("Failed to read /dev/input: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RcLinkError::Controller(format!("Failed to read directory entry: {}", e)))?;

    // Deterministic choice when several gamepads are attached
    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let path = entry.path();
        let is_event_node = path
            .file_name()
            .map_or(false, |name| name.to_string_lossy().starts_with("event"));
        if !is_event_node {
            continue;
        }

        match Device::open(&path) {
            Ok(device) if looks_like_gamepad(&device) => {
                return Ok((device, path.to_string_lossy().to_string()));
            }
            Ok(_) => debug!("Skipping non-gamepad input device {}", path.display()),
            Err(e) => debug!("Could not open {}: {}", path.display(), e),
        }
    }

    Err(RcLinkError::ControllerNotFound)
}
