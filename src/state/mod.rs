//! # Connection State Module
//!
//! Tracks whether the link is trusted and which behavior is active.
//!
//! ```text
//! Initializing ──hardware_ready──▶ Disconnected ◀──timeout── Running ◀──gesture──▶ Setup
//!                                       │                       ▲                    │
//!                                       └──────connected────────┘                    │
//!                                       ◀──────────────────timeout───────────────────┘
//! ```
//!
//! Gesture-driven transitions (`Running ⇄ Setup`) are only honored once the
//! debounce period has passed since the previous transition of any kind.

use std::fmt;
use std::time::{Duration, Instant};
use tracing::info;

/// Link status gating actuation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Initializing,
    Disconnected,
    Running,
    Setup,
}

impl LinkState {
    /// Status-light pattern for this state.
    #[must_use]
    pub fn indicator(self) -> Indicator {
        match self {
            LinkState::Initializing | LinkState::Setup => Indicator::Solid,
            LinkState::Running => Indicator::FastBlink,
            LinkState::Disconnected => Indicator::SlowBlink,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Initializing => "initializing",
            LinkState::Disconnected => "disconnected",
            LinkState::Running => "running",
            LinkState::Setup => "setup",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status-light pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Solid,
    FastBlink,
    SlowBlink,
}

impl Indicator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Indicator::Solid => "solid",
            Indicator::FastBlink => "fast-blink",
            Indicator::SlowBlink => "slow-blink",
        }
    }
}

/// A state change, reported once when it happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LinkState,
    pub to: LinkState,
}

/// Connection/behavior state machine.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: LinkState,
    debounce: Duration,
    last_transition_at: Option<Instant>,
}

impl ConnectionStateMachine {
    /// Starts in [`LinkState::Initializing`].
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: LinkState::Initializing,
            debounce,
            last_transition_at: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Hardware bring-up finished: `Initializing → Disconnected`.
    ///
    /// No effect in any other state.
    pub fn hardware_ready(&mut self, now: Instant) -> Option<Transition> {
        if self.state == LinkState::Initializing {
            Some(self.transition(LinkState::Disconnected, now))
        } else {
            None
        }
    }

    /// Advances on one control tick.
    ///
    /// `connected` is the transport's liveness verdict; `gesture_released`
    /// is the setup button's release pulse for this tick.
    pub fn update(&mut self, connected: bool, gesture_released: bool, now: Instant) -> Option<Transition> {
        let next = match self.state {
            LinkState::Initializing => return None,
            LinkState::Disconnected if connected => LinkState::Running,
            LinkState::Disconnected => return None,
            LinkState::Running | LinkState::Setup if !connected => LinkState::Disconnected,
            LinkState::Running if gesture_released && self.debounce_elapsed(now) => LinkState::Setup,
            LinkState::Setup if gesture_released && self.debounce_elapsed(now) => LinkState::Running,
            LinkState::Running | LinkState::Setup => return None,
        };
        Some(self.transition(next, now))
    }

    fn debounce_elapsed(&self, now: Instant) -> bool {
        self.last_transition_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.debounce)
    }

    fn transition(&mut self, to: LinkState, now: Instant) -> Transition {
        let from = self.state;
        self.state = to;
        self.last_transition_at = Some(now);
        info!("Link state {} -> {}", from, to);
        Transition { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(300);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn running_machine(start: Instant) -> ConnectionStateMachine {
        let mut machine = ConnectionStateMachine::new(DEBOUNCE);
        machine.hardware_ready(start);
        machine.update(true, false, start);
        assert_eq!(machine.state(), LinkState::Running);
        machine
    }

    // ==================== Lifecycle Tests ====================

    #[test]
    fn test_starts_initializing() {
        let machine = ConnectionStateMachine::new(DEBOUNCE);
        assert_eq!(machine.state(), LinkState::Initializing);
    }

    #[test]
    fn test_initializing_ignores_link() {
        let mut machine = ConnectionStateMachine::new(DEBOUNCE);
        assert_eq!(machine.update(true, true, Instant::now()), None);
        assert_eq!(machine.state(), LinkState::Initializing);
    }

    #[test]
    fn test_hardware_ready() {
        let now = Instant::now();
        let mut machine = ConnectionStateMachine::new(DEBOUNCE);

        let transition = machine.hardware_ready(now);
        assert_eq!(
            transition,
            Some(Transition {
                from: LinkState::Initializing,
                to: LinkState::Disconnected
            })
        );
        assert_eq!(machine.hardware_ready(now), None);
    }

    #[test]
    fn test_single_packet_forces_running() {
        let now = Instant::now();
        let mut machine = ConnectionStateMachine::new(DEBOUNCE);
        machine.hardware_ready(now);

        assert_eq!(machine.update(false, false, now + ms(10)), None);
        let transition = machine.update(true, false, now + ms(20));
        assert_eq!(transition.map(|t| t.to), Some(LinkState::Running));
    }

    #[test]
    fn test_timeout_forces_disconnected() {
        let start = Instant::now();
        let mut machine = running_machine(start);

        let transition = machine.update(false, false, start + ms(600));
        assert_eq!(transition.map(|t| t.to), Some(LinkState::Disconnected));
    }

    #[test]
    fn test_gesture_ignored_while_disconnected() {
        let now = Instant::now();
        let mut machine = ConnectionStateMachine::new(DEBOUNCE);
        machine.hardware_ready(now);

        assert_eq!(machine.update(false, true, now + ms(1000)), None);
        assert_eq!(machine.state(), LinkState::Disconnected);
    }

    // ==================== Setup Gesture Tests ====================

    #[test]
    fn test_gesture_enters_and_leaves_setup() {
        let start = Instant::now();
        let mut machine = running_machine(start);

        machine.update(true, true, start + ms(400));
        assert_eq!(machine.state(), LinkState::Setup);

        machine.update(true, true, start + ms(800));
        assert_eq!(machine.state(), LinkState::Running);
    }

    #[test]
    fn test_debounce_suppresses_second_gesture() {
        let start = Instant::now();
        let mut machine = running_machine(start);

        let first = machine.update(true, true, start + ms(400));
        let second = machine.update(true, true, start + ms(450));

        assert_eq!(first.map(|t| t.to), Some(LinkState::Setup));
        assert_eq!(second, None);
        assert_eq!(machine.state(), LinkState::Setup);
    }

    #[test]
    fn test_debounce_counts_from_entering_running() {
        let start = Instant::now();
        let mut machine = running_machine(start);

        assert_eq!(machine.update(true, true, start + ms(100)), None);
        assert_eq!(machine.state(), LinkState::Running);
    }

    #[test]
    fn test_setup_has_no_automatic_exit() {
        let start = Instant::now();
        let mut machine = running_machine(start);
        machine.update(true, true, start + ms(400));

        for i in 1..50 {
            machine.update(true, false, start + ms(400 + i * 100));
        }
        assert_eq!(machine.state(), LinkState::Setup);
    }

    #[test]
    fn test_link_loss_in_setup_disconnects() {
        let start = Instant::now();
        let mut machine = running_machine(start);
        machine.update(true, true, start + ms(400));

        let transition = machine.update(false, false, start + ms(500));
        assert_eq!(
            transition,
            Some(Transition {
                from: LinkState::Setup,
                to: LinkState::Disconnected
            })
        );
    }

    // ==================== Indicator Tests ====================

    #[test]
    fn test_indicator_patterns() {
        assert_eq!(LinkState::Initializing.indicator(), Indicator::Solid);
        assert_eq!(LinkState::Setup.indicator(), Indicator::Solid);
        assert_eq!(LinkState::Running.indicator(), Indicator::FastBlink);
        assert_eq!(LinkState::Disconnected.indicator(), Indicator::SlowBlink);
    }

    #[test]
    fn test_indicator_names() {
        assert_eq!(Indicator::Solid.as_str(), "solid");
        assert_eq!(LinkState::Running.indicator().as_str(), "fast-blink");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LinkState::Running.to_string(), "running");
        assert_eq!(format!("{}", LinkState::Setup), "setup");
    }
}
