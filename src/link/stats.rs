//! Link statistics owned by the transport.

use std::time::{Duration, Instant};

/// Per-endpoint running counters.
///
/// Mutated only by [`LinkTransport`](super::LinkTransport) on send/receive;
/// everything else reads copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Radio frames sent, redundant copies included
    pub sent_counter: u32,
    /// Logical updates sent (fresh ids only)
    pub logical_sent_counter: u32,
    /// Accepted logical updates (duplicates excluded)
    pub received_counter: u32,
    pub last_id_sent: u32,
    pub last_id_received: u32,
    /// Gap events observed in the peer's previous-id chain
    pub lost_counter: u32,
    pub connected: bool,
    pub last_activity_at: Option<Instant>,
}

/// Coarse frames-per-second meter for display.
///
/// Counts frames over a fixed window and reports the average of the last two
/// windows, scaled to one second.
#[derive(Debug, Clone)]
pub struct RateCounter {
    window: Duration,
    window_start: Option<Instant>,
    count: u32,
    previous: u32,
    rate: u32,
}

impl RateCounter {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            window_start: None,
            count: 0,
            previous: 0,
            rate: 0,
        }
    }

    /// Counts one frame at `now`.
    pub fn record(&mut self, now: Instant) {
        self.tick(now);
        self.count = self.count.saturating_add(1);
    }

    /// Closes the current window if it has elapsed.
    pub fn tick(&mut self, now: Instant) {
        let start = *self.window_start.get_or_insert(now);
        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.window {
            return;
        }

        let current = self.per_second(self.count);
        let previous = if elapsed >= self.window * 2 { 0 } else { self.previous };
        self.rate = (previous + current) / 2;
        self.previous = current;
        self.count = 0;
        self.window_start = Some(now);
    }

    /// Last computed rate in frames per second.
    #[must_use]
    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn reset(&mut self) {
        self.window_start = None;
        self.count = 0;
        self.previous = 0;
        self.rate = 0;
    }

    fn per_second(&self, count: u32) -> u32 {
        let window_ms = self.window.as_millis().max(1) as u64;
        (u64::from(count) * 1000 / window_ms).min(u64::from(u32::MAX)) as u32
    }
}
