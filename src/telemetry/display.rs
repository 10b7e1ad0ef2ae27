//! Status display.
//!
//! The display loop renders a [`StatusSnapshot`] into a few short text lines
//! and hands them to a [`DisplaySink`]. Nothing depends on the sink working.

use tracing::info;

use crate::link::LinkStats;
use crate::state::LinkState;

/// Text output device.
pub trait DisplaySink: Send {
    fn show(&mut self, lines: &[String]);
}

/// Sink that logs lines under the `rc_link::display` target, only when they
/// change.
#[derive(Debug, Default)]
pub struct TracingDisplay {
    last: Vec<String>,
}

impl DisplaySink for TracingDisplay {
    fn show(&mut self, lines: &[String]) {
        if self.last == lines {
            return;
        }
        info!(target: "rc_link::display", "{}", lines.join(" | "));
        self.last = lines.to_vec();
    }
}

/// Everything the display loop shows, copied out of the shared state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub state: Option<LinkState>,
    pub stats: LinkStats,
    pub frame_rate: u32,
    /// Frame rate reported by the peer
    pub remote_frame_rate: Option<u16>,
    /// Robot battery, measured locally or reported over telemetry
    pub battery_voltage: Option<f32>,
    pub rssi: i32,
    pub snr: f32,
    pub steering_middle: Option<i32>,
}

/// Renders the display lines for `snapshot`.
#[must_use]
pub fn render_status(snapshot: &StatusSnapshot) -> Vec<String> {
    let header = match snapshot.state {
        Some(state) => format!("{} ({})", state.as_str().to_uppercase(), state.indicator().as_str()),
        None => "-".to_string(),
    };

    let mut lines = vec![
        header,
        format!(
            "tx {} rx {} lost {}",
            snapshot.stats.sent_counter, snapshot.stats.received_counter, snapshot.stats.lost_counter
        ),
    ];

    match snapshot.remote_frame_rate {
        Some(remote) => lines.push(format!("rate {} fps (peer {})", snapshot.frame_rate, remote)),
        None => lines.push(format!("rate {} fps", snapshot.frame_rate)),
    }

    if let Some(volts) = snapshot.battery_voltage {
        lines.push(format!("bat {:.2} V", volts));
    }
    lines.push(format!("rssi {} snr {:.1}", snapshot.rssi, snapshot.snr));

    if snapshot.state == Some(LinkState::Setup) {
        if let Some(middle) = snapshot.steering_middle {
            lines.push(format!("middle {}", middle));
        }
    }
    lines
}
