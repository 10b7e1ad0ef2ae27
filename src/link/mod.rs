//! # Link Transport Module
//!
//! Owns packet send/receive over a [`RadioChannel`] and the link statistics.
//!
//! This module handles:
//! - Id assignment, including redundant re-transmission of one logical update
//!   under the same id
//! - Address filtering and duplicate suppression on receive
//! - Lost-update accounting from the peer's previous-id chain
//! - Liveness (connection timeout) and a coarse frame-rate meter
//! - A bounded receive loop with a wall-clock budget

pub mod channel;
pub mod id;
pub mod stats;

use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{CodecError, RcLinkError, Result};
use crate::packet::decoder::decode_packet;
use crate::packet::encoder::encode_packet;
use crate::packet::protocol::{Packet, MAX_FRAME_SIZE, NO_PACKET_ID};

pub use channel::RadioChannel;
pub use id::{IdWidth, PacketIdCounter};
pub use stats::{LinkStats, RateCounter};

/// Frames one [`LinkTransport::try_receive`] call reads before giving up.
pub const MAX_FRAMES_PER_POLL: usize = 64;

/// Transport tuning, usually taken from the `[radio]` config section.
#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    pub id_width: IdWidth,
    /// No accepted packet for this long means disconnected
    pub connection_timeout: Duration,
    /// Window of the frame-rate meter
    pub rate_window: Duration,
    /// Cap on encoded frames, below the channel's own maximum
    pub max_frame_size: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            id_width: IdWidth::U32,
            connection_timeout: Duration::from_millis(500),
            rate_window: Duration::from_secs(1),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// What the receive path did with one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameDisposition {
    /// New logical update; `gap` is set when the previous-id chain broke
    Accepted { packet: Packet, gap: bool },
    /// Undecodable frame, dropped
    Malformed(CodecError),
    /// Addressed to another endpoint, dropped without touching counters
    AddressMismatch { receiver: u8 },
    /// Redundant copy of the last accepted update, dropped
    Duplicate { id: u32 },
}

/// One endpoint of the link.
pub struct LinkTransport {
    channel: Box<dyn RadioChannel>,
    own_id: u8,
    ids: PacketIdCounter,
    previous_id_sent: u32,
    stats: LinkStats,
    rate: RateCounter,
    connection_timeout: Duration,
    max_frame_size: usize,
}

impl std::fmt::Debug for LinkTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkTransport")
            .field("own_id", &self.own_id)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl LinkTransport {
    /// Creates a transport for endpoint `own_id` over `channel`.
    pub fn new(channel: Box<dyn RadioChannel>, own_id: u8, settings: TransportSettings) -> Self {
        Self {
            channel,
            own_id,
            ids: PacketIdCounter::new(settings.id_width),
            previous_id_sent: NO_PACKET_ID,
            stats: LinkStats::default(),
            rate: RateCounter::new(settings.rate_window),
            connection_timeout: settings.connection_timeout,
            max_frame_size: settings.max_frame_size,
        }
    }

    /// Brings the underlying radio up.
    pub async fn begin(&mut self) -> Result<()> {
        self.channel.begin().await?;
        info!(
            "Link endpoint {:#04x} up, {:?} packet ids",
            self.own_id,
            self.ids.width()
        );
        Ok(())
    }

    #[must_use]
    pub fn own_id(&self) -> u8 {
        self.own_id
    }

    /// Sends `packet`, numbering it.
    ///
    /// With `reuse_id = false` a fresh id is allocated. With `reuse_id = true`
    /// the last id (and its previous id) are sent again, so the receiver
    /// treats the frame as a redundant copy. Every frame counts towards
    /// `sent_counter`; only fresh ids count as logical updates.
    ///
    /// # Returns
    ///
    /// * `Result<u32>` - The id the frame carried
    ///
    /// # Errors
    ///
    /// Returns error if the encoded frame exceeds the channel's maximum or the
    /// channel fails to transmit.
    pub async fn send(&mut self, mut packet: Packet, reuse_id: bool) -> Result<u32> {
        let max = self.channel.max_frame_size().min(self.max_frame_size);
        if packet.frame_size() > max {
            return Err(RcLinkError::FrameTooLarge {
                size: packet.frame_size(),
                max,
            });
        }

        let fresh = !reuse_id || self.ids.last() == NO_PACKET_ID;
        if fresh {
            if reuse_id {
                debug!("No update sent yet, allocating a fresh id instead of reusing");
            }
            self.previous_id_sent = self.ids.last();
            self.ids.next_id();
        }

        packet.sender = self.own_id;
        packet.id = self.ids.last();
        packet.previous_id = self.previous_id_sent;
        self.stats.last_id_sent = packet.id;

        let frame = encode_packet(&packet);
        self.channel.send(&frame).await?;

        self.stats.sent_counter = self.stats.sent_counter.wrapping_add(1);
        if fresh {
            self.stats.logical_sent_counter = self.stats.logical_sent_counter.wrapping_add(1);
        }
        Ok(packet.id)
    }

    /// Sends one logical update as a fresh frame plus `copies` redundant frames.
    pub async fn send_redundant(&mut self, packet: Packet, copies: u8) -> Result<u32> {
        let id = self.send(packet.clone(), false).await?;
        for _ in 0..copies {
            self.send(packet.clone(), true).await?;
        }
        Ok(id)
    }

    /// Returns the next accepted packet, if one is waiting.
    ///
    /// Drains malformed, foreign and duplicate frames on the way, at most
    /// [`MAX_FRAMES_PER_POLL`] per call; never waits for the radio.
    pub async fn try_receive(&mut self) -> Result<Option<Packet>> {
        for _ in 0..MAX_FRAMES_PER_POLL {
            let Some(frame) = self.channel.poll_receive().await? else {
                return Ok(None);
            };
            if let FrameDisposition::Accepted { packet, .. } =
                self.accept_frame(&frame, Instant::now())
            {
                return Ok(Some(packet));
            }
        }
        debug!("Stopped after {} dropped frames", MAX_FRAMES_PER_POLL);
        Ok(None)
    }

    /// Polls for a packet until one is accepted or `budget` has elapsed.
    ///
    /// Sleeps `poll_interval` between polls. The attempt count is bounded as
    /// well, but the wall-clock deadline is what caps the tick's latency.
    pub async fn receive_within(
        &mut self,
        budget: Duration,
        poll_interval: Duration,
    ) -> Result<Option<Packet>> {
        let deadline = Instant::now() + budget;
        let max_attempts = budget.as_micros() / poll_interval.as_micros().max(1) + 1;
        let mut attempts = 0u128;

        loop {
            if let Some(packet) = self.try_receive().await? {
                return Ok(Some(packet));
            }

            attempts += 1;
            if attempts >= max_attempts || Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Runs the receive pipeline on one raw frame.
    ///
    /// Order: decode, address filter, duplicate check, gap accounting, stats.
    pub fn accept_frame(&mut self, frame: &[u8], now: Instant) -> FrameDisposition {
        let packet = match decode_packet(frame) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Dropping malformed frame ({} bytes): {}", frame.len(), e);
                return FrameDisposition::Malformed(e);
            }
        };

        if packet.receiver != self.own_id {
            debug!(
                "Dropping frame for 0x{:02X} (we are 0x{:02X})",
                packet.receiver, self.own_id
            );
            return FrameDisposition::AddressMismatch {
                receiver: packet.receiver,
            };
        }

        self.rate.record(now);

        if packet.id == self.stats.last_id_received {
            return FrameDisposition::Duplicate { id: packet.id };
        }

        let gap = packet.previous_id != self.stats.last_id_received;
        if gap {
            self.stats.lost_counter = self.stats.lost_counter.wrapping_add(1);
            debug!(
                "Gap before packet {}: expected previous {}, got {}",
                packet.id, self.stats.last_id_received, packet.previous_id
            );
        }

        self.stats.last_id_received = packet.id;
        self.stats.received_counter = self.stats.received_counter.wrapping_add(1);
        self.stats.last_activity_at = Some(now);
        if !self.stats.connected {
            info!("Link up (packet {} from 0x{:02X})", packet.id, packet.sender);
        }
        self.stats.connected = true;

        FrameDisposition::Accepted { packet, gap }
    }

    /// Re-evaluates liveness at `now` and returns whether the link is up.
    pub fn refresh(&mut self, now: Instant) -> bool {
        self.rate.tick(now);

        if self.stats.connected {
            let timed_out = self
                .stats
                .last_activity_at
                .map_or(true, |at| now.saturating_duration_since(at) > self.connection_timeout);

            if timed_out {
                info!(
                    "Link timeout: no packet for more than {} ms",
                    self.connection_timeout.as_millis()
                );
                self.stats.connected = false;
                self.rate.reset();
            }
        }

        self.stats.connected
    }

    /// Copy of the current statistics.
    #[must_use]
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Frames per second addressed to this endpoint.
    #[must_use]
    pub fn frame_rate(&self) -> u32 {
        self.rate.rate()
    }

    #[must_use]
    pub fn signal_strength(&self) -> i32 {
        self.channel.signal_strength()
    }

    #[must_use]
    pub fn noise(&self) -> f32 {
        self.channel.noise()
    }
}
