//! Packet id allocation.
//!
//! Ids travel as `u32` on the wire, but a deployment may count in a narrower
//! width. The counter wraps at the width's maximum back to 1; 0 is never
//! allocated because it means "no previous packet".

use serde::Deserialize;

use crate::packet::protocol::NO_PACKET_ID;

/// Width of the id counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdWidth {
    U8,
    U32,
}

impl IdWidth {
    /// Largest id this width allocates.
    #[must_use]
    pub fn max_id(self) -> u32 {
        match self {
            IdWidth::U8 => u32::from(u8::MAX),
            IdWidth::U32 => u32::MAX,
        }
    }
}

/// Allocates ids for fresh logical updates.
#[derive(Debug, Clone)]
pub struct PacketIdCounter {
    width: IdWidth,
    last: u32,
}

impl PacketIdCounter {
    /// Counter that has not allocated anything yet.
    #[must_use]
    pub fn new(width: IdWidth) -> Self {
        Self {
            width,
            last: NO_PACKET_ID,
        }
    }

    /// Counter resuming after `last`.
    #[must_use]
    pub fn starting_after(width: IdWidth, last: u32) -> Self {
        Self {
            width,
            last: last.min(width.max_id()),
        }
    }

    /// Allocates the next id: `last + 1`, or 1 after the width's maximum.
    pub fn next_id(&mut self) -> u32 {
        self.last = if self.last >= self.width.max_id() {
            1
        } else {
            self.last + 1
        };
        self.last
    }

    /// Most recently allocated id (0 before the first allocation).
    #[must_use]
    pub fn last(&self) -> u32 {
        self.last
    }

    #[must_use]
    pub fn width(&self) -> IdWidth {
        self.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_id_is_one() {
        let mut counter = PacketIdCounter::new(IdWidth::U32);
        assert_eq!(counter.last(), 0);
        assert_eq!(counter.next_id(), 1);
        assert_eq!(counter.next_id(), 2);
    }

    #[test]
    fn test_u8_counter_wraps_to_one() {
        let mut counter = PacketIdCounter::starting_after(IdWidth::U8, 254);

        assert_eq!(counter.next_id(), 255);
        assert_eq!(counter.next_id(), 1);
        assert_eq!(counter.next_id(), 2);
    }

    #[test]
    fn test_u8_counter_never_yields_zero() {
        let mut counter = PacketIdCounter::new(IdWidth::U8);
        for _ in 0..1000 {
            let id = counter.next_id();
            assert_ne!(id, 0);
            assert!(id <= 255);
        }
    }

    #[test]
    fn test_u32_counter_wraps_to_one() {
        let mut counter = PacketIdCounter::starting_after(IdWidth::U32, u32::MAX - 1);
        assert_eq!(counter.next_id(), u32::MAX);
        assert_eq!(counter.next_id(), 1);
    }

    #[test]
    fn test_starting_after_clamps_to_width() {
        let mut counter = PacketIdCounter::starting_after(IdWidth::U8, 1000);
        assert_eq!(counter.last(), 255);
        assert_eq!(counter.next_id(), 1);
    }
}
