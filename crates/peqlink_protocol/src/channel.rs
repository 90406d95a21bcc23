//! Channel Catalog
//!
//! The unit has a fixed set of five processing channels. This table is static
//! configuration: ids are the wire ordinals, and the order is the order of the
//! peak meters in the status payload.

use serde::Serialize;

/// Number of channels in the catalog
pub const CHANNEL_COUNT: usize = 5;

/// EQ bands per channel in the current protocol generation
pub const BANDS_PER_CHANNEL: usize = 10;

/// Immutable description of one processing channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Channel {
    /// Wire ordinal (0..4)
    pub id: u8,
    pub name: &'static str,
    /// Short code for compact listings
    pub code: &'static str,
    /// Physical link the channel is bound to
    pub link: &'static str,
    pub band_capacity: usize,
    /// Output channels accept a delay setting
    pub is_output: bool,
    /// Display color as `#rrggbb`
    pub color: &'static str,
}

impl Channel {
    pub fn supports_delay(&self) -> bool {
        self.is_output
    }

    pub fn has_band(&self, band: u8) -> bool {
        (band as usize) < self.band_capacity
    }
}

pub static CHANNELS: [Channel; CHANNEL_COUNT] = [
    Channel {
        id: 0,
        name: "USB Input Left",
        code: "INL",
        link: "usb-audio:in/0",
        band_capacity: BANDS_PER_CHANNEL,
        is_output: false,
        color: "#4fc3f7",
    },
    Channel {
        id: 1,
        name: "USB Input Right",
        code: "INR",
        link: "usb-audio:in/1",
        band_capacity: BANDS_PER_CHANNEL,
        is_output: false,
        color: "#f06292",
    },
    Channel {
        id: 2,
        name: "Output Left",
        code: "OUTL",
        link: "i2s0:tx/0",
        band_capacity: BANDS_PER_CHANNEL,
        is_output: true,
        color: "#81c784",
    },
    Channel {
        id: 3,
        name: "Output Right",
        code: "OUTR",
        link: "i2s0:tx/1",
        band_capacity: BANDS_PER_CHANNEL,
        is_output: true,
        color: "#ffb74d",
    },
    Channel {
        id: 4,
        name: "Subwoofer",
        code: "SUB",
        link: "i2s1:tx/0",
        band_capacity: BANDS_PER_CHANNEL,
        is_output: true,
        color: "#ba68c8",
    },
];

/// Look up a channel by wire id
pub fn channel(id: u8) -> Option<&'static Channel> {
    CHANNELS.get(id as usize)
}

/// Look up a channel by short code, case-insensitively
pub fn channel_by_code(code: &str) -> Option<&'static Channel> {
    CHANNELS.iter().find(|c| c.code.eq_ignore_ascii_case(code))
}
