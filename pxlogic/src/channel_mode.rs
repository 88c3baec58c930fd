//! The sampling configurations the PX Logic family can run in.
//!
//! Every entry's `id` equals its index in [`CHANNEL_MODES`]; profiles refer to entries through a
//! bitmask of ids. The invariant is checked at compile time.

use crate::core::{
    ghz,
    khz,
    localized,
    mhz,
    Lang,
    Names,
};

/// Instrument class a channel mode belongs to
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InstrumentMode {
    Logic,
    Analog,
    Dso,
}

/// Electrical type of the probes in a channel mode
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelType {
    Logic,
    Analog,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ChannelMode {
    pub id: u16,
    pub mode: InstrumentMode,
    pub channel_type: ChannelType,
    /// Samples are streamed over USB instead of buffered onboard
    pub stream: bool,
    /// Number of probes
    pub num: u16,
    /// Bits per sample per probe
    pub unit_bits: u8,
    pub default_samplerate: u64,
    pub default_samplelimit: u64,
    pub min_samplerate: u64,
    pub max_samplerate: u64,
    names: Names,
}

impl ChannelMode {
    /// The description in `lang`, falling back to English
    #[must_use]
    pub fn name(&self, lang: Lang) -> &'static str {
        localized(self.names, lang)
    }

    /// Whether `text` names this mode in any language
    #[must_use]
    pub fn is_named(&self, text: &str) -> bool {
        self.names.iter().any(|(_, n)| *n == text)
    }

    /// Bit of this mode in a profile's channel-mode mask
    #[must_use]
    pub const fn mask(&self) -> u64 {
        1 << self.id
    }
}

pub const BUFFER_250X32: u16 = 0;
pub const BUFFER_250X16: u16 = 1;
pub const BUFFER_500X16: u16 = 2;
pub const BUFFER_1000X8: u16 = 3;
pub const STREAM_50X32: u16 = 4;
pub const STREAM_125X16: u16 = 5;
pub const STREAM_250X8: u16 = 6;
pub const STREAM_500X4: u16 = 7;
pub const STREAM_1000X2: u16 = 8;
pub const STREAM_200X1: u16 = 9;
pub const STREAM_100X2: u16 = 10;
pub const STREAM_50X4: u16 = 11;
pub const STREAM_25X8: u16 = 12;
pub const STREAM_10X16: u16 = 13;
pub const STREAM_5X32: u16 = 14;

const fn logic(
    id: u16,
    stream: bool,
    num: u16,
    max_samplerate: u64,
    names: Names,
) -> ChannelMode {
    ChannelMode {
        id,
        mode: InstrumentMode::Logic,
        channel_type: ChannelType::Logic,
        stream,
        num,
        unit_bits: 1,
        default_samplerate: max_samplerate,
        default_samplelimit: max_samplerate,
        min_samplerate: khz(2),
        max_samplerate,
        names,
    }
}

#[rustfmt::skip]
pub static CHANNEL_MODES: [ChannelMode; 15] = [
    // Buffered
    logic(BUFFER_250X32, false, 32, mhz(250), &[
        (Lang::En, "Use 32 Channels (Max 250MHz)"), (Lang::Zh, "使用32个通道(最大采样率 250MHz)")]),
    logic(BUFFER_250X16, false, 16, mhz(250), &[
        (Lang::En, "Use 16 Channels (Max 250MHz)"), (Lang::Zh, "使用16个通道(最大采样率 250MHz)")]),
    logic(BUFFER_500X16, false, 16, mhz(500), &[
        (Lang::En, "Use 16 Channels (Max 500MHz)"), (Lang::Zh, "使用16个通道(最大采样率 500MHz)")]),
    logic(BUFFER_1000X8, false, 8, ghz(1), &[
        (Lang::En, "Use 8 Channels (Max 1000MHz)"), (Lang::Zh, "使用8个通道(最大采样率 1000MHz)")]),
    // SuperSpeed streaming
    logic(STREAM_50X32, true, 32, mhz(50), &[
        (Lang::En, "Use 32 Channels (Max 50MHz)"), (Lang::Zh, "使用32个通道(最大采样率 50MHz)")]),
    logic(STREAM_125X16, true, 16, mhz(125), &[
        (Lang::En, "Use 16 Channels (Max 125MHz)"), (Lang::Zh, "使用16个通道(最大采样率 125MHz)")]),
    logic(STREAM_250X8, true, 8, mhz(250), &[
        (Lang::En, "Use 8 Channels (Max 250MHz)"), (Lang::Zh, "使用8个通道(最大采样率 250MHz)")]),
    logic(STREAM_500X4, true, 4, mhz(500), &[
        (Lang::En, "Use 4 Channels (Max 500MHz)"), (Lang::Zh, "使用4个通道(最大采样率 500MHz)")]),
    logic(STREAM_1000X2, true, 2, ghz(1), &[
        (Lang::En, "Use 2 Channels (Max 1000MHz)"), (Lang::Zh, "使用2个通道(最大采样率 1000MHz)")]),
    // High Speed streaming
    logic(STREAM_200X1, true, 1, mhz(200), &[
        (Lang::En, "Use 1 Channels (Max 200MHz)"), (Lang::Zh, "使用1个通道(最大采样率 200MHz)")]),
    logic(STREAM_100X2, true, 2, mhz(100), &[
        (Lang::En, "Use 2 Channels (Max 100MHz)"), (Lang::Zh, "使用2个通道(最大采样率 100MHz)")]),
    logic(STREAM_50X4, true, 4, mhz(50), &[
        (Lang::En, "Use 4 Channels (Max 50MHz)"), (Lang::Zh, "使用4个通道(最大采样率 50MHz)")]),
    logic(STREAM_25X8, true, 8, mhz(25), &[
        (Lang::En, "Use 8 Channels (Max 25MHz)"), (Lang::Zh, "使用8个通道(最大采样率 25MHz)")]),
    logic(STREAM_10X16, true, 16, mhz(10), &[
        (Lang::En, "Use 16 Channels (Max 10MHz)"), (Lang::Zh, "使用16个通道(最大采样率 10MHz)")]),
    logic(STREAM_5X32, true, 32, mhz(5), &[
        (Lang::En, "Use 32 Channels (Max 5MHz)"), (Lang::Zh, "使用32个通道(最大采样率 5MHz)")]),
];

const fn ids_match_indices() -> bool {
    let mut i = 0;
    while i < CHANNEL_MODES.len() {
        if CHANNEL_MODES[i].id as usize != i {
            return false;
        }
        i += 1;
    }
    true
}

const _: () = assert!(ids_match_indices(), "channel mode ids must equal table indices");

/// Look up a channel mode by id
#[must_use]
pub fn by_id(id: u16) -> Option<&'static ChannelMode> {
    CHANNEL_MODES.get(usize::from(id))
}

/// Every sample rate the family can be set to, ascending
pub static SAMPLERATES: [u64; 33] = [
    10,
    20,
    50,
    100,
    200,
    500,
    khz(1),
    khz(2),
    khz(5),
    khz(10),
    khz(20),
    khz(40),
    khz(50),
    khz(100),
    khz(200),
    khz(400),
    khz(500),
    mhz(1),
    mhz(2),
    mhz(4),
    mhz(5),
    mhz(10),
    mhz(20),
    mhz(25),
    mhz(50),
    mhz(100),
    mhz(125),
    mhz(200),
    mhz(250),
    mhz(400),
    mhz(500),
    mhz(800),
    ghz(1),
];

/// The sample rates a channel mode allows
#[must_use]
pub fn samplerates(mode: &ChannelMode) -> &'static [u64] {
    let lo = SAMPLERATES.partition_point(|&r| r < mode.min_samplerate);
    let hi = SAMPLERATES.partition_point(|&r| r <= mode.max_samplerate);
    &SAMPLERATES[lo..hi]
}
