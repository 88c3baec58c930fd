//! The core types and constants shared by every part of the driver
use num_derive::{
    FromPrimitive,
    ToPrimitive,
};
use serde::Deserialize;
use std::fmt::Display;

/// Log2 of the hardware's addressing granularity in samples
pub const ATOMIC_BITS: u32 = 6;
/// The minimum unit, in samples, the hardware can address for limits and positions
pub const ATOMIC_SAMPLES: u64 = 1 << ATOMIC_BITS;
/// Mask rounding a sample count down to [`ATOMIC_SAMPLES`]
pub const ATOMIC_MASK: u64 = !(ATOMIC_SAMPLES - 1);

/// Clock feeding the two PWM generators
pub const PWM_CLK: u32 = 125_000_000;
/// Highest frequency the PWM generators accept, in hertz
pub const PWM_MAX_FREQ: f64 = 1_000_000.0;

/// Marker carried by every trigger-position packet
pub const TRIG_CHECKID: u32 = 0x5555_5555;
/// Advanced trigger stages. The simple trigger lives in one extra stage after them.
pub const NUM_TRIGGER_STAGES: usize = 16;
/// Largest trigger position in buffer mode, as a percentage of the channel depth
pub const MAX_TRIG_PERCENT: u64 = 90;
/// Largest trigger position in stream mode, as a percentage of the channel depth
pub const STREAM_TRIG_PERCENT: u64 = 10;

/// Widest channel count any variant supports
pub const MAX_CHANNELS: usize = 32;
/// Number of bulk-in transfers kept in flight during an acquisition
pub const TRANSFER_POOL_SIZE: usize = 4;

/// Handle identifying a discovered device for the lifetime of a [`crate::driver::Driver`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceHandle(pub u32);

impl Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "px{}", self.0)
    }
}

/// USB bus speed class as negotiated by the host controller
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UsbSpeed {
    Low,
    Full,
    High,
    Super,
}

impl UsbSpeed {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            UsbSpeed::Low => "USB 1.0 Low Speed",
            UsbSpeed::Full => "USB 1.1 Full Speed",
            UsbSpeed::High => "USB 2.0 High Speed",
            UsbSpeed::Super => "USB 3.0 SuperSpeed",
        }
    }
}

/// Lifecycle of a device context
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DeviceStatus {
    /// Discovered, or closed again
    #[default]
    Inactive,
    /// New firmware was flashed and the device must be reopened
    Initializing,
    /// Opened, provisioned and ready for configuration
    Active,
}

/// What the sampler does with captured data
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum OperationMode {
    /// Capture into onboard memory, then upload
    Buffer = 0,
    /// Continuously stream samples over USB
    Stream = 1,
    /// Internal test pattern
    InternalTest = 2,
}

/// Language used for human-readable option names
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    En,
    Zh,
}

/// A display string in every language it is translated to
pub type Names = &'static [(Lang, &'static str)];

/// The entry of `names` in `lang`, falling back to English
#[must_use]
pub fn localized(names: Names, lang: Lang) -> &'static str {
    names
        .iter()
        .find(|(l, _)| *l == lang)
        .or_else(|| names.iter().find(|(l, _)| *l == Lang::En))
        .map_or("", |(_, n)| n)
}

#[must_use]
pub const fn khz(n: u64) -> u64 {
    n * 1_000
}

#[must_use]
pub const fn mhz(n: u64) -> u64 {
    n * 1_000_000
}

#[must_use]
pub const fn ghz(n: u64) -> u64 {
    n * 1_000_000_000
}

/// Bytes occupied by `samples` samples of `ch_num` one-bit channels
#[must_use]
pub fn samples_to_bytes(samples: u64, ch_num: u32) -> u64 {
    samples * u64::from(ch_num) / 8
}

/// Samples held by `bytes` bytes of `ch_num` one-bit channels
#[must_use]
pub fn bytes_to_samples(bytes: u64, ch_num: u32) -> u64 {
    if ch_num == 0 {
        return 0;
    }
    bytes * 8 / u64::from(ch_num)
}

/// Round `samples` up to the hardware's atomic granularity
#[must_use]
pub fn align_samples(samples: u64) -> u64 {
    samples.div_ceil(ATOMIC_SAMPLES) * ATOMIC_SAMPLES
}
