//! Sample clock programming and transfer sizing

use crate::{
    core::{
        mhz,
        UsbSpeed,
    },
    error::Error,
};

/// Bulk transfers are sized in multiples of the DMA page
pub const DMA_PAGE: u64 = 4096;
/// Largest transfer on a SuperSpeed link
pub const SUPER_SPEED_BLOCK_MAX: u64 = 4 * 1024 * 1024;
/// Raw bit rate of a High Speed link
pub const HIGH_SPEED_BITS: u64 = 480_000_000;
/// Clock the generic divider counts from
pub const DIVIDER_BASE: u64 = mhz(100);

/// Clock source and divider for one sample rate
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClockSetting {
    /// One of the sampler's fixed clocks, 0 through 7
    pub mode: u8,
    /// Divider applied to the 100 MHz clock of mode 7
    pub divider: u32,
}

const FIXED: [(u64, u8); 8] = [
    (mhz(1000), 0),
    (mhz(500), 1),
    (mhz(250), 2),
    (mhz(125), 3),
    (mhz(800), 4),
    (mhz(400), 5),
    (mhz(200), 6),
    (mhz(100), 7),
];

/// The clock setting for `rate`. Rates without a dedicated clock run from the 100 MHz clock through
/// a divider.
#[must_use]
pub fn clock_setting(rate: u64) -> ClockSetting {
    if let Some((_, mode)) = FIXED.iter().find(|(r, _)| *r == rate) {
        return ClockSetting {
            mode: *mode,
            divider: 0,
        };
    }
    let divider = (DIVIDER_BASE / rate.max(1)).saturating_sub(1);
    ClockSetting {
        mode: 7,
        divider: u32::try_from(divider).unwrap_or(u32::MAX),
    }
}

#[must_use]
pub fn align_4k(n: u64) -> u64 {
    n.div_ceil(DMA_PAGE) * DMA_PAGE
}

/// Bytes per bulk transfer: about 10 ms of data per channel, page aligned, capped by what the link
/// can move in the same time
/// # Errors
/// Returns [`Error::Unsupported`] with no channels enabled
pub fn block_size(rate: u64, ch_num: u32, speed: UsbSpeed) -> Result<u64, Error> {
    if ch_num == 0 {
        return Err(Error::unsupported("capture with no channels enabled"));
    }
    let ch = u64::from(ch_num);
    let per_ch = align_4k(rate / 100 / 8);
    let cap = match speed {
        UsbSpeed::Super => SUPER_SPEED_BLOCK_MAX,
        _ => align_4k(HIGH_SPEED_BITS / 100 / 8),
    };
    Ok(if per_ch * ch > cap {
        cap / ch / DMA_PAGE * DMA_PAGE * ch
    } else {
        per_ch * ch
    })
}
