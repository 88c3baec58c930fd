//! The hardware variants the driver knows how to talk to.
//!
//! Several variants share a USB identity and speed and only differ by the logic mode the FPGA
//! reports in [`pxlogic_proto::regs::MODE_ID`], so lookup needs all four keys.

use crate::{
    channel_mode::{
        self,
        ChannelMode,
        BUFFER_1000X8,
        BUFFER_250X16,
        BUFFER_250X32,
        BUFFER_500X16,
        STREAM_100X2,
        STREAM_10X16,
        STREAM_1000X2,
        STREAM_125X16,
        STREAM_200X1,
        STREAM_250X8,
        STREAM_25X8,
        STREAM_500X4,
        STREAM_50X32,
        STREAM_50X4,
        STREAM_5X32,
    },
    core::UsbSpeed,
};

pub const MODE_LOGIC: u32 = 1 << 0;
pub const MODE_ANALOG: u32 = 1 << 1;
pub const MODE_DSO: u32 = 1 << 2;

/// Onboard sample buffer
pub const FEATURE_BUF: u64 = 1 << 1;
/// USB 3.0 capable
pub const FEATURE_USB30: u64 = 1 << 6;

const VENDOR: &str = "PX_Tool";
const FIRMWARE: &str = "SCI_LOGIC.bin";
const FIRMWARE_VERSION: u32 = 0x5690_0027;
const BOOTLOADER: &str = "SCI_LOGIC_BL.bin";
const BOOTLOADER_VERSION: u32 = 0x5690_0000;
const BITSTREAM: &str = "hspi_ddr.bin";
const BITSTREAM_RST: &str = "hspi_ddr_RST.bin";
const GBIT: u64 = 1 << 30;

/// What a variant can do
#[derive(Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Bitmask of `MODE_*`
    pub mode_caps: u32,
    /// Bitmask of `FEATURE_*`
    pub feature_caps: u64,
    /// Bitmask of supported [`ChannelMode`] ids
    pub channels: u64,
    /// Onboard memory, in sample bits
    pub hw_depth: u64,
    /// Channel mode used for the internal test pattern
    pub intest_channel: u16,
    pub default_channel: u16,
    /// Nanoseconds
    pub default_timebase: u64,
}

impl Capabilities {
    #[must_use]
    pub fn supports_channel(&self, id: u16) -> bool {
        id < 64 && self.channels & (1 << id) != 0
    }

    #[must_use]
    pub fn has_feature(&self, feature: u64) -> bool {
        self.feature_caps & feature != 0
    }

    /// Supported channel modes in table order
    pub fn channel_modes(&self) -> impl Iterator<Item = &'static ChannelMode> + '_ {
        channel_mode::CHANNEL_MODES
            .iter()
            .filter(|m| self.supports_channel(m.id))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Profile {
    pub vid: u16,
    pub pid: u16,
    pub speed: UsbSpeed,
    /// Discriminator read back from the mode-identification register
    pub logic_mode: u32,
    pub vendor: &'static str,
    pub model: &'static str,
    pub firmware: &'static str,
    pub firmware_version: u32,
    pub bootloader: &'static str,
    pub bootloader_version: u32,
    pub bitstream: &'static str,
    pub bitstream_rst: &'static str,
    pub caps: Capabilities,
}

const fn mask(ids: &[u16]) -> u64 {
    let mut m = 0;
    let mut i = 0;
    while i < ids.len() {
        m |= 1 << ids[i];
        i += 1;
    }
    m
}

#[allow(clippy::too_many_arguments)]
const fn px(
    vid: u16,
    pid: u16,
    speed: UsbSpeed,
    logic_mode: u32,
    model: &'static str,
    channels: u64,
    default_channel: u16,
    hw_depth: u64,
) -> Profile {
    Profile {
        vid,
        pid,
        speed,
        logic_mode,
        vendor: VENDOR,
        model,
        firmware: FIRMWARE,
        firmware_version: FIRMWARE_VERSION,
        bootloader: BOOTLOADER,
        bootloader_version: BOOTLOADER_VERSION,
        bitstream: BITSTREAM,
        bitstream_rst: BITSTREAM_RST,
        caps: Capabilities {
            mode_caps: MODE_LOGIC,
            feature_caps: FEATURE_USB30 | FEATURE_BUF,
            channels,
            hw_depth,
            intest_channel: BUFFER_250X32,
            default_channel,
            default_timebase: 500,
        },
    }
}

const U3_32: u64 = mask(&[
    BUFFER_250X32,
    BUFFER_500X16,
    BUFFER_1000X8,
    STREAM_50X32,
    STREAM_125X16,
    STREAM_250X8,
    STREAM_500X4,
    STREAM_1000X2,
]);
const U2_32: u64 = mask(&[
    BUFFER_250X32,
    BUFFER_500X16,
    BUFFER_1000X8,
    STREAM_200X1,
    STREAM_100X2,
    STREAM_50X4,
    STREAM_25X8,
    STREAM_10X16,
    STREAM_5X32,
]);
const U3_PRO: u64 = mask(&[
    BUFFER_500X16,
    BUFFER_1000X8,
    STREAM_125X16,
    STREAM_250X8,
    STREAM_500X4,
    STREAM_1000X2,
]);
const U2_PRO: u64 = mask(&[
    BUFFER_500X16,
    BUFFER_1000X8,
    STREAM_200X1,
    STREAM_100X2,
    STREAM_50X4,
    STREAM_25X8,
    STREAM_10X16,
]);
const U3_PLUS: u64 = mask(&[BUFFER_500X16, STREAM_125X16, STREAM_250X8, STREAM_500X4]);
const U2_PLUS: u64 = mask(&[
    BUFFER_500X16,
    STREAM_200X1,
    STREAM_100X2,
    STREAM_50X4,
    STREAM_25X8,
    STREAM_10X16,
]);
const U3_BASE: u64 = mask(&[BUFFER_250X16, STREAM_125X16, STREAM_250X8]);
const U2_BASE: u64 = mask(&[
    BUFFER_250X16,
    STREAM_200X1,
    STREAM_100X2,
    STREAM_50X4,
    STREAM_25X8,
    STREAM_10X16,
]);

#[rustfmt::skip]
pub static PROFILES: [Profile; 10] = [
    px(0x1A86, 0x5237, UsbSpeed::Super, 0, "PX-Logic U3 channel 32", U3_32, BUFFER_250X32, 4 * GBIT),
    px(0x1A86, 0x5237, UsbSpeed::High, 0, "PX-Logic U2 channel 32", U2_32, BUFFER_500X16, 4 * GBIT),
    px(0x16C0, 0x05DC, UsbSpeed::Super, 0, "PX-Logic U3 channel 32", U3_32, BUFFER_250X32, 4 * GBIT),
    px(0x16C0, 0x05DC, UsbSpeed::High, 0, "PX-Logic U2 channel 32", U2_32, BUFFER_500X16, 4 * GBIT),
    px(0x16C0, 0x05DC, UsbSpeed::Super, 1, "PX-Logic U3 channel 16 Pro", U3_PRO, BUFFER_500X16, 4 * GBIT),
    px(0x16C0, 0x05DC, UsbSpeed::High, 1, "PX-Logic U2 channel 16 Pro", U2_PRO, BUFFER_500X16, 4 * GBIT),
    px(0x16C0, 0x05DC, UsbSpeed::Super, 2, "PX-Logic U3 channel 16 Plus", U3_PLUS, BUFFER_500X16, 2 * GBIT),
    px(0x16C0, 0x05DC, UsbSpeed::High, 2, "PX-Logic U2 channel 16 Plus", U2_PLUS, BUFFER_500X16, 2 * GBIT),
    px(0x16C0, 0x05DC, UsbSpeed::Super, 3, "PX-Logic U3 channel 16 Base", U3_BASE, BUFFER_250X16, GBIT),
    px(0x16C0, 0x05DC, UsbSpeed::High, 3, "PX-Logic U2 channel 16 Base", U2_BASE, BUFFER_250X16, GBIT),
];

const fn defaults_supported() -> bool {
    let mut i = 0;
    while i < PROFILES.len() {
        let caps = &PROFILES[i].caps;
        if caps.channels & (1 << caps.default_channel) == 0 {
            return false;
        }
        i += 1;
    }
    true
}

const _: () = assert!(defaults_supported(), "profile default channel mode must be supported");

/// Whether any profile carries this USB identity
#[must_use]
pub fn is_supported_usb_id(vid: u16, pid: u16) -> bool {
    PROFILES.iter().any(|p| p.vid == vid && p.pid == pid)
}

/// The profile for an identified device
#[must_use]
pub fn find(vid: u16, pid: u16, speed: UsbSpeed, logic_mode: u32) -> Option<&'static Profile> {
    PROFILES
        .iter()
        .find(|p| p.vid == vid && p.pid == pid && p.speed == speed && p.logic_mode == logic_mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find() {
        let p = find(0x16C0, 0x05DC, UsbSpeed::Super, 2).unwrap();
        assert_eq!(p.model, "PX-Logic U3 channel 16 Plus");
        assert_eq!(p.caps.hw_depth, 2 * GBIT);
        assert_eq!(p.caps.default_channel, BUFFER_500X16);
        assert!(find(0x16C0, 0x05DC, UsbSpeed::Super, 7).is_none());
        assert!(find(0x16C0, 0x05DC, UsbSpeed::Full, 0).is_none());
    }

    #[test]
    fn test_usb_ids() {
        assert!(is_supported_usb_id(0x1A86, 0x5237));
        assert!(is_supported_usb_id(0x16C0, 0x05DC));
        assert!(!is_supported_usb_id(0x16C0, 0x05DD));
    }

    #[test]
    fn test_capabilities() {
        let caps = &find(0x16C0, 0x05DC, UsbSpeed::High, 3).unwrap().caps;
        assert!(caps.supports_channel(BUFFER_250X16));
        assert!(!caps.supports_channel(BUFFER_500X16));
        assert!(!caps.supports_channel(200));
        assert!(caps.has_feature(FEATURE_BUF));
        let ids: Vec<u16> = caps.channel_modes().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 9, 10, 11, 12, 13]);
    }

    #[test]
    fn test_firmware_identity() {
        for p in &PROFILES {
            assert_eq!(p.firmware_version, 0x5690_0027);
            assert_ne!(p.bootloader_version, p.firmware_version);
            assert_eq!(p.vendor, "PX_Tool");
        }
    }
}
