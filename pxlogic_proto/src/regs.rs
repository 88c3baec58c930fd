//! Register byte addresses and endpoint numbers.
//!
//! Capture registers live at the bottom of the address space, one 32-bit word per register.
//! Housekeeping registers (version, reset, upload window, DMA sizing) live in the system bank at
//! [`SYS`].

use num_derive::{
    FromPrimitive,
    ToPrimitive,
};

/// Base of the system register bank
pub const SYS: u32 = 0x2000;

const fn capture(n: u32) -> u32 {
    n << 2
}

const fn system(n: u32) -> u32 {
    SYS + (n << 2)
}

// Capture bank
pub const CONTROL: u32 = capture(0);
pub const VTH_DIVIDER: u32 = capture(1);
pub const VTH_VALUE: u32 = capture(2);
pub const CHANNEL_ENABLE: u32 = capture(4);
pub const CLOCK_MODE: u32 = capture(5);
pub const CLOCK_DIVIDER: u32 = capture(6);
pub const BLOCK_SIZE: u32 = capture(7);
pub const CAPTURE_GATE: u32 = capture(8);
pub const TRIGGER_ZERO: u32 = capture(9);
pub const TRIGGER_ONE: u32 = capture(10);
pub const TRIGGER_RISE: u32 = capture(11);
pub const TRIGGER_FALL: u32 = capture(12);
pub const EXT_TRIGGER_MODE: u32 = capture(15);
pub const PWM0_ENABLE: u32 = capture(16);
pub const PWM0_PERIOD: u32 = capture(17);
pub const PWM0_DUTY: u32 = capture(18);
pub const PWM1_ENABLE: u32 = capture(19);
pub const PWM1_PERIOD: u32 = capture(20);
pub const PWM1_DUTY: u32 = capture(21);
pub const TRIGGER_OUT: u32 = capture(22);

// System bank
pub const DMA_BLOCK_SIZE: u32 = system(2);
pub const UPLOAD_BASE: u32 = system(6);
pub const UPLOAD_END: u32 = system(7);
pub const UPLOAD_MODE: u32 = system(8);
pub const LIMIT_BYTES_LO: u32 = system(9);
pub const LIMIT_BYTES_HI: u32 = system(10);
pub const BLOCK_START: u32 = system(11);
pub const RESET: u32 = system(12);
pub const FIRMWARE_VERSION: u32 = system(13);
pub const CHANNEL_COUNT: u32 = system(19);
pub const TRIGGER_POSITION: u32 = system(20);
pub const MODE_ID: u32 = system(22);

/// Capture gate value that holds the sampler while it is being programmed
pub const GATE_CLOSED: u32 = 0xFFFF_FFFF;
/// Capture gate value that releases the sampler
pub const GATE_OPEN: u32 = 0;

// Endpoints
pub const EP_CMD_OUT: u8 = 0x01;
pub const EP_CMD_IN: u8 = 0x81;
pub const EP_DATA_IN: u8 = 0x82;
pub const EP_UPLOAD: u8 = 0x03;
pub const EP_AUX_OUT: u8 = 0x04;
pub const EP_AUX_IN: u8 = 0x84;

/// Interfaces that must be claimed before any register traffic
pub const INTERFACES: [u8; 2] = [0, 1];

/// Destination of an image written through the upload window
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum UploadMode {
    /// Flash of the USB microcontroller (bootloader and application firmware)
    McuFlash = 0,
    /// Configuration flash of the FPGA
    FpgaFlash = 1,
    /// FPGA-attached DRAM
    FpgaDdr = 2,
    /// Direct FPGA configuration, lost on power cycle
    FpgaConfig = 4,
}
