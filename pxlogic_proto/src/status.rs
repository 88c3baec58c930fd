//! The live status block read through a vendor control transfer

use packed_struct::prelude::*;

/// Vendor request number of the status read
pub const CMD_CTL_RD: u8 = 0xB2;
/// Size of the status block on the wire
pub const STATUS_LEN: usize = 16;

/// Capture progress as reported by the FPGA. Little-endian on the wire:
/// `sync_cur_sample` in bytes `0..8`, `trig_out_validset` in `8..12`, `real_pos` in `12..16`.
#[derive(PackedStruct, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(endian = "lsb")]
pub struct StatusBlock {
    /// Samples the hardware has stored so far
    pub sync_cur_sample: u64,
    /// Nonzero once the trigger condition was met
    pub trig_out_validset: u32,
    /// Sample index at which the trigger actually fired
    pub real_pos: u32,
}

impl StatusBlock {
    #[must_use]
    pub fn trigger_hit(&self) -> bool {
        self.trig_out_validset != 0
    }
}
