//! The fixed 16-byte command frame used for register access.
//!
//! Every register transaction is one frame out on the command endpoint followed by one frame
//! back. All four words are little-endian `u32`s:
//!
//! | bytes    | field    | request                          | echo                     |
//! |----------|----------|----------------------------------|--------------------------|
//! | `0..4`   | `tag`    | [`WRITE_TAG`] or [`READ_TAG`]    | request tag              |
//! | `4..8`   | `opcode` | [`OPCODE`]                       | request opcode           |
//! | `8..12`  | `addr`   | register byte address            | register byte address    |
//! | `12..16` | `value`  | value to write, or zero on reads | [`ACK`] or the read word |

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use packed_struct::prelude::*;

/// Tag word of a register write request
pub const WRITE_TAG: u32 = 0xFEFE_0000;
/// Tag word of a register read request
pub const READ_TAG: u32 = 0xFEFE_0001;
/// The only opcode the firmware understands, the payload length in bytes
pub const OPCODE: u32 = 0x08;
/// Value word the device echoes back after accepting a write
pub const ACK: u32 = 0xFEFE_FEFE;
/// Size of a frame on the wire
pub const FRAME_LEN: usize = 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum Tag {
    Write = WRITE_TAG,
    Read = READ_TAG,
}

#[derive(PackedStruct, Debug, Copy, Clone, PartialEq, Eq)]
#[packed_struct(endian = "lsb")]
pub struct Frame {
    pub tag: u32,
    pub opcode: u32,
    pub addr: u32,
    pub value: u32,
}

impl Frame {
    /// A request writing `value` to the register at byte address `addr`
    #[must_use]
    pub fn write(addr: u32, value: u32) -> Self {
        Self::request(Tag::Write, addr, value)
    }

    /// A request reading the register at byte address `addr`
    #[must_use]
    pub fn read(addr: u32) -> Self {
        Self::request(Tag::Read, addr, 0)
    }

    fn request(tag: Tag, addr: u32, value: u32) -> Self {
        Self {
            tag: tag as u32,
            opcode: OPCODE,
            addr,
            value,
        }
    }

    /// The decoded tag word, if it is one the protocol defines
    #[must_use]
    pub fn kind(&self) -> Option<Tag> {
        Tag::from_u32(self.tag)
    }

    /// The echo the firmware sends for an accepted write of this request
    #[must_use]
    pub fn acknowledged(&self) -> Self {
        Self { value: ACK, ..*self }
    }

    /// Whether this frame, read back as an echo, acknowledges a write
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.value == ACK
    }
}
