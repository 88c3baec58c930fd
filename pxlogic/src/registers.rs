//! Bit-level views of the capture registers that pack several fields into one word

use pxlogic_derive::{
    address,
    RegisterSerde,
};
use pxlogic_proto::{
    read_register,
    regs,
    write_register,
    Bus,
};
use packed_struct::prelude::*;

/// Types that implement this trait can be serialized into a 32-bit register word
pub trait Serialize {
    /// # Errors
    /// Returns an error if a field holds a value that doesn't fit its bits
    fn serialize(&self) -> Result<u32, PackingError>;
}

/// Types that implement this trait can be deserialized from a 32-bit register word
pub trait Deserialize: Sized {
    /// # Errors
    /// Returns an error if the word holds a value the type can't represent
    fn deserialize(word: u32) -> Result<Self, PackingError>;
}

/// The register byte address a type lives at
pub trait Address {
    const ADDR: u32;
}

/// Write a register struct to its address
/// # Errors
/// Returns an error on a register protocol failure or if the struct doesn't pack
pub fn write_reg<B, R>(bus: &mut B, reg: &R) -> Result<(), pxlogic_proto::Error>
where
    B: Bus + ?Sized,
    R: Address + Serialize,
{
    write_register(bus, R::ADDR, reg.serialize()?)
}

/// Read a register struct from its address
/// # Errors
/// Returns an error on a register protocol failure or an unrepresentable word
pub fn read_reg<B, R>(bus: &mut B) -> Result<R, pxlogic_proto::Error>
where
    B: Bus + ?Sized,
    R: Address + Deserialize,
{
    Ok(R::deserialize(read_register(bus, R::ADDR)?)?)
}

/// Sampler control word
#[derive(Debug, PackedStruct, RegisterSerde, Default, Copy, Clone, PartialEq, Eq)]
#[address(0x00)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4")]
pub struct Control {
    /// Hold the sampler in reset
    #[packed_field(bits = "0")]
    pub hold: bool,
    /// Continuous streaming instead of buffered capture
    #[packed_field(bits = "1")]
    pub stream: bool,
    /// Hold the sample FIFO in reset
    #[packed_field(bits = "2")]
    pub fifo_hold: bool,
    /// One-sample glitch filter
    #[packed_field(bits = "3")]
    pub filter: bool,
    /// Pulse to clear capture state
    #[packed_field(bits = "4")]
    pub clear: bool,
}

impl Control {
    /// The held state used while the capture registers are programmed
    #[must_use]
    pub fn held(stream: bool) -> Self {
        Self {
            hold: true,
            stream,
            fifo_hold: true,
            ..Default::default()
        }
    }

    /// The free-running state an acquisition starts in
    #[must_use]
    pub fn running(stream: bool, filter: bool) -> Self {
        Self {
            stream,
            filter,
            ..Default::default()
        }
    }
}

/// Sample clock source selection
#[derive(Debug, PackedStruct, RegisterSerde, Default, Copy, Clone, PartialEq, Eq)]
#[address(0x14)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4")]
pub struct ClockMode {
    /// One of the fixed sampler clocks, see [`crate::timing`]
    #[packed_field(bits = "0..=2")]
    pub mode: Integer<u8, packed_bits::Bits<3>>,
    /// Sample on the falling edge of an external clock
    #[packed_field(bits = "3")]
    pub falling_edge: bool,
}

const _: () = assert!(Control::ADDR == regs::CONTROL);
const _: () = assert!(ClockMode::ADDR == regs::CLOCK_MODE);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::UsbSpeed,
        transport::{
            mock::{
                Mock,
                MockDevice,
            },
            DeviceBus,
            UsbAddress,
            UsbTransport,
        },
    };

    const ADDR: UsbAddress = UsbAddress { bus: 1, address: 9 };

    #[test]
    fn test_write_read_reg() -> anyhow::Result<()> {
        let mut mock = Mock::new(vec![MockDevice::new(
            ADDR,
            0x16C0,
            0x05DC,
            UsbSpeed::High,
            0,
            2,
        )]);
        mock.open(ADDR)?;
        let mut bus = DeviceBus::new(&mut mock, ADDR);
        write_reg(&mut bus, &Control::running(true, true))?;
        let clk = ClockMode {
            mode: 5.into(),
            falling_edge: false,
        };
        write_reg(&mut bus, &clk)?;
        assert_eq!(read_reg::<_, ClockMode>(&mut bus)?, clk);
        assert_eq!(
            mock.device(ADDR).writes,
            vec![(regs::CONTROL, 0b1010), (regs::CLOCK_MODE, 5)]
        );
        Ok(())
    }

    #[test]
    fn test_control_words() {
        assert_eq!(Control::held(false).serialize().unwrap(), 5);
        assert_eq!(Control::held(true).serialize().unwrap(), 7);
        assert_eq!(
            Control {
                clear: true,
                ..Control::held(false)
            }
            .serialize()
            .unwrap(),
            0x15
        );
        assert_eq!(Control::running(true, true).serialize().unwrap(), 0b1010);
        assert_eq!(Control::running(false, false).serialize().unwrap(), 0);
    }

    #[test]
    fn test_control_roundtrip() {
        let ctl = Control::deserialize(0b1_0110).unwrap();
        assert!(ctl.clear && ctl.fifo_hold && ctl.stream);
        assert!(!ctl.hold && !ctl.filter);
    }

    #[test]
    fn test_clock_mode() {
        let clk = ClockMode {
            mode: 3.into(),
            falling_edge: true,
        };
        assert_eq!(clk.serialize().unwrap(), 0b1011);
        assert_eq!(ClockMode::deserialize(7).unwrap().mode, 7.into());
    }
}
