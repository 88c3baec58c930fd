//! # PX Logic register protocol
//!
//! Everything a PX Logic logic analyzer understands before sample data starts flowing: 16-byte
//! register frames on the command endpoints, a vendor control request for live capture status,
//! and the upload window used to flash firmware and configure the FPGA.
//!
//! The functions here are IO-agnostic and run against any [`Bus`], so they can be exercised
//! against a simulated device.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod frame;
pub mod regs;
pub mod status;

use frame::{
    Frame,
    FRAME_LEN,
};
use packed_struct::prelude::*;
use regs::UploadMode;
use status::{
    StatusBlock,
    CMD_CTL_RD,
    STATUS_LEN,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{
    debug,
    trace,
};

/// Timeout applied to each half of a register transaction
pub const REGISTER_TIMEOUT: Duration = Duration::from_millis(1000);
/// Timeout of the status control transfer
pub const STATUS_TIMEOUT: Duration = Duration::from_millis(3000);
/// Timeout of a firmware or bitstream bulk write
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can be thrown from register protocol interactions
#[derive(Error, Debug)]
pub enum Error {
    #[error("USB transfer failed")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Write to register {addr:#06x} was not acknowledged (echo {echo:#010x})")]
    BadAck { addr: u32, echo: u32 },
    #[error("Expected to transfer {expected} bytes but moved {actual}")]
    Short { expected: usize, actual: usize },
    #[error("Image of {0} bytes does not fit the upload window")]
    Oversize(usize),
    #[error(transparent)]
    Packing(#[from] PackingError),
}

impl Error {
    /// Wrap any transport-level failure
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }
}

/// The endpoint-level operations the protocol needs from an opened, claimed device
pub trait Bus {
    /// Synchronous bulk OUT, returns the number of bytes written
    fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, Error>;

    /// Synchronous bulk IN, returns the number of bytes read
    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration)
        -> Result<usize, Error>;

    /// Vendor device-to-host control request
    fn vendor_read(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error>;

    /// Clear a halt/stall condition on `endpoint`
    fn clear_halt(&mut self, endpoint: u8) -> Result<(), Error>;
}

fn expect_len(expected: usize, actual: usize) -> Result<(), Error> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::Short { expected, actual })
    }
}

fn transact<B>(bus: &mut B, request: Frame) -> Result<Frame, Error>
where
    B: Bus + ?Sized,
{
    let bytes = request.pack()?;
    let sent = bus.bulk_write(regs::EP_CMD_OUT, &bytes, REGISTER_TIMEOUT)?;
    expect_len(FRAME_LEN, sent)?;
    let mut echo = [0u8; FRAME_LEN];
    let got = bus.bulk_read(regs::EP_CMD_IN, &mut echo, REGISTER_TIMEOUT)?;
    expect_len(FRAME_LEN, got)?;
    Ok(Frame::unpack(&echo)?)
}

/// Write `value` to the register at byte address `addr`
/// # Errors
/// Returns an error on transport failure or if the device does not acknowledge the write
pub fn write_register<B>(bus: &mut B, addr: u32, value: u32) -> Result<(), Error>
where
    B: Bus + ?Sized,
{
    let echo = transact(bus, Frame::write(addr, value))?;
    if !echo.is_ack() {
        return Err(Error::BadAck {
            addr,
            echo: echo.value,
        });
    }
    trace!("wr {addr:#06x} <- {value:#x}");
    Ok(())
}

/// Read the register at byte address `addr`
/// # Errors
/// Returns an error on transport failure or a short echo
pub fn read_register<B>(bus: &mut B, addr: u32) -> Result<u32, Error>
where
    B: Bus + ?Sized,
{
    let echo = transact(bus, Frame::read(addr))?;
    trace!("rd {addr:#06x} -> {:#x}", echo.value);
    Ok(echo.value)
}

/// Read the live capture status without touching the bulk endpoints
/// # Errors
/// Returns an error on transport failure or if the device returns a truncated block
pub fn query_status<B>(bus: &mut B, timeout: Duration) -> Result<StatusBlock, Error>
where
    B: Bus + ?Sized,
{
    let mut buf = [0u8; STATUS_LEN];
    let got = bus.vendor_read(CMD_CTL_RD, 0, 0, &mut buf, timeout)?;
    expect_len(STATUS_LEN, got)?;
    Ok(StatusBlock::unpack(&buf)?)
}

/// Program the upload window and stream `image` into it with a single bulk write.
/// `image` must already be padded to the granularity the destination expects.
/// # Errors
/// Returns an error if the image is larger than the 32-bit window or on any transfer failure
pub fn upload_image<B>(bus: &mut B, base: u32, mode: UploadMode, image: &[u8]) -> Result<(), Error>
where
    B: Bus + ?Sized,
{
    let end = u32::try_from(image.len())
        .ok()
        .and_then(|len| base.checked_add(len))
        .ok_or(Error::Oversize(image.len()))?;
    debug!(?mode, base, len = image.len(), "Uploading image");
    write_register(bus, regs::UPLOAD_BASE, base)?;
    write_register(bus, regs::UPLOAD_END, end)?;
    write_register(bus, regs::UPLOAD_MODE, mode as u32)?;
    bus.clear_halt(regs::EP_UPLOAD)?;
    let sent = bus.bulk_write(regs::EP_UPLOAD, image, UPLOAD_TIMEOUT)?;
    expect_len(image.len(), sent)
}
