//! The USB capabilities the driver consumes from the platform.
//!
//! Everything is addressed by [`UsbAddress`] so that a transport can hold many devices at once.
//! Synchronous calls block up to their timeout. Asynchronous bulk-in reads are submitted with a
//! [`TransferToken`] and come back through [`UsbTransport::poll_completions`], always on the
//! caller's thread.

pub mod mock;
pub mod usb;

use crate::core::{
    DeviceHandle,
    UsbSpeed,
};
use std::{
    fmt::Display,
    time::Duration,
};
use thiserror::Error;

/// Location of a device on the host's buses
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UsbAddress {
    pub bus: u8,
    pub address: u8,
}

impl Display for UsbAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

/// What enumeration tells us about a device before it is opened
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub addr: UsbAddress,
    pub vendor_id: u16,
    pub product_id: u16,
    pub speed: UsbSpeed,
}

/// Identifies one submission of an asynchronous transfer. The generation changes with every
/// acquisition so completions from an earlier one can be told apart.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TransferToken {
    pub device: DeviceHandle,
    pub slot: usize,
    pub generation: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    TimedOut,
    Stalled,
    Cancelled,
    NoDevice,
    Other,
}

/// A finished asynchronous transfer, handing its buffer back
#[derive(Debug)]
pub struct Completion {
    pub token: TransferToken,
    pub status: TransferStatus,
    /// Bytes received at the start of `buffer`
    pub actual_length: usize,
    pub buffer: Vec<u8>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Transfer timed out")]
    Timeout,
    #[error("Endpoint stalled")]
    Stall,
    #[error("Device disconnected")]
    NoDevice,
    #[error("Device {0} is not open")]
    NotOpen(UsbAddress),
    #[error("No such transfer in flight")]
    UnknownTransfer,
    #[error("USB error: {0}")]
    Usb(String),
}

/// A rejected submission. The buffer is handed back so the caller can release it.
#[derive(Error, Debug)]
#[error("Could not submit transfer")]
pub struct SubmitError {
    #[source]
    pub error: Error,
    pub buffer: Vec<u8>,
}

/// The trait that is implemented for USB host backends
pub trait UsbTransport {
    /// Every device currently attached
    /// # Errors
    /// Returns an error if the bus can't be enumerated
    fn devices(&mut self) -> Result<Vec<UsbDeviceInfo>, Error>;

    /// # Errors
    /// Returns an error if the device is gone or access is denied
    fn open(&mut self, addr: UsbAddress) -> Result<(), Error>;

    /// Close the device, dropping any claimed interfaces. Closing a closed device is a no-op.
    fn close(&mut self, addr: UsbAddress);

    /// # Errors
    /// Returns an error if the interface is busy or the device isn't open
    fn claim_interface(&mut self, addr: UsbAddress, iface: u8) -> Result<(), Error>;

    /// Release an interface. Asynchronous reads still pending on the device end as cancelled.
    /// # Errors
    /// Returns an error if the device isn't open
    fn release_interface(&mut self, addr: UsbAddress, iface: u8) -> Result<(), Error>;

    /// The manufacturer string descriptor
    /// # Errors
    /// Returns an error if the descriptor can't be read
    fn manufacturer(&mut self, addr: UsbAddress) -> Result<String, Error>;

    /// # Errors
    /// Returns an error on any transfer failure
    fn bulk_write(
        &mut self,
        addr: UsbAddress,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, Error>;

    /// # Errors
    /// Returns an error on any transfer failure
    fn bulk_read(
        &mut self,
        addr: UsbAddress,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error>;

    /// Vendor device-to-host control transfer
    /// # Errors
    /// Returns an error on any transfer failure
    fn vendor_read(
        &mut self,
        addr: UsbAddress,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error>;

    /// # Errors
    /// Returns an error if the request fails
    fn clear_halt(&mut self, addr: UsbAddress, endpoint: u8) -> Result<(), Error>;

    /// A zeroed transfer buffer, or `None` if the memory isn't available
    fn alloc_buffer(&mut self, len: usize) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).ok()?;
        buf.resize(len, 0);
        Some(buf)
    }

    /// Give back a buffer obtained from [`UsbTransport::alloc_buffer`]
    fn release_buffer(&mut self, buffer: Vec<u8>) {
        drop(buffer);
    }

    /// Start an asynchronous bulk read filling all of `buffer`
    /// # Errors
    /// Returns the buffer with the reason if the transfer could not be queued
    fn submit_bulk_in(
        &mut self,
        addr: UsbAddress,
        endpoint: u8,
        token: TransferToken,
        buffer: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), SubmitError>;

    /// Request cancellation. The transfer still completes, with [`TransferStatus::Cancelled`] if
    /// the request won the race.
    /// # Errors
    /// Returns [`Error::UnknownTransfer`] if the token isn't in flight
    fn cancel(&mut self, token: TransferToken) -> Result<(), Error>;

    /// Wait up to `timeout` for finished transfers and return all of them
    fn poll_completions(&mut self, timeout: Duration) -> Vec<Completion>;
}

/// One opened device on a transport, seen as a register [`pxlogic_proto::Bus`]
pub struct DeviceBus<'a, T: ?Sized> {
    transport: &'a mut T,
    addr: UsbAddress,
}

impl<'a, T> DeviceBus<'a, T>
where
    T: UsbTransport + ?Sized,
{
    pub fn new(transport: &'a mut T, addr: UsbAddress) -> Self {
        Self { transport, addr }
    }
}

impl<T> pxlogic_proto::Bus for DeviceBus<'_, T>
where
    T: UsbTransport + ?Sized,
{
    fn bulk_write(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, pxlogic_proto::Error> {
        self.transport
            .bulk_write(self.addr, endpoint, data, timeout)
            .map_err(pxlogic_proto::Error::transport)
    }

    fn bulk_read(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, pxlogic_proto::Error> {
        self.transport
            .bulk_read(self.addr, endpoint, buf, timeout)
            .map_err(pxlogic_proto::Error::transport)
    }

    fn vendor_read(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, pxlogic_proto::Error> {
        self.transport
            .vendor_read(self.addr, request, value, index, buf, timeout)
            .map_err(pxlogic_proto::Error::transport)
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), pxlogic_proto::Error> {
        self.transport
            .clear_halt(self.addr, endpoint)
            .map_err(pxlogic_proto::Error::transport)
    }
}
