//! Mock transport used in testing the driver.
//!
//! [`Mock`] simulates the firmware side of the register protocol for any number of devices,
//! records uploads and endpoint resets, and queues asynchronous bulk reads until a test completes
//! them with [`Mock::complete_next`]. It counts every buffer it hands out and gets back so tests
//! can assert nothing leaks.

use super::{
    Completion,
    Error,
    SubmitError,
    TransferStatus,
    TransferToken,
    UsbAddress,
    UsbDeviceInfo,
    UsbTransport,
};
use crate::{
    core::UsbSpeed,
    provision::APP_FLASH_BASE,
};
use num_traits::FromPrimitive;
use packed_struct::prelude::*;
use pxlogic_proto::{
    frame::{
        Frame,
        Tag,
        FRAME_LEN,
    },
    regs::{
        self,
        UploadMode,
    },
    status::{
        StatusBlock,
        CMD_CTL_RD,
        STATUS_LEN,
    },
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    time::Duration,
};

/// An image that went through the upload window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub base: u32,
    pub end: u32,
    pub mode: Option<UploadMode>,
    pub data: Vec<u8>,
}

/// One simulated analyzer
#[derive(Debug)]
pub struct MockDevice {
    pub info: UsbDeviceInfo,
    pub manufacturer: String,
    /// Register file, by byte address
    pub regs: HashMap<u32, u32>,
    /// Every acknowledged register write, in order
    pub writes: Vec<(u32, u32)>,
    pub uploads: Vec<Upload>,
    pub status: StatusBlock,
    pub halts_cleared: Vec<u8>,
    pub claimed: Vec<u8>,
    /// Every interface release, in order
    pub released: Vec<u8>,
    pub open: bool,
    /// Answer writes with a bad echo
    pub nack: bool,
    /// Version reported after the application firmware is flashed
    pub flashed_version: u32,
    pending: VecDeque<[u8; FRAME_LEN]>,
}

impl MockDevice {
    /// A device of the given identity whose firmware and FPGA report `firmware_version` and
    /// `logic_mode`
    #[must_use]
    pub fn new(
        addr: UsbAddress,
        vid: u16,
        pid: u16,
        speed: UsbSpeed,
        firmware_version: u32,
        logic_mode: u32,
    ) -> Self {
        Self {
            info: UsbDeviceInfo {
                addr,
                vendor_id: vid,
                product_id: pid,
                speed,
            },
            manufacturer: "PX_Tool".into(),
            regs: HashMap::from([
                (regs::FIRMWARE_VERSION, firmware_version),
                (regs::MODE_ID, logic_mode),
            ]),
            writes: vec![],
            uploads: vec![],
            status: StatusBlock::default(),
            halts_cleared: vec![],
            claimed: vec![],
            released: vec![],
            open: false,
            nack: false,
            flashed_version: firmware_version,
            pending: VecDeque::new(),
        }
    }

    /// The last value written to `addr`
    #[must_use]
    pub fn reg(&self, addr: u32) -> Option<u32> {
        self.regs.get(&addr).copied()
    }

    /// Every value written to `addr`, in order
    #[must_use]
    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }

    fn command(&mut self, data: &[u8]) -> Result<(), Error> {
        let request = Frame::unpack_from_slice(data).map_err(|e| Error::Usb(e.to_string()))?;
        let echo = match request.kind() {
            Some(Tag::Write) if !self.nack => {
                self.regs.insert(request.addr, request.value);
                self.writes.push((request.addr, request.value));
                request.acknowledged()
            }
            Some(Tag::Write) => request,
            Some(Tag::Read) => Frame {
                value: self.reg(request.addr).unwrap_or_default(),
                ..request
            },
            // The firmware drops frames it doesn't understand
            None => return Ok(()),
        };
        let bytes = echo.pack().map_err(|e| Error::Usb(e.to_string()))?;
        self.pending.push_back(bytes);
        Ok(())
    }

    fn upload(&mut self, data: &[u8]) {
        let base = self.reg(regs::UPLOAD_BASE).unwrap_or_default();
        let mode = self
            .reg(regs::UPLOAD_MODE)
            .and_then(UploadMode::from_u32);
        if mode == Some(UploadMode::McuFlash) && base == APP_FLASH_BASE {
            self.regs
                .insert(regs::FIRMWARE_VERSION, self.flashed_version);
        }
        self.uploads.push(Upload {
            base,
            end: self.reg(regs::UPLOAD_END).unwrap_or_default(),
            mode,
            data: data.to_vec(),
        });
    }
}

struct InFlight {
    addr: UsbAddress,
    endpoint: u8,
    token: TransferToken,
    buffer: Vec<u8>,
}

/// A transport that mocks a set of devices, useful for testing
#[derive(Default)]
pub struct Mock {
    devices: Vec<MockDevice>,
    in_flight: VecDeque<InFlight>,
    completed: VecDeque<Completion>,
    /// Buffers handed out by [`UsbTransport::alloc_buffer`]
    pub allocations: usize,
    /// Buffers given back through [`UsbTransport::release_buffer`]
    pub releases: usize,
    /// Fail the allocation with this index, counted over the mock's lifetime
    pub fail_alloc_at: Option<usize>,
    /// Fail the submission with this index, counted over the mock's lifetime
    pub fail_submit_at: Option<usize>,
    /// Make enumeration fail
    pub fail_enumeration: bool,
    alloc_calls: usize,
    submit_calls: usize,
    /// Cancellation requests accepted
    pub cancels: usize,
}

impl Mock {
    #[must_use]
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }

    pub fn attach(&mut self, device: MockDevice) {
        self.devices.push(device);
    }

    /// # Panics
    /// Panics if no device sits at `addr`
    #[must_use]
    pub fn device(&self, addr: UsbAddress) -> &MockDevice {
        self.devices
            .iter()
            .find(|d| d.info.addr == addr)
            .expect("no mock device at this address")
    }

    /// # Panics
    /// Panics if no device sits at `addr`
    pub fn device_mut(&mut self, addr: UsbAddress) -> &mut MockDevice {
        self.devices
            .iter_mut()
            .find(|d| d.info.addr == addr)
            .expect("no mock device at this address")
    }

    /// Number of asynchronous reads waiting for a completion
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Device and endpoint of every pending read, oldest first
    #[must_use]
    pub fn in_flight_endpoints(&self) -> Vec<(UsbAddress, u8)> {
        self.in_flight.iter().map(|t| (t.addr, t.endpoint)).collect()
    }

    /// Complete the oldest pending read with `len` bytes of data
    /// # Panics
    /// Panics if nothing is in flight
    pub fn complete_next(&mut self, len: usize) -> TransferToken {
        self.complete_next_with(TransferStatus::Completed, len)
    }

    /// Complete the oldest pending read with an arbitrary status
    /// # Panics
    /// Panics if nothing is in flight
    pub fn complete_next_with(&mut self, status: TransferStatus, len: usize) -> TransferToken {
        let InFlight {
            token, mut buffer, ..
        } = self
            .in_flight
            .pop_front()
            .expect("no transfer in flight");
        let actual_length = len.min(buffer.len());
        // Counter pattern so forwarded bytes can be traced back
        for (b, v) in buffer[..actual_length].iter_mut().zip((0..=250u8).cycle()) {
            *b = v;
        }
        self.completed.push_back(Completion {
            token,
            status,
            actual_length,
            buffer,
        });
        token
    }

    /// Complete every pending read with `status` and no data, like a yanked cable
    pub fn fail_all(&mut self, status: TransferStatus) {
        while !self.in_flight.is_empty() {
            self.complete_next_with(status, 0);
        }
    }

    fn find_open(&mut self, addr: UsbAddress) -> Result<&mut MockDevice, Error> {
        self.devices
            .iter_mut()
            .find(|d| d.info.addr == addr && d.open)
            .ok_or(Error::NotOpen(addr))
    }
}

impl UsbTransport for Mock {
    fn devices(&mut self) -> Result<Vec<UsbDeviceInfo>, Error> {
        if self.fail_enumeration {
            return Err(Error::Usb("enumeration failed".into()));
        }
        Ok(self.devices.iter().map(|d| d.info).collect())
    }

    fn open(&mut self, addr: UsbAddress) -> Result<(), Error> {
        let dev = self
            .devices
            .iter_mut()
            .find(|d| d.info.addr == addr)
            .ok_or(Error::NoDevice)?;
        dev.open = true;
        Ok(())
    }

    fn close(&mut self, addr: UsbAddress) {
        if let Some(dev) = self.devices.iter_mut().find(|d| d.info.addr == addr) {
            dev.open = false;
            dev.claimed.clear();
            dev.pending.clear();
        }
    }

    fn claim_interface(&mut self, addr: UsbAddress, iface: u8) -> Result<(), Error> {
        let dev = self.find_open(addr)?;
        if !dev.claimed.contains(&iface) {
            dev.claimed.push(iface);
        }
        Ok(())
    }

    fn release_interface(&mut self, addr: UsbAddress, iface: u8) -> Result<(), Error> {
        self.find_open(addr)?;
        let (pending, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|t| t.addr == addr);
        self.in_flight = kept;
        for InFlight { token, buffer, .. } in pending {
            self.completed.push_back(Completion {
                token,
                status: TransferStatus::Cancelled,
                actual_length: 0,
                buffer,
            });
        }
        let dev = self.find_open(addr)?;
        dev.claimed.retain(|i| *i != iface);
        dev.released.push(iface);
        Ok(())
    }

    fn manufacturer(&mut self, addr: UsbAddress) -> Result<String, Error> {
        Ok(self.find_open(addr)?.manufacturer.clone())
    }

    fn bulk_write(
        &mut self,
        addr: UsbAddress,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, Error> {
        let dev = self.find_open(addr)?;
        match endpoint {
            regs::EP_CMD_OUT => dev.command(data)?,
            regs::EP_UPLOAD => dev.upload(data),
            _ => return Err(Error::Stall),
        }
        Ok(data.len())
    }

    fn bulk_read(
        &mut self,
        addr: UsbAddress,
        endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, Error> {
        let dev = self.find_open(addr)?;
        if endpoint != regs::EP_CMD_IN {
            return Err(Error::Stall);
        }
        let echo = dev.pending.pop_front().ok_or(Error::Timeout)?;
        let n = buf.len().min(FRAME_LEN);
        buf[..n].copy_from_slice(&echo[..n]);
        Ok(n)
    }

    fn vendor_read(
        &mut self,
        addr: UsbAddress,
        request: u8,
        _value: u16,
        _index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, Error> {
        let dev = self.find_open(addr)?;
        if request != CMD_CTL_RD {
            return Err(Error::Stall);
        }
        let block = dev.status.pack().map_err(|e| Error::Usb(e.to_string()))?;
        let n = buf.len().min(STATUS_LEN);
        buf[..n].copy_from_slice(&block[..n]);
        Ok(n)
    }

    fn clear_halt(&mut self, addr: UsbAddress, endpoint: u8) -> Result<(), Error> {
        self.find_open(addr)?.halts_cleared.push(endpoint);
        Ok(())
    }

    fn alloc_buffer(&mut self, len: usize) -> Option<Vec<u8>> {
        let call = self.alloc_calls;
        self.alloc_calls += 1;
        if self.fail_alloc_at == Some(call) {
            return None;
        }
        self.allocations += 1;
        Some(vec![0; len])
    }

    fn release_buffer(&mut self, buffer: Vec<u8>) {
        self.releases += 1;
        drop(buffer);
    }

    fn submit_bulk_in(
        &mut self,
        addr: UsbAddress,
        endpoint: u8,
        token: TransferToken,
        buffer: Vec<u8>,
        _timeout: Duration,
    ) -> Result<(), SubmitError> {
        let call = self.submit_calls;
        self.submit_calls += 1;
        if self.fail_submit_at == Some(call) {
            return Err(SubmitError {
                error: Error::Usb("submit rejected".into()),
                buffer,
            });
        }
        if let Err(error) = self.find_open(addr) {
            return Err(SubmitError { error, buffer });
        }
        self.in_flight.push_back(InFlight {
            addr,
            endpoint,
            token,
            buffer,
        });
        Ok(())
    }

    fn cancel(&mut self, token: TransferToken) -> Result<(), Error> {
        let idx = self
            .in_flight
            .iter()
            .position(|t| t.token == token)
            .ok_or(Error::UnknownTransfer)?;
        if let Some(InFlight { token, buffer, .. }) = self.in_flight.remove(idx) {
            self.cancels += 1;
            self.completed.push_back(Completion {
                token,
                status: TransferStatus::Cancelled,
                actual_length: 0,
                buffer,
            });
        }
        Ok(())
    }

    fn poll_completions(&mut self, _timeout: Duration) -> Vec<Completion> {
        self.completed.drain(..).collect()
    }
}
