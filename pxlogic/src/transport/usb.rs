//! Transport over libusb, via `rusb`.
//!
//! `rusb` only exposes blocking transfers, so asynchronous bulk-in reads are run by one worker
//! thread per opened device. Submissions reach the worker over a channel, and finished reads come
//! back over a shared completion channel that [`UsbTransport::poll_completions`] drains on the
//! caller's thread. Reads are issued in short slices so a cancellation is noticed promptly. A
//! slice that times out keeps whatever it received and the next one carries on after it, which
//! is why slices go straight to `libusb_bulk_transfer`: `rusb` drops the partial count.

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
use crate::core::UsbSpeed;
use crossbeam_channel::{
    unbounded,
    Receiver,
    RecvTimeoutError,
    Sender,
};
use rusb::{
    constants,
    ffi,
    Context,
    Device,
    DeviceDescriptor,
    DeviceHandle,
    Direction,
    Recipient,
    RequestType,
    UsbContext,
};
use std::{
    collections::HashMap,
    ffi::{
        c_int,
        c_uint,
    },
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    thread::JoinHandle,
    time::{
        Duration,
        Instant,
    },
};
use tracing::{
    debug,
    warn,
};

/// Longest single blocking read a worker issues before checking for cancellation
const READ_SLICE: Duration = Duration::from_millis(100);

impl From<rusb::Error> for Error {
    fn from(value: rusb::Error) -> Self {
        match value {
            rusb::Error::Timeout => Self::Timeout,
            rusb::Error::Pipe => Self::Stall,
            rusb::Error::NoDevice => Self::NoDevice,
            e => Self::Usb(e.to_string()),
        }
    }
}

fn speed(speed: rusb::Speed) -> Option<UsbSpeed> {
    match speed {
        rusb::Speed::Low => Some(UsbSpeed::Low),
        rusb::Speed::Full => Some(UsbSpeed::Full),
        rusb::Speed::High => Some(UsbSpeed::High),
        rusb::Speed::Super | rusb::Speed::SuperPlus => Some(UsbSpeed::Super),
        _ => None,
    }
}

struct Request {
    endpoint: u8,
    token: TransferToken,
    buffer: Vec<u8>,
    timeout: Duration,
    cancel: Arc<AtomicBool>,
}

struct Worker {
    requests: Sender<Request>,
    thread: JoinHandle<()>,
}

struct Opened {
    handle: Arc<DeviceHandle<Context>>,
    descriptor: DeviceDescriptor,
    worker: Option<Worker>,
}

/// The libusb-backed transport
pub struct Usb {
    context: Context,
    opened: HashMap<UsbAddress, Opened>,
    cancels: HashMap<TransferToken, (UsbAddress, Arc<AtomicBool>)>,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
}

impl Usb {
    /// # Errors
    /// Returns an error if libusb can't be initialized
    pub fn new() -> Result<Self, Error> {
        let (completions_tx, completions_rx) = unbounded();
        Ok(Self {
            context: Context::new()?,
            opened: HashMap::new(),
            cancels: HashMap::new(),
            completions_tx,
            completions_rx,
        })
    }

    fn find(&self, addr: UsbAddress) -> Result<Device<Context>, Error> {
        self.context
            .devices()?
            .iter()
            .find(|d| d.bus_number() == addr.bus && d.address() == addr.address)
            .ok_or(Error::NoDevice)
    }

    fn opened(&self, addr: UsbAddress) -> Result<&Opened, Error> {
        self.opened.get(&addr).ok_or(Error::NotOpen(addr))
    }

    /// Exclusive access to the handle, only possible while no worker shares it
    fn handle_mut(&mut self, addr: UsbAddress) -> Result<&mut DeviceHandle<Context>, Error> {
        let opened = self.opened.get_mut(&addr).ok_or(Error::NotOpen(addr))?;
        Arc::get_mut(&mut opened.handle).ok_or_else(|| Error::Usb("device is busy".into()))
    }

    fn stop_worker(&mut self, addr: UsbAddress) {
        for (_, flag) in self.cancels.values().filter(|(a, _)| *a == addr) {
            flag.store(true, Ordering::Relaxed);
        }
        if let Some(Worker { requests, thread }) =
            self.opened.get_mut(&addr).and_then(|o| o.worker.take())
        {
            drop(requests);
            if thread.join().is_err() {
                warn!(%addr, "USB worker panicked");
            }
        }
    }
}

fn libusb_error(code: c_int) -> rusb::Error {
    match code {
        constants::LIBUSB_ERROR_IO => rusb::Error::Io,
        constants::LIBUSB_ERROR_TIMEOUT => rusb::Error::Timeout,
        constants::LIBUSB_ERROR_PIPE => rusb::Error::Pipe,
        constants::LIBUSB_ERROR_NO_DEVICE => rusb::Error::NoDevice,
        constants::LIBUSB_ERROR_OVERFLOW => rusb::Error::Overflow,
        constants::LIBUSB_ERROR_INTERRUPTED => rusb::Error::Interrupted,
        constants::LIBUSB_ERROR_NO_MEM => rusb::Error::NoMem,
        _ => rusb::Error::Other,
    }
}

/// A bulk-in endpoint that says how much data moved even when a read ends early
trait BulkIn {
    /// Read into `buf`, returning the bytes received along with how the read ended
    fn read_bulk_partial(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> (usize, Result<(), rusb::Error>);
}

impl BulkIn for DeviceHandle<Context> {
    fn read_bulk_partial(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> (usize, Result<(), rusb::Error>) {
        let length = c_int::try_from(buf.len()).unwrap_or(c_int::MAX);
        // libusb reads a zero timeout as "wait forever"
        let timeout = c_uint::try_from(timeout.as_millis())
            .unwrap_or(c_uint::MAX)
            .max(1);
        let mut transferred: c_int = 0;
        // Safety: the handle stays open while `self` is borrowed, and libusb writes at most
        // `length` bytes into `buf`, which is at least that long
        let code = unsafe {
            ffi::libusb_bulk_transfer(
                self.as_raw(),
                endpoint,
                buf.as_mut_ptr(),
                length,
                &mut transferred,
                timeout,
            )
        };
        let n = usize::try_from(transferred)
            .unwrap_or_default()
            .min(buf.len());
        let result = if code == 0 {
            Ok(())
        } else {
            Err(libusb_error(code))
        };
        (n, result)
    }
}

/// Run one bulk-in read, slice by slice, until it completes, the deadline passes, or the
/// transfer is cancelled. Data from every slice is kept.
fn read<H>(handle: &H, mut req: Request) -> Completion
where
    H: BulkIn + ?Sized,
{
    let deadline = (!req.timeout.is_zero()).then(|| Instant::now() + req.timeout);
    let mut filled = 0;
    let status = loop {
        if req.cancel.load(Ordering::Relaxed) {
            break TransferStatus::Cancelled;
        }
        if filled == req.buffer.len() {
            break TransferStatus::Completed;
        }
        let slice = deadline.map_or(READ_SLICE, |d| {
            d.saturating_duration_since(Instant::now()).min(READ_SLICE)
        });
        if slice.is_zero() {
            break TransferStatus::TimedOut;
        }
        let (n, result) = handle.read_bulk_partial(req.endpoint, &mut req.buffer[filled..], slice);
        filled += n;
        match result {
            Ok(()) => break TransferStatus::Completed,
            Err(rusb::Error::Timeout) => {}
            Err(rusb::Error::Pipe) => break TransferStatus::Stalled,
            Err(rusb::Error::NoDevice) => break TransferStatus::NoDevice,
            Err(e) => {
                debug!("Bulk read failed: {e}");
                break TransferStatus::Other;
            }
        }
    };
    Completion {
        token: req.token,
        status,
        actual_length: filled,
        buffer: req.buffer,
    }
}

fn spawn_worker(
    addr: UsbAddress,
    handle: Arc<DeviceHandle<Context>>,
    completions: Sender<Completion>,
) -> Result<Worker, Error> {
    let (requests, rx) = unbounded::<Request>();
    let thread = std::thread::Builder::new()
        .name(format!("pxlogic-usb-{addr}"))
        .spawn(move || {
            for req in rx {
                if completions.send(read(&*handle, req)).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| Error::Usb(e.to_string()))?;
    Ok(Worker { requests, thread })
}

impl UsbTransport for Usb {
    fn devices(&mut self) -> Result<Vec<UsbDeviceInfo>, Error> {
        let mut found = vec![];
        for device in self.context.devices()?.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            let Some(speed) = speed(device.speed()) else {
                continue;
            };
            found.push(UsbDeviceInfo {
                addr: UsbAddress {
                    bus: device.bus_number(),
                    address: device.address(),
                },
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                speed,
            });
        }
        Ok(found)
    }

    fn open(&mut self, addr: UsbAddress) -> Result<(), Error> {
        if self.opened.contains_key(&addr) {
            return Ok(());
        }
        let device = self.find(addr)?;
        let descriptor = device.device_descriptor()?;
        let mut handle = device.open()?;
        // Not supported on every platform
        let _ = handle.set_auto_detach_kernel_driver(true);
        self.opened.insert(
            addr,
            Opened {
                handle: Arc::new(handle),
                descriptor,
                worker: None,
            },
        );
        Ok(())
    }

    fn close(&mut self, addr: UsbAddress) {
        self.stop_worker(addr);
        self.opened.remove(&addr);
    }

    fn claim_interface(&mut self, addr: UsbAddress, iface: u8) -> Result<(), Error> {
        Ok(self.handle_mut(addr)?.claim_interface(iface)?)
    }

    fn release_interface(&mut self, addr: UsbAddress, iface: u8) -> Result<(), Error> {
        // The worker shares the handle, so it goes first
        self.stop_worker(addr);
        Ok(self.handle_mut(addr)?.release_interface(iface)?)
    }

    fn manufacturer(&mut self, addr: UsbAddress) -> Result<String, Error> {
        let opened = self.opened(addr)?;
        Ok(opened
            .handle
            .read_manufacturer_string_ascii(&opened.descriptor)?)
    }

    fn bulk_write(
        &mut self,
        addr: UsbAddress,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, Error> {
        Ok(self.opened(addr)?.handle.write_bulk(endpoint, data, timeout)?)
    }

    fn bulk_read(
        &mut self,
        addr: UsbAddress,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error> {
        Ok(self.opened(addr)?.handle.read_bulk(endpoint, buf, timeout)?)
    }

    fn vendor_read(
        &mut self,
        addr: UsbAddress,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error> {
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        Ok(self
            .opened(addr)?
            .handle
            .read_control(request_type, request, value, index, buf, timeout)?)
    }

    fn clear_halt(&mut self, addr: UsbAddress, endpoint: u8) -> Result<(), Error> {
        Ok(self.opened(addr)?.handle.clear_halt(endpoint)?)
    }

    fn submit_bulk_in(
        &mut self,
        addr: UsbAddress,
        endpoint: u8,
        token: TransferToken,
        buffer: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), SubmitError> {
        let completions = self.completions_tx.clone();
        let Some(opened) = self.opened.get_mut(&addr) else {
            return Err(SubmitError {
                error: Error::NotOpen(addr),
                buffer,
            });
        };
        if opened.worker.is_none() {
            match spawn_worker(addr, Arc::clone(&opened.handle), completions) {
                Ok(w) => opened.worker = Some(w),
                Err(error) => return Err(SubmitError { error, buffer }),
            }
        }
        let cancel = Arc::new(AtomicBool::new(false));
        let req = Request {
            endpoint,
            token,
            buffer,
            timeout,
            cancel: Arc::clone(&cancel),
        };
        let Some(worker) = opened.worker.as_ref() else {
            return Err(SubmitError {
                error: Error::NotOpen(addr),
                buffer: req.buffer,
            });
        };
        if let Err(rejected) = worker.requests.send(req) {
            return Err(SubmitError {
                error: Error::Usb("worker stopped".into()),
                buffer: rejected.into_inner().buffer,
            });
        }
        self.cancels.insert(token, (addr, cancel));
        Ok(())
    }

    fn cancel(&mut self, token: TransferToken) -> Result<(), Error> {
        let (_, flag) = self.cancels.get(&token).ok_or(Error::UnknownTransfer)?;
        flag.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn poll_completions(&mut self, timeout: Duration) -> Vec<Completion> {
        let mut done = match self.completions_rx.recv_timeout(timeout) {
            Ok(c) => vec![c],
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return vec![],
        };
        done.extend(self.completions_rx.try_iter());
        for c in &done {
            self.cancels.remove(&c.token);
        }
        done
    }
}

impl Drop for Usb {
    fn drop(&mut self) {
        let addrs: Vec<UsbAddress> = self.opened.keys().copied().collect();
        for addr in addrs {
            self.close(addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        cell::RefCell,
        collections::VecDeque,
    };

    /// Plays back a fixed list of slice outcomes, then times out
    #[derive(Default)]
    struct Scripted {
        slices: RefCell<VecDeque<(Vec<u8>, Result<(), rusb::Error>)>>,
        offsets: RefCell<Vec<usize>>,
        cancel_after_first: Option<Arc<AtomicBool>>,
    }

    impl Scripted {
        fn new(slices: Vec<(Vec<u8>, Result<(), rusb::Error>)>) -> Self {
            Self {
                slices: RefCell::new(slices.into()),
                ..Default::default()
            }
        }
    }

    impl BulkIn for Scripted {
        fn read_bulk_partial(
            &self,
            _endpoint: u8,
            buf: &mut [u8],
            timeout: Duration,
        ) -> (usize, Result<(), rusb::Error>) {
            self.offsets.borrow_mut().push(buf.len());
            let Some((data, result)) = self.slices.borrow_mut().pop_front() else {
                std::thread::sleep(timeout);
                return (0, Err(rusb::Error::Timeout));
            };
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            if let Some(flag) = &self.cancel_after_first {
                flag.store(true, Ordering::Relaxed);
            }
            (n, result)
        }
    }

    fn request(len: usize, timeout: Duration) -> Request {
        Request {
            endpoint: 0x82,
            token: TransferToken {
                device: crate::core::DeviceHandle(0),
                slot: 0,
                generation: 1,
            },
            buffer: vec![0; len],
            timeout,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn test_read_keeps_data_across_slices() {
        let dev = Scripted::new(vec![
            (vec![1; 8], Err(rusb::Error::Timeout)),
            (vec![2; 4], Ok(())),
        ]);
        let done = read(&dev, request(64, Duration::ZERO));
        assert_eq!(done.status, TransferStatus::Completed);
        assert_eq!(done.actual_length, 12);
        assert_eq!(&done.buffer[..8], &[1u8; 8]);
        assert_eq!(&done.buffer[8..12], &[2u8; 4]);
        // The second slice reads after the first one's data
        assert_eq!(*dev.offsets.borrow(), vec![64, 56]);
    }

    #[test]
    fn test_read_fills_buffer_over_slices() {
        let dev = Scripted::new(vec![
            (vec![1; 8], Err(rusb::Error::Timeout)),
            (vec![2; 8], Err(rusb::Error::Timeout)),
        ]);
        let done = read(&dev, request(16, Duration::ZERO));
        assert_eq!(done.status, TransferStatus::Completed);
        assert_eq!(done.actual_length, 16);
        assert_eq!(dev.offsets.borrow().len(), 2);
    }

    #[test]
    fn test_read_timed_out_with_data() {
        let dev = Scripted::new(vec![(vec![7; 16], Err(rusb::Error::Timeout))]);
        let done = read(&dev, request(4096, Duration::from_millis(150)));
        assert_eq!(done.status, TransferStatus::TimedOut);
        assert_eq!(done.actual_length, 16);
        assert_eq!(&done.buffer[..16], &[7u8; 16]);
    }

    #[test]
    fn test_read_cancelled_with_data() {
        let req = request(4096, Duration::ZERO);
        let dev = Scripted {
            cancel_after_first: Some(Arc::clone(&req.cancel)),
            ..Scripted::new(vec![(vec![3; 32], Err(rusb::Error::Timeout))])
        };
        let done = read(&dev, req);
        assert_eq!(done.status, TransferStatus::Cancelled);
        assert_eq!(done.actual_length, 32);
    }

    #[test]
    fn test_read_stall() {
        let dev = Scripted::new(vec![(vec![], Err(rusb::Error::Pipe))]);
        let done = read(&dev, request(64, Duration::ZERO));
        assert_eq!(done.status, TransferStatus::Stalled);
        assert_eq!(done.actual_length, 0);
    }

    #[test]
    fn test_libusb_error_mapping() {
        assert_eq!(libusb_error(constants::LIBUSB_ERROR_TIMEOUT), rusb::Error::Timeout);
        assert_eq!(libusb_error(constants::LIBUSB_ERROR_PIPE), rusb::Error::Pipe);
        assert_eq!(libusb_error(constants::LIBUSB_ERROR_NO_DEVICE), rusb::Error::NoDevice);
        assert_eq!(libusb_error(-1000), rusb::Error::Other);
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(Error::from(rusb::Error::Timeout), Error::Timeout);
        assert_eq!(Error::from(rusb::Error::Pipe), Error::Stall);
        assert_eq!(Error::from(rusb::Error::NoDevice), Error::NoDevice);
        assert!(matches!(Error::from(rusb::Error::Access), Error::Usb(_)));
    }

    #[test]
    fn test_speed_mapping() {
        assert_eq!(speed(rusb::Speed::SuperPlus), Some(UsbSpeed::Super));
        assert_eq!(speed(rusb::Speed::High), Some(UsbSpeed::High));
        assert_eq!(speed(rusb::Speed::Unknown), None);
    }
}
