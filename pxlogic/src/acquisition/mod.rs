//! The acquisition engine.
//!
//! An acquisition goes `Idle -> Armed -> Streaming -> Draining -> Idle`. [`Plan::new`] derives
//! everything the hardware needs from the device configuration, [`program`] writes it, and
//! [`Acquisition`] keeps [`TRANSFER_POOL_SIZE`] bulk reads in flight until the sample limit is
//! reached or the capture is stopped. Completions are handled one at a time on the thread that
//! polls the transport, so none of this needs locking.
//!
//! Stopping never frees anything directly: every in-flight transfer is cancelled and retires
//! through its own completion, and the last one to retire ends the stream.

pub mod pool;

use crate::{
    config::DeviceConfig,
    core::{
        bytes_to_samples,
        samples_to_bytes,
        DeviceHandle,
        TRANSFER_POOL_SIZE,
        TRIG_CHECKID,
    },
    error::Error,
    registers::{
        write_reg,
        ClockMode,
        Control,
    },
    session::{
        Packet,
        PacketStatus,
        SampleFormat,
        Session,
    },
    timing::{
        self,
        ClockSetting,
    },
    transport::{
        Completion,
        TransferStatus,
        UsbAddress,
        UsbTransport,
    },
    trigger::{
        self,
        TriggerMasks,
    },
};
use pool::TransferPool;
use pxlogic_proto::{
    query_status,
    read_register,
    regs,
    write_register,
    Bus,
    STATUS_TIMEOUT,
};
use std::time::Duration;
use tracing::{
    debug,
    error,
    info,
    warn,
};

/// Bulk reads wait for data indefinitely
pub const TRANSFER_TIMEOUT: Duration = Duration::ZERO;

/// Period, in threshold-generator ticks, of the threshold voltage PWM
const VTH_PERIOD: u32 = 12_000;
/// Threshold voltage produced at full duty
const VTH_FULL_SCALE: f64 = 3.334;
/// The threshold input sits behind a divide-by-two
const VTH_INPUT_SCALE: f64 = 0.5;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Idle,
    /// Registers are being programmed
    Armed,
    /// Transfers are in flight
    Streaming,
    /// Stopped, waiting for in-flight transfers to retire
    Draining,
}

/// Progress of the running capture, as shown to the host
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct CaptureStatus {
    pub trigger_hit: bool,
    /// Samples per channel captured so far
    pub captured: u64,
    /// Bytes per bulk transfer
    pub block_size: u64,
}

/// Everything one capture is programmed with
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub ch_en: u32,
    pub ch_num: u32,
    pub masks: TriggerMasks,
    pub block_size: u64,
    /// Samples per channel to capture. Zero means no limit.
    pub limit_samples: u64,
    /// Bytes the hardware sends before it stops, one block more than the limit
    pub limit_bytes: u64,
    pub trigger_pos: u64,
    pub clock: ClockSetting,
    pub stream: bool,
    /// Whether the limit applies. Loop mode streams until stopped.
    pub count_samples: bool,
    pub vth: f64,
    pub filter: bool,
}

impl Plan {
    /// # Errors
    /// Returns [`Error::Unsupported`] with no channels enabled
    pub fn new(config: &DeviceConfig) -> Result<Self, Error> {
        let ch_en = config.channel_enable_mask();
        let ch_num = ch_en.count_ones();
        if ch_num == 0 {
            return Err(Error::unsupported("capture with no channels enabled"));
        }
        let stream = config.stream();
        let masks = trigger::encode(&config.trigger, ch_en);
        let block_size = timing::block_size(config.samplerate, ch_num, config.speed)?;
        let limit_samples = config.effective_limit();
        let depth = trigger::channel_depth(config.profile.caps.hw_depth, ch_num);
        Ok(Self {
            ch_en,
            ch_num,
            masks,
            block_size,
            limit_samples,
            limit_bytes: samples_to_bytes(limit_samples, ch_num) + block_size,
            trigger_pos: trigger::position(config.trigger.percent, limit_samples, depth, stream),
            clock: timing::clock_setting(config.samplerate),
            stream,
            count_samples: limit_samples > 0 && !(stream && config.loop_mode),
            vth: config.vth,
            filter: config.filter != 0,
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
fn vth_ticks(vth: f64) -> u32 {
    (vth * VTH_INPUT_SCALE / VTH_FULL_SCALE * f64::from(VTH_PERIOD)) as u32
}

/// Program the sampler for `plan` and release it. The data endpoints are reset on the way.
/// # Errors
/// Returns an error on the first register write that fails
#[allow(clippy::cast_possible_truncation)]
pub fn program<B>(bus: &mut B, config: &DeviceConfig, plan: &Plan) -> Result<(), pxlogic_proto::Error>
where
    B: Bus + ?Sized,
{
    // Generator 1 is only loaded when it is configured
    for (addr, value) in config.pwm[0].register_writes(0) {
        write_register(bus, addr, value)?;
    }
    write_register(bus, regs::BLOCK_START, 0)?;
    for ep in [regs::EP_DATA_IN, regs::EP_AUX_OUT, regs::EP_AUX_IN] {
        bus.clear_halt(ep)?;
    }
    write_register(bus, regs::VTH_DIVIDER, VTH_PERIOD)?;
    write_register(bus, regs::VTH_VALUE, vth_ticks(plan.vth))?;

    // Hold the sampler while it is set up
    write_register(bus, regs::CHANNEL_ENABLE, 0)?;
    let held = Control::held(plan.stream);
    write_reg(bus, &held)?;
    write_reg(bus, &Control { clear: true, ..held })?;
    write_reg(bus, &held)?;
    write_register(bus, regs::CAPTURE_GATE, regs::GATE_CLOSED)?;

    let block = u32::try_from(plan.block_size).unwrap_or(u32::MAX);
    write_register(bus, regs::BLOCK_SIZE, block)?;
    write_register(bus, regs::DMA_BLOCK_SIZE, block)?;
    write_register(bus, regs::LIMIT_BYTES_LO, plan.limit_bytes as u32)?;
    write_register(bus, regs::LIMIT_BYTES_HI, (plan.limit_bytes >> 32) as u32)?;
    write_register(bus, regs::EXT_TRIGGER_MODE, u32::from(config.ext_trigger_mode))?;
    write_register(bus, regs::TRIGGER_OUT, u32::from(config.trigger_out))?;
    write_reg(
        bus,
        &ClockMode {
            mode: plan.clock.mode.into(),
            falling_edge: config.clock_falling_edge,
        },
    )?;
    write_register(bus, regs::CLOCK_DIVIDER, plan.clock.divider)?;
    write_register(bus, regs::CHANNEL_COUNT, plan.ch_num)?;
    write_register(
        bus,
        regs::TRIGGER_POSITION,
        u32::try_from(plan.trigger_pos).unwrap_or(u32::MAX),
    )?;
    write_register(bus, regs::BLOCK_START, 0)?;
    let divider = read_register(bus, regs::CLOCK_DIVIDER)?;
    debug!("Clock divider reads back {divider}");

    // Release
    write_register(bus, regs::CHANNEL_ENABLE, plan.ch_en)?;
    write_reg(bus, &Control::running(plan.stream, plan.filter))?;
    write_register(bus, regs::TRIGGER_ZERO, plan.masks.zero)?;
    write_register(bus, regs::TRIGGER_ONE, plan.masks.one)?;
    write_register(bus, regs::TRIGGER_RISE, plan.masks.rise)?;
    write_register(bus, regs::TRIGGER_FALL, plan.masks.fall)?;
    write_register(bus, regs::CAPTURE_GATE, regs::GATE_OPEN)?;
    Ok(())
}

/// The capture state of one device
#[derive(Debug)]
pub struct Acquisition {
    device: DeviceHandle,
    state: State,
    pool: TransferPool,
    plan: Option<Plan>,
    samples: u64,
    /// No more resubmissions
    stop: bool,
    /// Cancellation was requested for everything in flight
    aborted: bool,
    /// A transport fault ended the capture
    failed: bool,
    data_seen: bool,
    trigger_reported: bool,
    status: CaptureStatus,
}

impl Acquisition {
    #[must_use]
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            state: State::Idle,
            pool: TransferPool::new(device),
            plan: None,
            samples: 0,
            stop: false,
            aborted: false,
            failed: false,
            data_seen: false,
            trigger_reported: false,
            status: CaptureStatus::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state != State::Idle
    }

    #[must_use]
    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    /// Samples per channel received so far
    #[must_use]
    pub fn samples(&self) -> u64 {
        self.samples
    }

    #[must_use]
    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    /// Transfers currently submitted
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pool.submitted()
    }

    pub fn reset_counter(&mut self) {
        self.samples = 0;
    }

    /// Take on `plan` for a new capture once the hardware has been programmed with it
    pub fn arm(&mut self, plan: Plan) {
        self.pool.next_generation();
        self.status = CaptureStatus {
            block_size: plan.block_size,
            ..CaptureStatus::default()
        };
        self.plan = Some(plan);
        self.samples = 0;
        self.stop = false;
        self.aborted = false;
        self.failed = false;
        self.data_seen = false;
        self.trigger_reported = false;
        self.state = State::Armed;
    }

    /// Allocate the transfer buffers and submit them all
    /// # Errors
    /// Returns [`Error::AllocationFailed`] before anything is submitted if a buffer can't be
    /// allocated, or [`Error::Io`] if a submission is rejected. In the latter case transfers
    /// already submitted are cancelled and retire through their completions.
    pub fn submit<T, S>(
        &mut self,
        transport: &mut T,
        addr: UsbAddress,
        session: &mut S,
    ) -> Result<(), Error>
    where
        T: UsbTransport + ?Sized,
        S: Session + ?Sized,
    {
        let len = self
            .plan
            .as_ref()
            .and_then(|p| usize::try_from(p.block_size).ok())
            .ok_or(Error::DeviceNotReady)?;
        let mut buffers = Vec::with_capacity(TRANSFER_POOL_SIZE);
        for _ in 0..TRANSFER_POOL_SIZE {
            let Some(buf) = transport.alloc_buffer(len) else {
                for buf in buffers {
                    transport.release_buffer(buf);
                }
                self.state = State::Idle;
                return Err(Error::AllocationFailed(len));
            };
            buffers.push(buf);
        }
        for slot in 0..TRANSFER_POOL_SIZE {
            let Some(buf) = buffers.pop() else {
                break;
            };
            let token = self.pool.token(slot);
            if let Err(rejected) =
                transport.submit_bulk_in(addr, regs::EP_DATA_IN, token, buf, TRANSFER_TIMEOUT)
            {
                error!(device = %self.device, "Could not submit transfer {slot}: {}", rejected.error);
                transport.release_buffer(rejected.buffer);
                for buf in buffers.drain(..) {
                    transport.release_buffer(buf);
                }
                self.failed = true;
                if self.pool.is_empty() {
                    self.state = State::Idle;
                } else {
                    self.abort(transport);
                }
                return Err(rejected.error.into());
            }
            self.pool.occupy(slot);
        }
        self.state = State::Streaming;
        info!(device = %self.device, "Streaming with {TRANSFER_POOL_SIZE} transfers of {len} bytes");
        session.forward_packet(self.device, Packet::Header);
        Ok(())
    }

    /// Cancel everything in flight. Calling it again has no further effect.
    pub fn abort<T>(&mut self, transport: &mut T)
    where
        T: UsbTransport + ?Sized,
    {
        self.stop = true;
        if self.aborted || self.pool.is_empty() {
            return;
        }
        self.aborted = true;
        self.state = State::Draining;
        debug!(device = %self.device, "Cancelling {} transfers", self.pool.submitted());
        let tokens: Vec<_> = self.pool.in_flight().collect();
        for token in tokens {
            // Lost the race against a completion, which retires the slot instead
            if let Err(e) = transport.cancel(token) {
                debug!(device = %self.device, slot = token.slot, "Cancel: {e}");
            }
        }
    }

    /// Handle one finished transfer of this device
    pub fn on_completion<T, S>(
        &mut self,
        transport: &mut T,
        addr: UsbAddress,
        session: &mut S,
        completion: Completion,
    ) where
        T: UsbTransport + ?Sized,
        S: Session + ?Sized,
    {
        let Completion {
            token,
            status,
            actual_length,
            buffer,
        } = completion;
        if !self.pool.owns(&token) {
            warn!(device = %self.device, ?token, "Dropping stale completion");
            transport.release_buffer(buffer);
            return;
        }
        if self.aborted {
            self.retire(transport, session, token.slot, buffer);
            return;
        }
        match status {
            TransferStatus::Stalled | TransferStatus::NoDevice => {
                error!(device = %self.device, ?status, "Transfer failed, ending capture");
                self.failed = true;
                self.abort(transport);
                self.retire(transport, session, token.slot, buffer);
                return;
            }
            TransferStatus::Cancelled => {
                self.retire(transport, session, token.slot, buffer);
                return;
            }
            TransferStatus::Completed | TransferStatus::TimedOut | TransferStatus::Other => (),
        }
        let has_data = matches!(status, TransferStatus::Completed | TransferStatus::TimedOut);
        if has_data && actual_length > 0 && !self.stop {
            self.forward(session, &buffer[..actual_length.min(buffer.len())]);
        }
        if self.limit_reached() {
            info!(device = %self.device, "Sample limit reached at {}", self.samples);
            self.abort(transport);
            self.retire(transport, session, token.slot, buffer);
        } else if self.stop {
            self.retire(transport, session, token.slot, buffer);
        } else if let Err(rejected) =
            transport.submit_bulk_in(addr, regs::EP_DATA_IN, token, buffer, TRANSFER_TIMEOUT)
        {
            warn!(device = %self.device, slot = token.slot, "Resubmit failed: {}", rejected.error);
            self.retire(transport, session, token.slot, rejected.buffer);
        }
    }

    fn limit_reached(&self) -> bool {
        self.plan
            .as_ref()
            .is_some_and(|p| p.count_samples && self.samples >= p.limit_samples)
    }

    /// Account for and forward received bytes, cut short so the count lands on the limit
    fn forward<S>(&mut self, session: &mut S, data: &[u8])
    where
        S: Session + ?Sized,
    {
        let Some(plan) = self.plan.as_ref() else {
            return;
        };
        let mut len = data.len();
        if plan.count_samples {
            let got = bytes_to_samples(len as u64, plan.ch_num);
            if self.samples + got >= plan.limit_samples {
                let remaining = plan.limit_samples - self.samples;
                len = usize::try_from(samples_to_bytes(remaining, plan.ch_num))
                    .map_or(len, |n| n.min(len));
                self.samples = plan.limit_samples;
            } else {
                self.samples += got;
            }
        }
        self.data_seen = true;
        self.status = CaptureStatus {
            trigger_hit: true,
            captured: self.samples,
            block_size: plan.block_size,
        };
        session.forward_packet(
            self.device,
            Packet::SampleData {
                format: SampleFormat::CrossData,
                bytes: &data[..len],
            },
        );
    }

    fn retire<T, S>(&mut self, transport: &mut T, session: &mut S, slot: usize, buffer: Vec<u8>)
    where
        T: UsbTransport + ?Sized,
        S: Session + ?Sized,
    {
        transport.release_buffer(buffer);
        if self.pool.retire(slot) {
            self.finish(session);
        }
    }

    fn finish<S>(&mut self, session: &mut S)
    where
        S: Session + ?Sized,
    {
        let status = if self.failed {
            PacketStatus::Error
        } else {
            PacketStatus::Ok
        };
        info!(device = %self.device, ?status, "Acquisition finished after {} samples", self.samples);
        session.forward_packet(self.device, Packet::EndOfStream { status });
        session.remove_event_source(self.device);
        self.stop = true;
        self.state = State::Idle;
    }

    /// Refresh the published status from the device while nothing has arrived yet. Returns the
    /// trigger position the hardware reports once the trigger fired.
    pub fn poll_status<B, S>(&mut self, bus: &mut B, session: &mut S) -> Option<u64>
    where
        B: Bus + ?Sized,
        S: Session + ?Sized,
    {
        if self.state != State::Streaming
            || self.data_seen
            || self.trigger_reported
            || self.limit_reached()
        {
            return None;
        }
        let plan = self.plan.as_mut()?;
        let block = match query_status(bus, STATUS_TIMEOUT) {
            Ok(b) => b,
            Err(e) => {
                debug!(device = %self.device, "Status query failed: {e}");
                return None;
            }
        };
        self.status = CaptureStatus {
            trigger_hit: block.trigger_hit(),
            captured: block.sync_cur_sample.min(plan.trigger_pos),
            block_size: plan.block_size,
        };
        if !block.trigger_hit() {
            return None;
        }
        self.trigger_reported = true;
        // Loop mode re-arms on its own and reports nothing useful here
        if plan.stream && !plan.count_samples {
            return None;
        }
        plan.trigger_pos = u64::from(block.real_pos);
        debug!(device = %self.device, "Trigger fired at {}", block.real_pos);
        if plan.masks.is_armed() {
            session.forward_packet(
                self.device,
                Packet::TriggerPosition {
                    check_id: TRIG_CHECKID,
                    real_pos: block.real_pos,
                    ram_start_addr: 0,
                    remaining_count: 0,
                    status: 1,
                },
            );
        }
        Some(plan.trigger_pos)
    }
}
