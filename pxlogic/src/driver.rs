//! The driver's public surface.
//!
//! A [`Driver`] owns the USB transport, the session that receives acquisition output, and every
//! device it has discovered. The host drives it from one thread: it calls
//! [`Driver::handle_events`] whenever the transport may have finished transfers, and
//! [`Driver::poll_status`] on the interval the session was asked for.

use crate::{
    acquisition::CaptureStatus,
    config::{
        self,
        ConfigKey,
        ConfigValue,
    },
    core::DeviceHandle,
    device::Device,
    discovery,
    error::Error,
    provision::Provisioner,
    session::Session,
    settings::Settings,
    transport::{
        UsbAddress,
        UsbTransport,
    },
    trigger::TriggerSpec,
};
use std::{
    collections::BTreeMap,
    time::Duration,
};
use tracing::{
    debug,
    warn,
};

/// How long `close` waits for a running capture's transfers each round
const CLOSE_DRAIN_POLL: Duration = Duration::from_millis(100);
/// Rounds `close` waits before giving up on a capture
const CLOSE_DRAIN_ROUNDS: usize = 50;

pub struct Driver<T, S> {
    transport: T,
    session: S,
    settings: Settings,
    provisioner: Provisioner,
    devices: BTreeMap<DeviceHandle, Device>,
    next_handle: u32,
}

impl<T, S> Driver<T, S>
where
    T: UsbTransport,
    S: Session,
{
    #[must_use]
    pub fn new(transport: T, session: S, settings: Settings) -> Self {
        Self {
            transport,
            session,
            provisioner: Provisioner::new(&settings),
            settings,
            devices: BTreeMap::new(),
            next_handle: 0,
        }
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[must_use]
    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Handles of every device discovered so far
    pub fn devices(&self) -> impl Iterator<Item = DeviceHandle> + '_ {
        self.devices.keys().copied()
    }

    /// # Errors
    /// Returns [`Error::UnknownDevice`] for a handle this driver never issued
    pub fn device(&self, handle: DeviceHandle) -> Result<&Device, Error> {
        self.devices
            .get(&handle)
            .ok_or(Error::UnknownDevice(handle))
    }

    fn device_mut(&mut self, handle: DeviceHandle) -> Result<&mut Device, Error> {
        self.devices
            .get_mut(&handle)
            .ok_or(Error::UnknownDevice(handle))
    }

    /// Look for supported devices not seen before and return their handles
    /// # Errors
    /// Returns an error if the bus can't be enumerated
    pub fn scan(&mut self) -> Result<Vec<DeviceHandle>, Error> {
        let known: Vec<UsbAddress> = self.devices.values().map(Device::addr).collect();
        let mut found = vec![];
        for candidate in discovery::scan(&mut self.transport, &known)? {
            let handle = DeviceHandle(self.next_handle);
            let device = match Device::new(
                handle,
                candidate.info,
                candidate.profile,
                self.settings.language,
            ) {
                Ok(d) => d,
                Err(e) => {
                    debug!(addr = %candidate.info.addr, "Skipping device: {e}");
                    continue;
                }
            };
            self.next_handle += 1;
            self.devices.insert(handle, device);
            found.push(handle);
        }
        Ok(found)
    }

    /// Open and provision a device
    /// # Errors
    /// Returns [`Error::DeviceNeedsReopen`] when new firmware was flashed: close and open again.
    /// Otherwise returns the failure that kept the device from becoming active.
    pub fn open(&mut self, handle: DeviceHandle) -> Result<(), Error> {
        let device = self
            .devices
            .get_mut(&handle)
            .ok_or(Error::UnknownDevice(handle))?;
        device.open(&mut self.transport, &self.provisioner)
    }

    /// Close a device, ending a running capture first
    /// # Errors
    /// Returns [`Error::DeviceNotReady`] if the capture's transfers don't come back in time
    pub fn close(&mut self, handle: DeviceHandle) -> Result<(), Error> {
        self.stop_acquisition(handle)?;
        for _ in 0..CLOSE_DRAIN_ROUNDS {
            if !self.device(handle)?.acquisition().is_running() {
                break;
            }
            self.handle_events(CLOSE_DRAIN_POLL);
        }
        let device = self
            .devices
            .get_mut(&handle)
            .ok_or(Error::UnknownDevice(handle))?;
        device.close(&mut self.transport)
    }

    /// # Errors
    /// Returns [`Error::Unsupported`] for keys without a value
    pub fn get_config(&self, handle: DeviceHandle, key: ConfigKey) -> Result<ConfigValue, Error> {
        self.device(handle)?.get_config(key)
    }

    /// # Errors
    /// Returns [`Error::DeviceNotReady`] unless the device is active (and idle, for keys tied to
    /// the capture), [`Error::Unsupported`] for bad keys and values, or a register failure
    pub fn set_config(
        &mut self,
        handle: DeviceHandle,
        key: ConfigKey,
        value: ConfigValue,
    ) -> Result<(), Error> {
        let device = self
            .devices
            .get_mut(&handle)
            .ok_or(Error::UnknownDevice(handle))?;
        device.set_config(&mut self.transport, key, &value)
    }

    /// Legal values for `key` under the current configuration
    /// # Errors
    /// Returns [`Error::Unsupported`] for keys without a list
    pub fn list_config(
        &self,
        handle: DeviceHandle,
        key: ConfigKey,
    ) -> Result<Vec<ConfigValue>, Error> {
        self.device(handle)?.list_config(key)
    }

    /// The code of the option displayed as `text`, in either language
    /// # Errors
    /// Returns [`Error::Unsupported`] if no option of `key` has that name
    #[allow(clippy::unused_self)]
    pub fn option_code(&self, key: ConfigKey, text: &str) -> Result<i32, Error> {
        config::option_code(key, text)
    }

    /// # Errors
    /// Returns [`Error::DeviceNotReady`] unless the device is active and idle
    pub fn set_trigger(&mut self, handle: DeviceHandle, trigger: TriggerSpec) -> Result<(), Error> {
        self.device_mut(handle)?.set_trigger(trigger)
    }

    /// # Errors
    /// Returns [`Error::DeviceNotReady`] unless the device is active and idle, or
    /// [`Error::Unsupported`] for a probe the channel mode doesn't have
    pub fn set_channel_enabled(
        &mut self,
        handle: DeviceHandle,
        index: u16,
        enabled: bool,
    ) -> Result<(), Error> {
        self.device_mut(handle)?.set_channel_enabled(index, enabled)
    }

    /// # Errors
    /// Returns [`Error::DeviceNotReady`] unless the device is active and idle, or the first
    /// failure while programming the hardware or submitting transfers
    pub fn start_acquisition(&mut self, handle: DeviceHandle) -> Result<(), Error> {
        let interval = self.settings.status_poll_interval();
        let device = self
            .devices
            .get_mut(&handle)
            .ok_or(Error::UnknownDevice(handle))?;
        device.start(&mut self.transport, &mut self.session, interval)
    }

    /// Request the capture to stop. Calling it again, or on an idle device, does nothing.
    /// # Errors
    /// Returns [`Error::UnknownDevice`] for a handle this driver never issued
    pub fn stop_acquisition(&mut self, handle: DeviceHandle) -> Result<(), Error> {
        let device = self
            .devices
            .get_mut(&handle)
            .ok_or(Error::UnknownDevice(handle))?;
        device.stop(&mut self.transport);
        Ok(())
    }

    /// # Errors
    /// Returns [`Error::UnknownDevice`] for a handle this driver never issued
    pub fn get_status(&self, handle: DeviceHandle) -> Result<CaptureStatus, Error> {
        Ok(self.device(handle)?.capture_status())
    }

    /// Process every transfer that finished within `timeout`
    pub fn handle_events(&mut self, timeout: Duration) {
        for completion in self.transport.poll_completions(timeout) {
            match self.devices.get_mut(&completion.token.device) {
                Some(device) => {
                    device.on_completion(&mut self.transport, &mut self.session, completion);
                }
                None => {
                    warn!(token = ?completion.token, "Completion for an unknown device");
                    self.transport.release_buffer(completion.buffer);
                }
            }
        }
    }

    /// The periodic status poll registered with the session
    /// # Errors
    /// Returns [`Error::UnknownDevice`] for a handle this driver never issued
    pub fn poll_status(&mut self, handle: DeviceHandle) -> Result<(), Error> {
        self.handle_events(Duration::ZERO);
        let device = self
            .devices
            .get_mut(&handle)
            .ok_or(Error::UnknownDevice(handle))?;
        device.poll_status(&mut self.transport, &mut self.session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        acquisition::State,
        core::{
            mhz,
            DeviceStatus,
            UsbSpeed,
            TRANSFER_POOL_SIZE,
        },
        session::{
            PacketStatus,
            Recorded,
            Recorder,
        },
        transport::{
            mock::{
                Mock,
                MockDevice,
            },
            TransferStatus,
        },
        trigger::SIMPLE_STAGE,
    };
    use pxlogic_proto::{
        regs,
        status::StatusBlock,
    };
    use std::{
        fs,
        path::PathBuf,
    };

    const ADDR: UsbAddress = UsbAddress { bus: 3, address: 7 };
    const APP_VERSION: u32 = 0x5690_0027;
    const BLOCK: usize = 4_194_304;

    struct Bench {
        driver: Driver<Mock, Recorder>,
        handle: DeviceHandle,
        dir: PathBuf,
    }

    impl Drop for Bench {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn resources(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pxlogic_driver_{tag}_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("SCI_LOGIC.bin"), vec![0x11u8; 1000]).unwrap();
        fs::write(dir.join("SCI_LOGIC_BL.bin"), vec![0x22u8; 1000]).unwrap();
        fs::write(dir.join("hspi_ddr_RST.bin"), vec![0x33u8; 100]).unwrap();
        fs::write(dir.join("hspi_ddr.bin"), vec![0x44u8; 5000]).unwrap();
        dir
    }

    /// A driver that has scanned one Plus analyzer reporting `version`
    fn bench(tag: &str, version: u32) -> Bench {
        let dir = resources(tag);
        let mut dev = MockDevice::new(ADDR, 0x16C0, 0x05DC, UsbSpeed::Super, version, 2);
        dev.flashed_version = APP_VERSION;
        let settings = Settings {
            resource_dir: dir.clone(),
            ..Default::default()
        };
        let mut driver = Driver::new(Mock::new(vec![dev]), Recorder::default(), settings);
        let handle = driver.scan().unwrap()[0];
        Bench {
            driver,
            handle,
            dir,
        }
    }

    fn opened(tag: &str) -> Bench {
        let mut b = bench(tag, APP_VERSION);
        b.driver.open(b.handle).unwrap();
        b
    }

    fn recorder(b: &Bench) -> &Recorder {
        b.driver.session()
    }

    #[test]
    fn test_scan_and_open() -> anyhow::Result<()> {
        let mut b = bench("open", APP_VERSION);
        assert!(b.driver.scan()?.is_empty());
        let dev = b.driver.device(b.handle)?;
        assert_eq!(dev.status(), DeviceStatus::Inactive);
        assert_eq!(dev.profile().model, "PX-Logic U3 channel 16 Plus");
        b.driver.open(b.handle)?;
        assert_eq!(b.driver.device(b.handle)?.status(), DeviceStatus::Active);
        let mock = b.driver.transport().device(ADDR);
        assert_eq!(mock.claimed, vec![0, 1]);
        assert_eq!(mock.uploads.len(), 2);
        b.driver.close(b.handle)?;
        assert_eq!(b.driver.device(b.handle)?.status(), DeviceStatus::Inactive);
        assert!(!b.driver.transport().device(ADDR).open);
        // The bitstreams survive a reopen
        b.driver.open(b.handle)?;
        assert_eq!(b.driver.transport().device(ADDR).uploads.len(), 2);
        Ok(())
    }

    #[test]
    fn test_firmware_update_needs_reopen() -> anyhow::Result<()> {
        let mut b = bench("reopen", 0x5690_0001);
        assert!(matches!(
            b.driver.open(b.handle),
            Err(Error::DeviceNeedsReopen)
        ));
        assert_eq!(
            b.driver.device(b.handle)?.status(),
            DeviceStatus::Initializing
        );
        assert!(matches!(
            b.driver.set_config(b.handle, ConfigKey::Vth, ConfigValue::Double(1.5)),
            Err(Error::DeviceNotReady)
        ));
        b.driver.close(b.handle)?;
        b.driver.open(b.handle)?;
        assert_eq!(b.driver.device(b.handle)?.status(), DeviceStatus::Active);
        Ok(())
    }

    #[test]
    fn test_unknown_handle() {
        let mut b = opened("unknown");
        assert!(matches!(
            b.driver.start_acquisition(DeviceHandle(42)),
            Err(Error::UnknownDevice(DeviceHandle(42)))
        ));
    }

    #[test]
    fn test_config_needs_active() {
        let mut b = bench("inactive", APP_VERSION);
        assert!(matches!(
            b.driver
                .set_config(b.handle, ConfigKey::SampleRate, ConfigValue::Uint(mhz(10))),
            Err(Error::DeviceNotReady)
        ));
        assert!(matches!(
            b.driver.start_acquisition(b.handle),
            Err(Error::DeviceNotReady)
        ));
        // Reading works on a closed device
        assert_eq!(
            b.driver.get_config(b.handle, ConfigKey::SampleRate).unwrap(),
            ConfigValue::Uint(mhz(500))
        );
    }

    #[test]
    fn test_pwm_pushed() -> anyhow::Result<()> {
        let mut b = opened("pwm");
        b.driver
            .set_config(b.handle, ConfigKey::Pwm0Enable, ConfigValue::Bool(true))?;
        b.driver
            .set_config(b.handle, ConfigKey::Pwm0Duty, ConfigValue::Double(25.0))?;
        let mock = b.driver.transport().device(ADDR);
        assert_eq!(mock.writes_to(regs::PWM0_ENABLE), vec![0, 1, 0, 1]);
        assert_eq!(mock.reg(regs::PWM0_PERIOD), Some(124_999));
        assert_eq!(mock.reg(regs::PWM0_DUTY), Some(31_249));
        assert!(mock.writes_to(regs::PWM1_ENABLE).is_empty());
        Ok(())
    }

    #[test]
    fn test_end_to_end() -> anyhow::Result<()> {
        let mut b = opened("e2e");
        b.driver.set_config(
            b.handle,
            ConfigKey::LimitSamples,
            ConfigValue::Uint(1_000_000),
        )?;
        assert_eq!(
            b.driver.get_config(b.handle, ConfigKey::LimitSamples)?,
            ConfigValue::Uint(1_000_000)
        );
        b.driver.start_acquisition(b.handle)?;
        assert_eq!(b.driver.transport().in_flight(), TRANSFER_POOL_SIZE);
        assert_eq!(
            b.driver.transport().in_flight_endpoints()[0],
            (ADDR, regs::EP_DATA_IN)
        );
        assert_eq!(
            recorder(&b).event_sources,
            vec![(b.handle, Duration::from_millis(100))]
        );
        let mock = b.driver.transport().device(ADDR);
        assert_eq!(
            mock.reg(regs::LIMIT_BYTES_LO),
            Some(2_000_000 + 4_194_304)
        );
        assert_eq!(mock.reg(regs::BLOCK_SIZE), Some(4_194_304));
        assert!(matches!(
            b.driver
                .set_config(b.handle, ConfigKey::SampleRate, ConfigValue::Uint(mhz(10))),
            Err(Error::DeviceNotReady)
        ));

        for _ in 0..3 {
            b.driver.transport_mut().complete_next(BLOCK);
        }
        b.driver.handle_events(Duration::ZERO);
        // The first block alone crosses the limit
        let acq = b.driver.device(b.handle)?.acquisition();
        assert_eq!(acq.samples(), 1_000_000);
        assert_eq!(acq.state(), State::Draining);
        assert_eq!(recorder(&b).sample_bytes(b.handle), 2_000_000);
        assert_eq!(
            b.driver.get_status(b.handle)?,
            CaptureStatus {
                trigger_hit: true,
                captured: 1_000_000,
                block_size: 4_194_304,
            }
        );

        b.driver.handle_events(Duration::ZERO);
        let rec = recorder(&b);
        assert_eq!(rec.packets.first(), Some(&(b.handle, Recorded::Header)));
        assert_eq!(rec.ends(b.handle), 1);
        assert_eq!(rec.last(), Some(&Recorded::EndOfStream(PacketStatus::Ok)));
        assert!(rec.event_sources.is_empty());
        assert_eq!(b.driver.device(b.handle)?.acquisition().state(), State::Idle);
        let mock = b.driver.transport();
        assert_eq!(mock.in_flight(), 0);
        assert_eq!(mock.allocations, mock.releases);
        Ok(())
    }

    #[test]
    fn test_many_blocks() -> anyhow::Result<()> {
        let mut b = opened("blocks");
        b.driver
            .set_config(b.handle, ConfigKey::SampleRate, ConfigValue::Uint(mhz(1)))?;
        b.driver
            .set_config(b.handle, ConfigKey::LimitSamples, ConfigValue::Uint(100_000))?;
        b.driver.start_acquisition(b.handle)?;
        let block = 65_536;
        assert_eq!(b.driver.get_status(b.handle)?.block_size, block as u64);
        for _ in 0..4 {
            b.driver.transport_mut().complete_next(block);
            b.driver.handle_events(Duration::ZERO);
        }
        b.driver.handle_events(Duration::ZERO);
        // 100_000 rounds up to 100_032 samples, two bytes each
        assert_eq!(recorder(&b).sample_bytes(b.handle), 200_064);
        assert_eq!(b.driver.device(b.handle)?.acquisition().samples(), 100_032);
        assert_eq!(recorder(&b).ends(b.handle), 1);
        let mock = b.driver.transport();
        assert_eq!(mock.allocations, mock.releases);
        Ok(())
    }

    #[test]
    fn test_start_then_stop() -> anyhow::Result<()> {
        let mut b = opened("stop");
        b.driver.start_acquisition(b.handle)?;
        b.driver.stop_acquisition(b.handle)?;
        b.driver.stop_acquisition(b.handle)?;
        b.driver.handle_events(Duration::ZERO);
        let rec = recorder(&b);
        assert_eq!(rec.ends(b.handle), 1);
        assert_eq!(rec.sample_bytes(b.handle), 0);
        let mock = b.driver.transport();
        assert_eq!(mock.in_flight(), 0);
        assert_eq!(mock.allocations, TRANSFER_POOL_SIZE);
        assert_eq!(mock.releases, TRANSFER_POOL_SIZE);
        // And it can go again
        b.driver.start_acquisition(b.handle)?;
        assert_eq!(b.driver.transport().in_flight(), TRANSFER_POOL_SIZE);
        Ok(())
    }

    #[test]
    fn test_unplugged() -> anyhow::Result<()> {
        let mut b = opened("unplug");
        b.driver.start_acquisition(b.handle)?;
        b.driver.transport_mut().complete_next(4096);
        b.driver
            .transport_mut()
            .fail_all(TransferStatus::NoDevice);
        b.driver.handle_events(Duration::ZERO);
        b.driver.handle_events(Duration::ZERO);
        let rec = recorder(&b);
        assert_eq!(rec.sample_bytes(b.handle), 4096);
        assert_eq!(rec.ends(b.handle), 1);
        assert_eq!(rec.last(), Some(&Recorded::EndOfStream(PacketStatus::Error)));
        let mock = b.driver.transport();
        assert_eq!(mock.allocations, mock.releases);
        Ok(())
    }

    #[test]
    fn test_close_while_streaming() -> anyhow::Result<()> {
        let mut b = opened("close");
        b.driver.start_acquisition(b.handle)?;
        b.driver.close(b.handle)?;
        assert_eq!(recorder(&b).ends(b.handle), 1);
        assert_eq!(b.driver.device(b.handle)?.status(), DeviceStatus::Inactive);
        let mock = b.driver.transport();
        assert_eq!(mock.allocations, mock.releases);
        assert_eq!(mock.device(ADDR).released, regs::INTERFACES);
        Ok(())
    }

    #[test]
    fn test_close_after_capture_releases_interfaces() -> anyhow::Result<()> {
        let mut b = opened("release");
        b.driver
            .set_config(b.handle, ConfigKey::LimitSamples, ConfigValue::Uint(1024))?;
        b.driver.start_acquisition(b.handle)?;
        b.driver.transport_mut().complete_next(BLOCK);
        b.driver.handle_events(Duration::ZERO);
        b.driver.handle_events(Duration::ZERO);
        assert!(!b.driver.device(b.handle)?.acquisition().is_running());
        assert_eq!(recorder(&b).ends(b.handle), 1);
        b.driver.close(b.handle)?;
        let mock = b.driver.transport().device(ADDR);
        assert_eq!(mock.released, regs::INTERFACES);
        assert!(mock.claimed.is_empty());
        assert!(!mock.open);
        Ok(())
    }

    #[test]
    fn test_trigger_report() -> anyhow::Result<()> {
        let mut b = opened("trigger");
        let mut trigger = TriggerSpec::default();
        trigger.set_stage(SIMPLE_STAGE, "R")?;
        trigger.percent = 50;
        b.driver.set_trigger(b.handle, trigger)?;
        b.driver
            .set_config(b.handle, ConfigKey::LimitSamples, ConfigValue::Uint(1_000_000))?;
        b.driver.start_acquisition(b.handle)?;
        assert_eq!(
            b.driver.get_config(b.handle, ConfigKey::TriggerPositionSet)?,
            ConfigValue::Uint(500_000)
        );
        assert_eq!(
            b.driver.transport().device(ADDR).reg(regs::TRIGGER_RISE),
            Some(1)
        );
        b.driver.transport_mut().device_mut(ADDR).status = StatusBlock {
            sync_cur_sample: 700_000,
            trig_out_validset: 1,
            real_pos: 500_032,
        };
        b.driver.poll_status(b.handle)?;
        assert_eq!(
            b.driver.get_config(b.handle, ConfigKey::TriggerPositionSet)?,
            ConfigValue::Uint(500_032)
        );
        assert_eq!(
            recorder(&b).last(),
            Some(&Recorded::TriggerPosition {
                real_pos: 500_032,
                status: 1
            })
        );
        assert!(b.driver.get_status(b.handle)?.trigger_hit);
        Ok(())
    }

    #[test]
    fn test_option_names() -> anyhow::Result<()> {
        let b = bench("options", APP_VERSION);
        assert_eq!(
            b.driver.option_code(ConfigKey::OperationMode, "Stream Mode")?,
            1
        );
        let modes = b.driver.list_config(b.handle, ConfigKey::ChannelMode)?;
        assert_eq!(modes.len(), 1);
        Ok(())
    }
}
