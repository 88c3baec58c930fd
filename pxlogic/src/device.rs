//! One connected analyzer: its identity, configuration and capture state

use crate::{
    acquisition::{
        self,
        Acquisition,
        CaptureStatus,
        Plan,
    },
    config::{
        Applied,
        ConfigKey,
        ConfigValue,
        DeviceConfig,
    },
    core::{
        DeviceHandle,
        DeviceStatus,
        Lang,
    },
    error::Error,
    profile::Profile,
    provision::{
        LoadedBitstreams,
        Provisioner,
    },
    session::Session,
    transport::{
        Completion,
        DeviceBus,
        UsbAddress,
        UsbDeviceInfo,
        UsbTransport,
    },
    trigger::TriggerSpec,
};
use pxlogic_proto::{
    regs,
    write_register,
};
use std::time::Duration;
use tracing::{
    info,
    warn,
};

/// The driver's state for one discovered device
#[derive(Debug)]
pub struct Device {
    handle: DeviceHandle,
    info: UsbDeviceInfo,
    status: DeviceStatus,
    config: DeviceConfig,
    acquisition: Acquisition,
    /// Bitstreams loaded by this process, kept across reopens
    loaded: Option<LoadedBitstreams>,
}

impl Device {
    /// A closed device with its profile's default configuration
    /// # Errors
    /// Returns an error if the profile's default channel mode is unknown
    pub fn new(
        handle: DeviceHandle,
        info: UsbDeviceInfo,
        profile: &'static Profile,
        lang: Lang,
    ) -> Result<Self, Error> {
        Ok(Self {
            handle,
            info,
            status: DeviceStatus::Inactive,
            config: DeviceConfig::new(profile, info.speed, lang)?,
            acquisition: Acquisition::new(handle),
            loaded: None,
        })
    }

    #[must_use]
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    #[must_use]
    pub fn addr(&self) -> UsbAddress {
        self.info.addr
    }

    #[must_use]
    pub fn profile(&self) -> &'static Profile {
        self.config.profile
    }

    #[must_use]
    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    #[must_use]
    pub fn acquisition(&self) -> &Acquisition {
        &self.acquisition
    }

    fn ensure_active(&self) -> Result<(), Error> {
        if self.status == DeviceStatus::Active {
            Ok(())
        } else {
            Err(Error::DeviceNotReady)
        }
    }

    fn ensure_idle(&self) -> Result<(), Error> {
        self.ensure_active()?;
        if self.acquisition.is_running() {
            Err(Error::DeviceNotReady)
        } else {
            Ok(())
        }
    }

    /// Open the device, claim its interfaces and provision it
    /// # Errors
    /// Returns [`Error::DeviceNeedsReopen`] after a firmware update, leaving the device
    /// `Initializing`. Any other failure leaves it closed.
    pub fn open<T>(&mut self, transport: &mut T, provisioner: &Provisioner) -> Result<(), Error>
    where
        T: UsbTransport + ?Sized,
    {
        if self.status == DeviceStatus::Active {
            return Ok(());
        }
        if self.status == DeviceStatus::Initializing {
            self.release(transport);
        }
        let addr = self.addr();
        transport.open(addr)?;
        match self.bring_up(transport, provisioner) {
            Ok(()) => {
                self.status = DeviceStatus::Active;
                info!(device = %self.handle, %addr, "Opened {}", self.config.profile.model);
                Ok(())
            }
            Err(Error::DeviceNeedsReopen) => {
                self.status = DeviceStatus::Initializing;
                info!(device = %self.handle, "Firmware updated, waiting for reopen");
                Err(Error::DeviceNeedsReopen)
            }
            Err(e) => {
                self.release(transport);
                Err(e)
            }
        }
    }

    fn bring_up<T>(&mut self, transport: &mut T, provisioner: &Provisioner) -> Result<(), Error>
    where
        T: UsbTransport + ?Sized,
    {
        let addr = self.addr();
        for iface in regs::INTERFACES {
            transport.claim_interface(addr, iface)?;
        }
        provisioner.run(
            &mut DeviceBus::new(transport, addr),
            self.config.profile,
            &mut self.loaded,
        )
    }

    /// Give the USB device back
    /// # Errors
    /// Returns [`Error::DeviceNotReady`] while a capture is still running or draining
    pub fn close<T>(&mut self, transport: &mut T) -> Result<(), Error>
    where
        T: UsbTransport + ?Sized,
    {
        if self.acquisition.is_running() {
            return Err(Error::DeviceNotReady);
        }
        if self.status != DeviceStatus::Inactive {
            self.release(transport);
            info!(device = %self.handle, "Closed");
        }
        Ok(())
    }

    fn release<T>(&mut self, transport: &mut T)
    where
        T: UsbTransport + ?Sized,
    {
        let addr = self.addr();
        for iface in regs::INTERFACES {
            if let Err(e) = transport.release_interface(addr, iface) {
                warn!(device = %self.handle, "Releasing interface {iface}: {e}");
            }
        }
        transport.close(addr);
        self.status = DeviceStatus::Inactive;
    }

    /// # Errors
    /// Returns [`Error::Unsupported`] for keys without a value
    pub fn get_config(&self, key: ConfigKey) -> Result<ConfigValue, Error> {
        self.config.get(key)
    }

    /// Store a configuration value and apply its side effects on the hardware
    /// # Errors
    /// Returns [`Error::DeviceNotReady`] unless the device is active, and for keys tied to the
    /// capture while one is running. Bad keys and values are [`Error::Unsupported`].
    pub fn set_config<T>(
        &mut self,
        transport: &mut T,
        key: ConfigKey,
        value: &ConfigValue,
    ) -> Result<(), Error>
    where
        T: UsbTransport + ?Sized,
    {
        self.ensure_active()?;
        if key.is_acquisition_tied() && self.acquisition.is_running() {
            return Err(Error::DeviceNotReady);
        }
        match self.config.set(key, value)? {
            Applied::Stored => (),
            Applied::ResetCounter => self.acquisition.reset_counter(),
            Applied::PushPwm(i) => {
                let mut bus = DeviceBus::new(transport, self.addr());
                for (addr, value) in self.config.pwm[i].register_writes(i) {
                    write_register(&mut bus, addr, value)?;
                }
            }
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`Error::Unsupported`] for keys without a list
    pub fn list_config(&self, key: ConfigKey) -> Result<Vec<ConfigValue>, Error> {
        self.config.list(key)
    }

    /// Replace the trigger configuration
    /// # Errors
    /// Returns [`Error::DeviceNotReady`] while capturing or closed
    pub fn set_trigger(&mut self, trigger: TriggerSpec) -> Result<(), Error> {
        self.ensure_idle()?;
        self.config.trigger = trigger;
        Ok(())
    }

    /// # Errors
    /// Returns [`Error::DeviceNotReady`] while capturing or closed, or [`Error::Unsupported`]
    /// for a probe the channel mode doesn't have
    pub fn set_channel_enabled(&mut self, index: u16, enabled: bool) -> Result<(), Error> {
        self.ensure_idle()?;
        self.config.set_channel_enabled(index, enabled)
    }

    /// Program the hardware and start streaming
    /// # Errors
    /// Returns [`Error::DeviceNotReady`] unless active and idle, [`Error::Unsupported`] with no
    /// channels enabled, or the first failure while programming, allocating or submitting
    pub fn start<T, S>(
        &mut self,
        transport: &mut T,
        session: &mut S,
        poll_interval: Duration,
    ) -> Result<(), Error>
    where
        T: UsbTransport + ?Sized,
        S: Session + ?Sized,
    {
        self.ensure_idle()?;
        let plan = Plan::new(&self.config)?;
        let addr = self.addr();
        acquisition::program(&mut DeviceBus::new(transport, addr), &self.config, &plan)?;
        self.config.trigger_pos_set = plan.trigger_pos;
        info!(
            device = %self.handle,
            "Starting at {} Hz on {} channels, limit {} samples",
            self.config.samplerate,
            plan.ch_num,
            plan.limit_samples
        );
        self.acquisition.arm(plan);
        session.register_event_source(self.handle, poll_interval);
        if let Err(e) = self.acquisition.submit(transport, addr, session) {
            if !self.acquisition.is_running() {
                session.remove_event_source(self.handle);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Request the capture to stop. The end of stream follows once every transfer is back.
    pub fn stop<T>(&mut self, transport: &mut T)
    where
        T: UsbTransport + ?Sized,
    {
        if self.acquisition.is_running() {
            info!(device = %self.handle, "Stopping");
            self.acquisition.abort(transport);
        }
    }

    #[must_use]
    pub fn capture_status(&self) -> CaptureStatus {
        self.acquisition.status()
    }

    pub(crate) fn on_completion<T, S>(
        &mut self,
        transport: &mut T,
        session: &mut S,
        completion: Completion,
    ) where
        T: UsbTransport + ?Sized,
        S: Session + ?Sized,
    {
        let addr = self.addr();
        self.acquisition
            .on_completion(transport, addr, session, completion);
    }

    /// Refresh the capture status from the hardware
    pub fn poll_status<T, S>(&mut self, transport: &mut T, session: &mut S)
    where
        T: UsbTransport + ?Sized,
        S: Session + ?Sized,
    {
        if self.status != DeviceStatus::Active {
            warn!(device = %self.handle, "Status poll on a device that isn't active");
            return;
        }
        let addr = self.addr();
        if let Some(pos) = self
            .acquisition
            .poll_status(&mut DeviceBus::new(transport, addr), session)
        {
            self.config.trigger_pos_set = pos;
        }
    }
}
