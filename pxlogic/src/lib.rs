//! # pxlogic
//!
//! A host driver for the PX Logic family of USB logic analyzers.
//!
//! The [`Driver`] finds analyzers on the bus, brings their firmware and FPGA up to date, keeps
//! their sampling configuration, and streams captured samples to a [`session::Session`].
//! USB access goes through the [`transport::UsbTransport`] trait: [`transport::usb::Usb`] talks to
//! real hardware through libusb, [`transport::mock::Mock`] simulates it.
//!
//! ```no_run
//! use pxlogic::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = Settings::load(None)?;
//! let mut driver = Driver::new(Usb::new()?, Recorder::default(), settings);
//! for handle in driver.scan()? {
//!     driver.open(handle)?;
//!     driver.set_config(handle, ConfigKey::LimitSamples, ConfigValue::Uint(1_000_000))?;
//!     driver.start_acquisition(handle)?;
//!     while driver.get_status(handle)?.captured < 1_000_000 {
//!         driver.handle_events(Duration::from_millis(100));
//!         driver.poll_status(handle)?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod acquisition;
pub mod channel_mode;
pub mod config;
pub mod core;
pub mod device;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod prelude;
pub mod profile;
pub mod provision;
pub mod registers;
pub mod session;
pub mod settings;
pub mod timing;
pub mod transport;
pub mod trigger;

pub use driver::Driver;
pub use error::Error;
pub use settings::Settings;
