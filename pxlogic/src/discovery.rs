//! Finding PX Logic devices on the bus and matching each to its [`Profile`]

use crate::{
    core::UsbSpeed,
    error::Error,
    profile::{
        self,
        Profile,
    },
    transport::{
        DeviceBus,
        UsbAddress,
        UsbDeviceInfo,
        UsbTransport,
    },
};
use pxlogic_proto::{
    read_register,
    regs,
};
use tracing::debug;

/// Manufacturer strings of genuine devices start with this
pub const MANUFACTURER_PREFIX: &str = "PX";

/// An identified, not yet opened, device
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub info: UsbDeviceInfo,
    pub profile: &'static Profile,
}

/// Enumerate the bus and identify every supported device not listed in `known`.
/// Devices that can't be identified are skipped.
/// # Errors
/// Returns an error only if enumeration itself fails
pub fn scan<T>(transport: &mut T, known: &[UsbAddress]) -> Result<Vec<Candidate>, Error>
where
    T: UsbTransport + ?Sized,
{
    let mut found = vec![];
    for info in transport.devices()? {
        if !profile::is_supported_usb_id(info.vendor_id, info.product_id) {
            continue;
        }
        if !matches!(info.speed, UsbSpeed::High | UsbSpeed::Super) {
            debug!(addr = %info.addr, "Skipping device at {}", info.speed.name());
            continue;
        }
        if known.contains(&info.addr) {
            continue;
        }
        match identify(transport, &info) {
            Ok(Some(profile)) => {
                debug!(addr = %info.addr, "Found {}", profile.model);
                found.push(Candidate { info, profile });
            }
            Ok(None) => (),
            Err(e) => debug!(addr = %info.addr, "Could not identify device: {e}"),
        }
    }
    Ok(found)
}

/// Open the device just long enough to read its logic mode. The device is closed again whatever
/// the outcome.
fn identify<T>(transport: &mut T, info: &UsbDeviceInfo) -> Result<Option<&'static Profile>, Error>
where
    T: UsbTransport + ?Sized,
{
    transport.open(info.addr)?;
    let result = probe(transport, info);
    for iface in regs::INTERFACES {
        // Claiming may have failed part way
        let _ = transport.release_interface(info.addr, iface);
    }
    transport.close(info.addr);
    result
}

fn probe<T>(transport: &mut T, info: &UsbDeviceInfo) -> Result<Option<&'static Profile>, Error>
where
    T: UsbTransport + ?Sized,
{
    for iface in regs::INTERFACES {
        transport.claim_interface(info.addr, iface)?;
    }
    let manufacturer = transport.manufacturer(info.addr)?;
    if !manufacturer.starts_with(MANUFACTURER_PREFIX) {
        debug!(addr = %info.addr, "Not a PX device: {manufacturer:?}");
        return Ok(None);
    }
    let logic_mode = read_register(&mut DeviceBus::new(transport, info.addr), regs::MODE_ID)?;
    let found = profile::find(info.vendor_id, info.product_id, info.speed, logic_mode);
    if found.is_none() {
        debug!(addr = %info.addr, "No profile for logic mode {logic_mode}");
    }
    Ok(found)
}
