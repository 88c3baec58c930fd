//! The error type returned by every fallible driver operation

use crate::{
    core::DeviceHandle,
    transport,
};
use pxlogic_utils::images::bin;
use std::path::PathBuf;
use thiserror::Error;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    /// Unknown configuration identifier, or a value the device can't take
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// The operation needs an opened, provisioned device that isn't capturing
    #[error("The device is not ready for this operation")]
    DeviceNotReady,
    /// A USB transfer failed
    #[error("USB I/O error")]
    Io(#[source] BoxedError),
    /// The device answered, but not the way the register protocol requires
    #[error("Register protocol error")]
    Protocol(#[source] pxlogic_proto::Error),
    #[error("Firmware image {0} not found")]
    FirmwareNotFound(PathBuf),
    #[error("Could not allocate {0} bytes")]
    AllocationFailed(usize),
    /// New firmware was flashed. Not a failure: close and open the device again.
    #[error("Firmware was updated, the device must be reopened")]
    DeviceNeedsReopen,
    #[error("No device with handle {0}")]
    UnknownDevice(DeviceHandle),
}

impl Error {
    pub(crate) fn unsupported<T: Into<String>>(what: T) -> Self {
        Self::Unsupported(what.into())
    }
}

impl From<transport::Error> for Error {
    fn from(value: transport::Error) -> Self {
        Self::Io(Box::new(value))
    }
}

impl From<pxlogic_proto::Error> for Error {
    fn from(value: pxlogic_proto::Error) -> Self {
        match value {
            pxlogic_proto::Error::Transport(e) => Self::Io(e),
            e => Self::Protocol(e),
        }
    }
}

impl From<bin::Error> for Error {
    fn from(value: bin::Error) -> Self {
        match value {
            bin::Error::NotFound(p) => Self::FirmwareNotFound(p),
            bin::Error::Allocation(n) => Self::AllocationFailed(n),
            bin::Error::Io(e) => Self::Io(Box::new(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proto_mapping() {
        let io: Error = pxlogic_proto::Error::transport(transport::Error::Stall).into();
        assert!(matches!(io, Error::Io(_)));
        let proto: Error = pxlogic_proto::Error::BadAck { addr: 0, echo: 0 }.into();
        assert!(matches!(proto, Error::Protocol(_)));
        let short: Error = pxlogic_proto::Error::Short {
            expected: 16,
            actual: 0,
        }
        .into();
        assert!(matches!(short, Error::Protocol(_)));
    }

    #[test]
    fn test_image_mapping() {
        let missing: Error = bin::Error::NotFound("SCI_LOGIC.bin".into()).into();
        assert!(matches!(missing, Error::FirmwareNotFound(p) if p == PathBuf::from("SCI_LOGIC.bin")));
        let alloc: Error = bin::Error::Allocation(64).into();
        assert!(matches!(alloc, Error::AllocationFailed(64)));
    }
}
