//! Prelude (helpful reexports) for this package

pub use crate::{
    acquisition::CaptureStatus,
    config::{
        ConfigKey,
        ConfigValue,
    },
    core::{
        DeviceHandle,
        DeviceStatus,
        Lang,
    },
    session::{
        Packet,
        PacketStatus,
        Recorder,
        Session,
    },
    transport::{
        usb::Usb,
        UsbTransport,
    },
    trigger::{
        Match,
        TriggerSpec,
        SIMPLE_STAGE,
    },
    Driver,
    Error,
    Settings,
};
