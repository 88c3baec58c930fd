//! The application side of an acquisition: where sample packets go and who drives the status poll

use crate::core::DeviceHandle;
use std::time::Duration;

/// How an acquisition ended
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketStatus {
    Ok,
    /// The capture stopped early because of a device fault
    Error,
}

/// Layout of sample bytes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SampleFormat {
    /// Runs of 64 samples per enabled channel, one bit per sample, channels in ascending order
    CrossData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
    /// Sent once when transfers start flowing
    Header,
    /// Raw logic samples
    SampleData {
        format: SampleFormat,
        bytes: &'a [u8],
    },
    /// Where the hardware actually triggered
    TriggerPosition {
        check_id: u32,
        real_pos: u32,
        ram_start_addr: u32,
        remaining_count: u32,
        status: u32,
    },
    EndOfStream { status: PacketStatus },
}

/// The collaborator receiving acquisition output. Every call happens on the thread driving
/// [`crate::driver::Driver::handle_events`].
pub trait Session {
    fn forward_packet(&mut self, device: DeviceHandle, packet: Packet<'_>);

    /// Ask the host to call [`crate::driver::Driver::poll_status`] every `interval`
    fn register_event_source(&mut self, device: DeviceHandle, interval: Duration);

    fn remove_event_source(&mut self, device: DeviceHandle);
}

/// An owned copy of a [`Packet`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Header,
    SampleData(Vec<u8>),
    TriggerPosition { real_pos: u32, status: u32 },
    EndOfStream(PacketStatus),
}

/// A session that keeps everything it is sent
#[derive(Debug, Default)]
pub struct Recorder {
    pub packets: Vec<(DeviceHandle, Recorded)>,
    /// Devices with a live event source and their interval
    pub event_sources: Vec<(DeviceHandle, Duration)>,
}

impl Recorder {
    /// Total sample bytes forwarded for `device`
    #[must_use]
    pub fn sample_bytes(&self, device: DeviceHandle) -> usize {
        self.packets
            .iter()
            .filter(|(d, _)| *d == device)
            .map(|(_, p)| match p {
                Recorded::SampleData(bytes) => bytes.len(),
                _ => 0,
            })
            .sum()
    }

    /// Number of end-of-stream packets sent for `device`
    #[must_use]
    pub fn ends(&self, device: DeviceHandle) -> usize {
        self.packets
            .iter()
            .filter(|(d, p)| *d == device && matches!(p, Recorded::EndOfStream(_)))
            .count()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Recorded> {
        self.packets.last().map(|(_, p)| p)
    }
}

impl Session for Recorder {
    fn forward_packet(&mut self, device: DeviceHandle, packet: Packet<'_>) {
        let owned = match packet {
            Packet::Header => Recorded::Header,
            Packet::SampleData { bytes, .. } => Recorded::SampleData(bytes.to_vec()),
            Packet::TriggerPosition {
                real_pos, status, ..
            } => Recorded::TriggerPosition { real_pos, status },
            Packet::EndOfStream { status } => Recorded::EndOfStream(status),
        };
        self.packets.push((device, owned));
    }

    fn register_event_source(&mut self, device: DeviceHandle, interval: Duration) {
        self.event_sources.retain(|(d, _)| *d != device);
        self.event_sources.push((device, interval));
    }

    fn remove_event_source(&mut self, device: DeviceHandle) {
        self.event_sources.retain(|(d, _)| *d != device);
    }
}
