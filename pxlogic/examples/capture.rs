//! In this example, we will find the first PX Logic analyzer, bring it up, and write one million
//! samples of all 16 channels to `capture.bin`.

use pxlogic::prelude::*;
use std::{
    fs::File,
    io::{
        BufWriter,
        Write,
    },
    time::Duration,
};

/// A session that writes sample data straight to a file
struct ToFile {
    out: BufWriter<File>,
    done: bool,
}

impl Session for ToFile {
    fn forward_packet(&mut self, _device: DeviceHandle, packet: Packet<'_>) {
        match packet {
            Packet::SampleData { bytes, .. } => {
                if let Err(e) = self.out.write_all(bytes) {
                    eprintln!("Write failed: {e}");
                }
            }
            Packet::EndOfStream { status } => {
                println!("Capture ended: {status:?}");
                self.done = true;
            }
            _ => (),
        }
    }

    fn register_event_source(&mut self, _device: DeviceHandle, _interval: Duration) {}

    fn remove_event_source(&mut self, _device: DeviceHandle) {}
}

fn main() -> anyhow::Result<()> {
    let session = ToFile {
        out: BufWriter::new(File::create("capture.bin")?),
        done: false,
    };
    let mut driver = Driver::new(Usb::new()?, session, Settings::load(None)?);
    let Some(mut handle) = driver.scan()?.first().copied() else {
        anyhow::bail!("No PX Logic device found");
    };
    // A fresh device gets its firmware first and has to be opened twice
    match driver.open(handle) {
        Err(Error::DeviceNeedsReopen) => {
            driver.close(handle)?;
            std::thread::sleep(Duration::from_secs(2));
            // It may come back at a new address
            handle = driver.scan()?.first().copied().unwrap_or(handle);
            driver.open(handle)?;
        }
        r => r?,
    }
    println!("Opened {}", driver.device(handle)?.profile().model);

    driver.set_config(handle, ConfigKey::SampleRate, ConfigValue::Uint(100_000_000))?;
    driver.set_config(handle, ConfigKey::LimitSamples, ConfigValue::Uint(1_000_000))?;
    driver.start_acquisition(handle)?;
    while !driver.session().done {
        driver.handle_events(Duration::from_millis(100));
        driver.poll_status(handle)?;
    }
    let status = driver.get_status(handle)?;
    println!("Captured {} samples", status.captured);
    driver.close(handle)?;
    Ok(())
}
