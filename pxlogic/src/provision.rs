//! Bringing a freshly opened device up to a known state: current microcontroller firmware, then
//! the FPGA configured with the reset and main bitstreams.

use crate::{
    error::Error,
    profile::Profile,
    settings::Settings,
};
use indicatif::ProgressBar;
use pxlogic_proto::{
    read_register,
    regs::{
        self,
        UploadMode,
    },
    upload_image,
    write_register,
    Bus,
};
use pxlogic_utils::{
    images::{
        bin,
        ImageSource,
        BITSTREAM_ALIGN,
        FIRMWARE_ALIGN,
    },
    resources::ResourceDir,
};
use tracing::{
    debug,
    info,
};

/// Flash offset of the bootloader
pub const BOOTLOADER_BASE: u32 = 0;
/// The bootloader region holds this many identical copies
pub const BOOTLOADER_COPIES: usize = 3;
/// Flash offset the microcontroller boots the application from
pub const APP_FLASH_BASE: u32 = 48 * 1024;
/// Bitstreams are written straight into the FPGA configuration port
pub const BITSTREAM_BASE: u32 = 0;

/// Identity of the bitstream pair last loaded into a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedBitstreams {
    pub reset: [u8; 16],
    pub main: [u8; 16],
}

/// Where images come from and what provisioning may do
#[derive(Debug, Clone)]
pub struct Provisioner {
    resources: ResourceDir,
    bootloader_reflash: bool,
    show_progress: bool,
}

impl Provisioner {
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            resources: ResourceDir::new(&settings.resource_dir),
            bootloader_reflash: settings.bootloader_reflash,
            show_progress: settings.show_progress,
        }
    }

    /// Bring the device on `bus` up to date.
    ///
    /// `loaded` is what this process last loaded into the device's FPGA. It is updated here and
    /// lets a reopen skip the bitstream upload.
    /// # Errors
    /// Returns [`Error::DeviceNeedsReopen`] after a firmware update, or any error from reading
    /// images or talking to the device. Nothing is rolled back on failure.
    pub fn run<B>(
        &self,
        bus: &mut B,
        profile: &Profile,
        loaded: &mut Option<LoadedBitstreams>,
    ) -> Result<(), Error>
    where
        B: Bus + ?Sized,
    {
        let version = read_register(bus, regs::FIRMWARE_VERSION)?;
        info!(
            "Firmware version {version:#x}, expected {:#x}",
            profile.firmware_version
        );
        if version == profile.bootloader_version && self.bootloader_reflash {
            self.flash_bootloader(bus, profile)?;
        }
        if version != profile.firmware_version {
            self.flash_application(bus, profile)?;
            *loaded = None;
            return Err(Error::DeviceNeedsReopen);
        }
        self.configure_fpga(bus, profile, loaded)
    }

    fn flash_bootloader<B>(&self, bus: &mut B, profile: &Profile) -> Result<(), Error>
    where
        B: Bus + ?Sized,
    {
        let image = self.resources.load(profile.bootloader, FIRMWARE_ALIGN)?;
        let len = image.payload.len() * BOOTLOADER_COPIES;
        let mut region = Vec::new();
        region
            .try_reserve_exact(len)
            .map_err(|_| Error::AllocationFailed(len))?;
        for _ in 0..BOOTLOADER_COPIES {
            region.extend_from_slice(image.payload());
        }
        info!("Writing bootloader {} ({} bytes)", profile.bootloader, image.len);
        upload_image(bus, BOOTLOADER_BASE, UploadMode::McuFlash, &region)?;
        Ok(())
    }

    fn flash_application<B>(&self, bus: &mut B, profile: &Profile) -> Result<(), Error>
    where
        B: Bus + ?Sized,
    {
        let image = self.resources.load(profile.firmware, FIRMWARE_ALIGN)?;
        info!("Writing firmware {} ({} bytes)", profile.firmware, image.len);
        upload_image(bus, APP_FLASH_BASE, UploadMode::McuFlash, image.payload())?;
        info!("Resetting the USB controller");
        write_register(bus, regs::RESET, 0)?;
        Ok(())
    }

    fn configure_fpga<B>(
        &self,
        bus: &mut B,
        profile: &Profile,
        loaded: &mut Option<LoadedBitstreams>,
    ) -> Result<(), Error>
    where
        B: Bus + ?Sized,
    {
        let reset = self.resources.load(profile.bitstream_rst, BITSTREAM_ALIGN)?;
        let main = self.resources.load(profile.bitstream, BITSTREAM_ALIGN)?;
        let wanted = LoadedBitstreams {
            reset: *reset.md5(),
            main: *main.md5(),
        };
        if loaded.as_ref() == Some(&wanted) {
            debug!("Bitstream {} already loaded", main.md5_string());
            return Ok(());
        }
        let bar = if self.show_progress {
            ProgressBar::new((reset.payload.len() + main.payload.len()) as u64)
        } else {
            ProgressBar::hidden()
        };
        for image in [&reset, &main] {
            bar.set_message(image.filename.to_string_lossy().into_owned());
            Self::upload_bitstream(bus, image)?;
            bar.inc(image.payload.len() as u64);
        }
        bar.finish_and_clear();
        *loaded = Some(wanted);
        Ok(())
    }

    fn upload_bitstream<B>(bus: &mut B, image: &bin::File) -> Result<(), Error>
    where
        B: Bus + ?Sized,
    {
        info!(
            "Configuring FPGA with {:?} ({} bytes, md5 {})",
            image.filename,
            image.len,
            image.md5_string()
        );
        upload_image(bus, BITSTREAM_BASE, UploadMode::FpgaConfig, image.payload())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::UsbSpeed,
        profile,
        transport::{
            mock::{
                Mock,
                MockDevice,
            },
            DeviceBus,
            UsbAddress,
            UsbTransport,
        },
    };
    use std::{
        fs,
        path::PathBuf,
    };

    const ADDR: UsbAddress = UsbAddress { bus: 2, address: 9 };
    const APP_VERSION: u32 = 0x5690_0027;
    const BL_VERSION: u32 = 0x5690_0000;

    fn resources(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pxlogic_provision_{tag}_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("SCI_LOGIC.bin"), vec![0x11u8; 40_000]).unwrap();
        fs::write(dir.join("SCI_LOGIC_BL.bin"), vec![0x22u8; 1000]).unwrap();
        fs::write(dir.join("hspi_ddr_RST.bin"), vec![0x33u8; 100]).unwrap();
        fs::write(dir.join("hspi_ddr.bin"), vec![0x44u8; 5000]).unwrap();
        dir
    }

    fn setup(tag: &str, version: u32, reflash: bool) -> (Mock, Provisioner, PathBuf) {
        let dir = resources(tag);
        let mut dev = MockDevice::new(ADDR, 0x16C0, 0x05DC, UsbSpeed::Super, version, 2);
        dev.flashed_version = APP_VERSION;
        let mut mock = Mock::new(vec![dev]);
        mock.open(ADDR).unwrap();
        let settings = Settings {
            resource_dir: dir.clone(),
            bootloader_reflash: reflash,
            ..Default::default()
        };
        (mock, Provisioner::new(&settings), dir)
    }

    fn plus() -> &'static Profile {
        profile::find(0x16C0, 0x05DC, UsbSpeed::Super, 2).unwrap()
    }

    #[test]
    fn test_current_firmware() {
        let (mut mock, prov, dir) = setup("current", APP_VERSION, false);
        let mut loaded = None;
        prov.run(&mut DeviceBus::new(&mut mock, ADDR), plus(), &mut loaded)
            .unwrap();
        let dev = mock.device(ADDR);
        assert_eq!(dev.uploads.len(), 2);
        assert_eq!(dev.uploads[0].mode, Some(UploadMode::FpgaConfig));
        assert_eq!(dev.uploads[0].data.len(), 4096);
        assert_eq!(dev.uploads[0].data[0], 0x33);
        assert_eq!(dev.uploads[1].data.len(), 8192);
        assert_eq!(dev.uploads[1].data[4999], 0x44);
        assert_eq!(dev.uploads[1].data[5000], 0xFF);
        assert!(loaded.is_some());

        // A second open with the same images skips the FPGA
        prov.run(&mut DeviceBus::new(&mut mock, ADDR), plus(), &mut loaded)
            .unwrap();
        assert_eq!(mock.device(ADDR).uploads.len(), 2);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_stale_firmware() {
        let (mut mock, prov, dir) = setup("stale", 0x5690_0001, false);
        let mut loaded = Some(LoadedBitstreams {
            reset: [0; 16],
            main: [0; 16],
        });
        let err = prov
            .run(&mut DeviceBus::new(&mut mock, ADDR), plus(), &mut loaded)
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNeedsReopen));
        assert!(loaded.is_none());
        let dev = mock.device(ADDR);
        assert_eq!(dev.uploads.len(), 1);
        assert_eq!(dev.uploads[0].base, APP_FLASH_BASE);
        assert_eq!(dev.uploads[0].mode, Some(UploadMode::McuFlash));
        assert_eq!(dev.uploads[0].data.len(), 64 * 1024);
        assert_eq!(dev.writes_to(regs::RESET), vec![0]);
        assert_eq!(dev.reg(regs::FIRMWARE_VERSION), Some(APP_VERSION));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_bootloader_reflash() {
        let (mut mock, prov, dir) = setup("bootloader", BL_VERSION, true);
        let err = prov
            .run(&mut DeviceBus::new(&mut mock, ADDR), plus(), &mut None)
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNeedsReopen));
        let dev = mock.device(ADDR);
        assert_eq!(dev.uploads.len(), 2);
        assert_eq!(dev.uploads[0].base, BOOTLOADER_BASE);
        assert_eq!(dev.uploads[0].data.len(), 3 * 32 * 1024);
        assert_eq!(dev.uploads[0].data[32 * 1024], 0x22);
        assert_eq!(dev.uploads[0].data[32 * 1024 + 1000], 0xFF);
        assert_eq!(dev.uploads[1].base, APP_FLASH_BASE);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_bootloader_left_alone() {
        let (mut mock, prov, dir) = setup("no_bootloader", BL_VERSION, false);
        assert!(prov
            .run(&mut DeviceBus::new(&mut mock, ADDR), plus(), &mut None)
            .is_err());
        let dev = mock.device(ADDR);
        assert_eq!(dev.uploads.len(), 1);
        assert_eq!(dev.uploads[0].base, APP_FLASH_BASE);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_image() {
        let (mut mock, prov, dir) = setup("missing", APP_VERSION, false);
        fs::remove_file(dir.join("hspi_ddr.bin")).unwrap();
        let err = prov
            .run(&mut DeviceBus::new(&mut mock, ADDR), plus(), &mut None)
            .unwrap_err();
        assert!(matches!(err, Error::FirmwareNotFound(p) if p.ends_with("hspi_ddr.bin")));
        assert!(mock.device(ADDR).uploads.is_empty());
        fs::remove_dir_all(dir).unwrap();
    }
}
