//! Host-side settings of the driver, loaded from a TOML file and `PXLOGIC_*` environment variables

use crate::core::Lang;
use confique::Config;
use std::{
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

#[derive(Config, Debug, Clone, PartialEq)]
pub struct Settings {
    /// Directory holding the firmware and bitstream images
    #[config(env = "PXLOGIC_RESOURCE_DIR", default = "res")]
    pub resource_dir: PathBuf,
    /// Language of option names returned by `list_config`
    #[config(env = "PXLOGIC_LANGUAGE", default = "en")]
    pub language: Lang,
    /// Rewrite the bootloader when a device reports the bootloader version
    #[config(env = "PXLOGIC_BOOTLOADER_REFLASH", default = false)]
    pub bootloader_reflash: bool,
    #[config(env = "PXLOGIC_STATUS_POLL_INTERVAL_MS", default = 100)]
    pub status_poll_interval_ms: u64,
    /// Draw a progress bar during bitstream uploads
    #[config(env = "PXLOGIC_SHOW_PROGRESS", default = false)]
    pub show_progress: bool,
}

impl Settings {
    /// Load settings from the environment layered over `path`, if given, layered over the
    /// defaults
    /// # Errors
    /// Returns an error if the file can't be parsed or a value has the wrong type
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Self::builder().env();
        if let Some(p) = path {
            builder = builder.file(p);
        }
        Ok(builder.load()?)
    }

    #[must_use]
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resource_dir: PathBuf::from("res"),
            language: Lang::En,
            bootloader_reflash: false,
            status_poll_interval_ms: 100,
            show_progress: false,
        }
    }
}
