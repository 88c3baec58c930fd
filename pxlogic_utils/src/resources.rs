//! Lookup of image files in the driver's resource directory

use crate::images::bin::{
    self,
    read_bin_file,
};
use std::path::{
    Path,
    PathBuf,
};

/// A directory holding the firmware and bitstream images
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDir {
    root: PathBuf,
}

impl ResourceDir {
    #[must_use]
    pub fn new<T: Into<PathBuf>>(root: T) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `name`, preferring the plain file over a `.gz` sibling
    /// # Errors
    /// Returns [`bin::Error::NotFound`] if neither exists
    pub fn locate(&self, name: &str) -> Result<PathBuf, bin::Error> {
        let plain = self.root.join(name);
        if plain.is_file() {
            return Ok(plain);
        }
        let gz = self.root.join(format!("{name}.gz"));
        if gz.is_file() {
            return Ok(gz);
        }
        Err(bin::Error::NotFound(plain))
    }

    /// Locate and read `name`, padded to `align`
    /// # Errors
    /// Returns an error if the file is missing or unreadable
    pub fn load(&self, name: &str, align: usize) -> Result<bin::File, bin::Error> {
        read_bin_file(self.locate(name)?, align)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pxlogic_utils_{tag}_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load() {
        let dir = scratch("load");
        fs::write(dir.join("hspi_ddr.bin"), [7u8; 10]).unwrap();
        let res = ResourceDir::new(&dir);
        let file = res.load("hspi_ddr.bin", 4096).unwrap();
        assert_eq!(file.len, 10);
        assert_eq!(file.payload.len(), 4096);
        assert_eq!(file.filename, "hspi_ddr.bin");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing() {
        let dir = scratch("missing");
        let res = ResourceDir::new(&dir);
        assert!(matches!(
            res.load("SCI_LOGIC.bin", 1),
            Err(bin::Error::NotFound(_))
        ));
        fs::remove_dir_all(dir).unwrap();
    }
}
