//! Utilities for working with files that provide an uploadable image

pub mod bin;

/// Granularity of the microcontroller flash regions the two firmware images are written to
pub const FIRMWARE_ALIGN: usize = 32 * 1024;
/// DMA granularity of the FPGA configuration path
pub const BITSTREAM_ALIGN: usize = 4 * 1024;
/// Byte used to pad an image out to its alignment, the erased-flash value
pub const FILL: u8 = 0xFF;

/// Anything that can be written through the device upload window must implement
/// [`ImageSource`]. Right now this is just raw binary files, optionally gzipped.
pub trait ImageSource {
    /// The padded bytes, ready to upload
    fn payload(&self) -> &[u8];

    /// A hash identifying the image, used to skip uploading what is already loaded
    fn md5(&self) -> &[u8; 16];

    /// Get a string representation of the MD5 hash
    fn md5_string(&self) -> String {
        self.md5().iter().map(|&v| format!("{v:02x}")).collect()
    }
}

/// Round `len` up to the next multiple of `align`
#[must_use]
pub fn align_up(len: usize, align: usize) -> usize {
    if align == 0 {
        return len;
    }
    len.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, BITSTREAM_ALIGN), 0);
        assert_eq!(align_up(1, BITSTREAM_ALIGN), 4096);
        assert_eq!(align_up(4096, BITSTREAM_ALIGN), 4096);
        assert_eq!(align_up(40_000, FIRMWARE_ALIGN), 65_536);
        assert_eq!(align_up(17, 0), 17);
    }
}
