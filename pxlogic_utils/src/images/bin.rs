//! Raw binary images as shipped next to the driver (`SCI_LOGIC.bin`, `hspi_ddr.bin`, ...).
//! Files may be gzip-compressed; they are inflated before padding.

use super::{
    align_up,
    ImageSource,
    FILL,
};
use flate2::bufread::GzDecoder;
use std::{
    ffi::OsString,
    io::{
        ErrorKind,
        Read,
    },
    path::{
        Path,
        PathBuf,
    },
};
use thiserror::Error;

const GZIP_MAGIC: [u8; 3] = [0x1F, 0x8B, 0x08];

#[derive(Debug, PartialEq, Eq)]
pub struct File {
    /// Image bytes padded with [`FILL`] to the requested alignment
    pub payload: Vec<u8>,
    /// Length of the image before padding
    pub len: usize,
    pub md5: [u8; 16],
    pub filename: OsString,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Image file {0} not found")]
    NotFound(PathBuf),
    #[error("Could not allocate {0} bytes for an image")]
    Allocation(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ImageSource for File {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn md5(&self) -> &[u8; 16] {
        &self.md5
    }
}

/// Inflate `contents` if it carries the gzip magic, otherwise hand it back untouched
fn inflate(contents: Vec<u8>) -> Result<Vec<u8>, Error> {
    if contents.len() < GZIP_MAGIC.len() || contents[..3] != GZIP_MAGIC {
        return Ok(contents);
    }
    let mut z = GzDecoder::new(&contents[..]);
    let mut decompressed = vec![];
    z.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// Pad `image` with [`FILL`] up to a multiple of `align`
/// # Errors
/// Returns an error if the padded buffer can't be allocated
pub fn pad(mut image: Vec<u8>, align: usize) -> Result<Vec<u8>, Error> {
    let padded = align_up(image.len(), align);
    image
        .try_reserve_exact(padded - image.len())
        .map_err(|_| Error::Allocation(padded))?;
    image.resize(padded, FILL);
    Ok(image)
}

/// Build an image from bytes already in memory
/// # Errors
/// Returns an error if the bytes are gzipped but corrupt, or on allocation failure
pub fn from_bytes(contents: Vec<u8>, align: usize, filename: OsString) -> Result<File, Error> {
    let md5 = md5::compute(&contents);
    let image = inflate(contents)?;
    let len = image.len();
    Ok(File {
        payload: pad(image, align)?,
        len,
        md5: md5.into(),
        filename,
    })
}

/// Reads an image file, padding it to `align` bytes
/// # Errors
/// Returns [`Error::NotFound`] if the file doesn't exist, other errors on read failure
pub fn read_bin_file<T>(filename: T, align: usize) -> Result<File, Error>
where
    T: AsRef<Path>,
{
    let path = filename.as_ref();
    let contents = std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::NotFound(path.to_owned()),
        _ => Error::Io(e),
    })?;
    let name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    from_bytes(contents, align, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::BITSTREAM_ALIGN;
    use flate2::{
        write::GzEncoder,
        Compression,
    };
    use std::io::Write;

    #[test]
    fn test_padding() {
        let file = from_bytes(vec![0xDE, 0xAD, 0xBE, 0xEF], BITSTREAM_ALIGN, "x.bin".into()).unwrap();
        assert_eq!(file.len, 4);
        assert_eq!(file.payload.len(), 4096);
        assert_eq!(&file.payload[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(file.payload[4..].iter().all(|&b| b == FILL));
    }

    #[test]
    fn test_aligned_untouched() {
        let file = from_bytes(vec![0u8; 8192], BITSTREAM_ALIGN, "y.bin".into()).unwrap();
        assert_eq!(file.payload, vec![0u8; 8192]);
    }

    #[test]
    fn test_gzip() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&[1, 2, 3, 4, 5]).unwrap();
        let gz = enc.finish().unwrap();
        let plain_md5: [u8; 16] = md5::compute(&gz).into();
        let file = from_bytes(gz, 16, "z.bin.gz".into()).unwrap();
        assert_eq!(file.len, 5);
        assert_eq!(&file.payload[..6], &[1, 2, 3, 4, 5, FILL]);
        assert_eq!(file.md5, plain_md5);
    }

    #[test]
    fn test_md5_string() {
        let file = from_bytes(Vec::new(), 1, "empty".into()).unwrap();
        assert_eq!(file.md5_string(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_missing() {
        let missing = std::env::temp_dir().join("pxlogic_utils_definitely_missing.bin");
        assert!(matches!(
            read_bin_file(&missing, 1),
            Err(Error::NotFound(p)) if p == missing
        ));
    }
}
