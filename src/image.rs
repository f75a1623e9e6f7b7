//! Raw binary flash images.

use std::convert::TryFrom;
use std::fs;
use std::path::Path;

use crate::protocol::FLASH_SIZE;
use crate::Error;

/// Load a raw binary image, rejecting files larger than flash
pub fn load<P: AsRef<Path>, E: core::fmt::Debug>(path: P) -> Result<Vec<u8>, Error<E>> {
    let path = path.as_ref();

    let len = fs::metadata(path).map_err(|e| Error::Io(e.kind()))?.len();
    check_file_size(len)?;

    let data = fs::read(path).map_err(|e| Error::Io(e.kind()))?;
    check_size(data.len())?;

    debug!("Loaded {} bytes from {}", data.len(), path.display());

    Ok(data)
}

/// Check a file of `len` bytes fits in flash, without truncating on 32-bit hosts
fn check_file_size<E: core::fmt::Debug>(len: u64) -> Result<(), Error<E>> {
    if len > FLASH_SIZE as u64 {
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        return Err(Error::FileTooLarge { len, max: FLASH_SIZE });
    }
    Ok(())
}

/// Check an image of `len` bytes fits in flash
pub fn check_size<E: core::fmt::Debug>(len: usize) -> Result<(), Error<E>> {
    if len > FLASH_SIZE {
        return Err(Error::FileTooLarge { len, max: FLASH_SIZE });
    }
    Ok(())
}
