//! Byte-level IO backends for segment and count files.
//!
//! A backend is a pre-sized byte page addressed by explicit offsets; it
//! knows nothing about record framing. Two variants exist: plain positional
//! file IO and a shared read-write memory mapping.

pub mod file;
pub mod mmap;

pub use file::FileIo;
pub use mmap::MmapIo;

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::config::IoType;
use crate::error::{Error, Result};

/// Positional IO over a pre-sized file.
pub trait IoBackend: Send + Sync {
    /// Write `buf` at `offset`, returning the number of bytes written.
    fn write(&self, buf: &[u8], offset: i64) -> Result<usize>;

    /// Fill `buf` from `offset`, returning the number of bytes read.
    fn read(&self, buf: &mut [u8], offset: i64) -> Result<usize>;

    /// Flush written data to stable storage.
    fn sync(&self) -> Result<()>;

    /// Flush and release the backing resources. The file stays on disk.
    fn close(&self) -> Result<()>;

    /// Release the backing resources and unlink the file.
    fn delete(&self) -> Result<()>;
}

/// Open the backend variant selected by `io_type`.
pub fn open_backend(path: &Path, size: i64, io_type: IoType) -> Result<Box<dyn IoBackend>> {
    match io_type {
        IoType::FileIo => Ok(Box::new(FileIo::open(path, size)?)),
        IoType::Mmap => Ok(Box::new(MmapIo::open(path, size)?)),
    }
}

/// Open (or create) `path` and grow it to at least `size` bytes.
pub(crate) fn open_sized(path: &Path, size: i64) -> Result<File> {
    if size <= 0 {
        return Err(Error::InvalidInput(
            "file size can't be zero or negative".to_string(),
        ));
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    if (file.metadata()?.len() as i64) < size {
        file.set_len(size as u64)?;
    }
    Ok(file)
}
