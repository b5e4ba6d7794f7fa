use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use memmap2::{MmapMut, MmapOptions};

use super::{open_sized, IoBackend};
use crate::error::{Error, Result};

/// Memory-mapped backend: a full-length shared read-write mapping of the
/// pre-sized file. Reads and writes are slice copies; `sync` is a
/// synchronous msync.
pub struct MmapIo {
    file: File,
    map: Mutex<Option<MmapMut>>,
    cap: i64,
    path: PathBuf,
}

impl MmapIo {
    pub fn open(path: &Path, size: i64) -> Result<Self> {
        let file = open_sized(path, size)?;
        // Safety: the mapping stays within the file length set above and the
        // descriptor is held for as long as the mapping lives.
        let map = unsafe { MmapOptions::new().len(size as usize).map_mut(&file)? };
        Ok(Self {
            file,
            map: Mutex::new(Some(map)),
            cap: size,
            path: path.to_path_buf(),
        })
    }
}

impl IoBackend for MmapIo {
    fn write(&self, buf: &[u8], offset: i64) -> Result<usize> {
        let len = buf.len() as i64;
        if len == 0 {
            return Ok(0);
        }
        if offset < 0 || offset + len > self.cap {
            return Err(Error::Eof);
        }
        let mut guard = self.map.lock()?;
        let map = guard.as_mut().ok_or(Error::Eof)?;
        map[offset as usize..(offset + len) as usize].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        let len = buf.len() as i64;
        if offset < 0 || offset + len > self.cap {
            return Err(Error::Eof);
        }
        let guard = self.map.lock()?;
        let map = guard.as_ref().ok_or(Error::Eof)?;
        buf.copy_from_slice(&map[offset as usize..(offset + len) as usize]);
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        let guard = self.map.lock()?;
        if let Some(map) = guard.as_ref() {
            map.flush()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.map.lock()?;
        if let Some(map) = guard.take() {
            map.flush()?;
            // Unmapped on drop; the descriptor is released with self
        }
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        let mut guard = self.map.lock()?;
        guard.take();
        self.file.set_len(0)?;
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_temp_backend(size: i64) -> (tempfile::TempDir, MmapIo) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let io = MmapIo::open(&dir.path().join("data"), size).expect("Failed to open backend");
        (dir, io)
    }

    #[test]
    fn test_write_and_read_at_offset() {
        let (_dir, io) = create_temp_backend(4096);

        io.write(b"hello", 64).expect("Write failed");
        let mut buf = [0u8; 5];
        io.read(&mut buf, 64).expect("Read failed");
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_bounds_are_enforced() {
        let (_dir, io) = create_temp_backend(64);

        assert_eq!(io.write(b"too far", 60), Err(Error::Eof));
        let mut buf = [0u8; 16];
        assert_eq!(io.read(&mut buf, 56), Err(Error::Eof));
    }

    #[test]
    fn test_write_persists_after_close() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("data");

        let io = MmapIo::open(&path, 128).expect("Failed to open backend");
        io.write(b"durable", 0).expect("Write failed");
        io.close().expect("Close failed");

        let reopened = MmapIo::open(&path, 128).expect("Failed to reopen backend");
        let mut buf = [0u8; 7];
        reopened.read(&mut buf, 0).expect("Read failed");
        assert_eq!(&buf, b"durable");
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("data");
        let io = MmapIo::open(&path, 64).expect("Failed to open backend");
        io.delete().expect("Delete failed");
        assert!(!path.exists());
    }
}
