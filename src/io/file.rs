use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use super::{open_sized, IoBackend};
use crate::error::{Error, Result};

/// Buffered-file backend: positional reads and writes against a plain
/// descriptor, pre-sized at open.
pub struct FileIo {
    file: File,
    path: PathBuf,
}

impl FileIo {
    pub fn open(path: &Path, size: i64) -> Result<Self> {
        let file = open_sized(path, size)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl IoBackend for FileIo {
    fn write(&self, buf: &[u8], offset: i64) -> Result<usize> {
        self.file.write_all_at(buf, offset as u64)?;
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        match self.file.read_exact_at(buf, offset as u64) {
            Ok(()) => Ok(buf.len()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Error::Eof),
            Err(e) => Err(e.into()),
        }
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        // The descriptor itself is released on drop
        self.sync()
    }

    fn delete(&self) -> Result<()> {
        self.file.set_len(0)?;
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_temp_backend(size: i64) -> (tempfile::TempDir, FileIo) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let io = FileIo::open(&dir.path().join("data"), size).expect("Failed to open backend");
        (dir, io)
    }

    #[test]
    fn test_write_and_read_at_offset() {
        let (_dir, io) = create_temp_backend(4096);

        io.write(b"hello", 0).expect("Write failed");
        io.write(b"world", 100).expect("Write failed");

        let mut buf = [0u8; 5];
        io.read(&mut buf, 100).expect("Read failed");
        assert_eq!(&buf, b"world");

        io.read(&mut buf, 0).expect("Read failed");
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_file_is_presized() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("data");
        let _io = FileIo::open(&path, 8192).expect("Failed to open backend");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8192);
    }

    #[test]
    fn test_read_past_end() {
        let (_dir, io) = create_temp_backend(64);
        let mut buf = [0u8; 32];
        assert_eq!(io.read(&mut buf, 48), Err(Error::Eof));
    }

    #[test]
    fn test_zero_size_rejected() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        assert!(FileIo::open(&dir.path().join("data"), 0).is_err());
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("data");
        let io = FileIo::open(&path, 64).expect("Failed to open backend");
        io.delete().expect("Delete failed");
        assert!(!path.exists());
    }
}
