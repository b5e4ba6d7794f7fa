use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Advisory whole-directory lock, held for the lifetime of an open handle.
///
/// The lock file contains the process ID for debugging purposes.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Creates a new FileLock and locks the file. Fails immediately if
    /// another process already holds the lock.
    pub fn lock<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Create the file if it doesn't exist, or open it if it does
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Self::try_lock(&file)?;

        // Write process ID to the lock file for debugging
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // Fallback for other platforms - just succeed
        Ok(())
    }

    /// Manually release the lock.
    /// Note: The lock is automatically released when the FileLock is dropped.
    pub fn unlock(self) -> io::Result<()> {
        // The file will be unlocked automatically when dropped
        // We don't remove the lock file to avoid race conditions
        Ok(())
    }

    /// Get the path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // The OS releases the lock when the descriptor is closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_and_unlock() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let lock_path = dir.path().join("FLOCK");

        // Acquire the lock.
        let lock = FileLock::lock(&lock_path).expect("Failed to acquire lock");

        // Ensure the lock file now exists and contains process ID
        assert!(lock_path.exists());
        let content = std::fs::read_to_string(&lock_path).expect("Failed to read lock file");
        assert!(content.contains(&std::process::id().to_string()));

        // Unlock (file remains but lock is released)
        lock.unlock().expect("Failed to release lock");
    }

    #[test]
    fn test_double_lock() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let lock_path = dir.path().join("FLOCK");

        // Acquire the first lock.
        let _lock1 = FileLock::lock(&lock_path).expect("Failed to acquire first lock");

        // Attempt to acquire a second lock on the same file.
        let lock2 = FileLock::lock(&lock_path);
        assert!(lock2.is_err());
    }

    #[test]
    fn test_auto_unlock_on_drop() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let lock_path = dir.path().join("FLOCK");

        {
            let _lock = FileLock::lock(&lock_path).expect("Failed to acquire lock");
            assert!(lock_path.exists());
        }

        // After the lock goes out of scope, we should be able to acquire it
        // again (proving the lock was released even though the file remains)
        let _lock2 = FileLock::lock(&lock_path).expect("Should be able to acquire lock after drop");
    }
}
