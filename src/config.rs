use std::path::PathBuf;
use std::time::Duration;

/// Where the value bytes of a live key are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Values are kept in the in-memory index alongside the locator; reads
    /// never touch disk.
    Memory,
    /// Only locators are kept in memory; reads fetch the value from the
    /// segment it was appended to.
    Bitcask,
}

/// IO backend used for segment files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    /// Positional reads and writes against a plain file descriptor.
    FileIo,
    /// A shared read-write memory mapping of the pre-sized file.
    Mmap,
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding segments, count files and the lock file.
    pub path: PathBuf,

    /// Value residency mode (default: Bitcask).
    pub store_mode: StoreMode,

    /// Segment IO backend (default: FileIo).
    pub io_type: IoType,

    /// Fsync after every record append (default: false).
    pub sync_writes: bool,

    /// Cadence of the periodic merge task; zero disables it (default: 8h).
    pub merge_interval: Duration,

    /// Minimum dead-bytes fraction for a segment to become a merge
    /// candidate (default: 0.5).
    pub merge_ratio: f64,

    /// Segment rotation threshold in bytes (default: 512 MiB).
    pub segment_size_threshold: i64,

    /// Capacity of the per-shape dead-bytes update queue (default: 8 Mi).
    pub count_buffer_size: usize,
}

impl Config {
    /// Create a config for the given directory with default settings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store_mode: StoreMode::Bitcask,
            io_type: IoType::FileIo,
            sync_writes: false,
            merge_interval: Duration::from_secs(8 * 60 * 60),
            merge_ratio: 0.5,
            segment_size_threshold: 512 << 20,
            count_buffer_size: 8 << 20,
        }
    }

    /// Set the value residency mode.
    pub fn store_mode(mut self, mode: StoreMode) -> Self {
        self.store_mode = mode;
        self
    }

    /// Set the segment IO backend.
    pub fn io_type(mut self, io_type: IoType) -> Self {
        self.io_type = io_type;
        self
    }

    /// Fsync after every record append.
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Set the periodic merge cadence; zero disables the task.
    pub fn merge_interval(mut self, interval: Duration) -> Self {
        self.merge_interval = interval;
        self
    }

    /// Set the merge candidate dead-bytes ratio.
    pub fn merge_ratio(mut self, ratio: f64) -> Self {
        self.merge_ratio = ratio;
        self
    }

    /// Set the segment rotation threshold in bytes.
    pub fn segment_size_threshold(mut self, threshold: i64) -> Self {
        self.segment_size_threshold = threshold;
        self
    }

    /// Set the dead-bytes update queue capacity.
    pub fn count_buffer_size(mut self, size: usize) -> Self {
        self.count_buffer_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::new("/tmp/emberdb");
        assert_eq!(config.path, PathBuf::from("/tmp/emberdb"));
        assert_eq!(config.store_mode, StoreMode::Bitcask);
        assert_eq!(config.io_type, IoType::FileIo);
        assert!(!config.sync_writes);
        assert_eq!(config.merge_interval, Duration::from_secs(8 * 60 * 60));
        assert_eq!(config.segment_size_threshold, 512 << 20);
        assert_eq!(config.count_buffer_size, 8 << 20);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("/tmp/emberdb")
            .store_mode(StoreMode::Memory)
            .io_type(IoType::Mmap)
            .sync_writes(true)
            .merge_interval(Duration::from_secs(60))
            .merge_ratio(0.3)
            .segment_size_threshold(1 << 20)
            .count_buffer_size(1024);

        assert_eq!(config.store_mode, StoreMode::Memory);
        assert_eq!(config.io_type, IoType::Mmap);
        assert!(config.sync_writes);
        assert_eq!(config.merge_interval, Duration::from_secs(60));
        assert_eq!(config.merge_ratio, 0.3);
        assert_eq!(config.segment_size_threshold, 1 << 20);
        assert_eq!(config.count_buffer_size, 1024);
    }
}
