//! Per-segment space accounting.
//!
//! One fixed-size, memory-mapped file per shape tracks, for every segment
//! id, the segment's total size and how much of it has been superseded.
//! The merge engine reads it to pick candidates. Random-access writes into
//! a page-sized file are what mmap is good at, hence the backend choice.
//!
//! Slot layout, 12 bytes each:
//!
//! ```text
//! +------------+--------------+------------+
//! | segment id | segment size | dead bytes |
//! +------------+--------------+------------+
//! 0------------4--------------8-----------12
//! ```
//!
//! A slot with zero id and zero size is free. Accuracy is advisory:
//! dead-bytes updates arrive over a bounded queue and are dropped with a
//! warning when it overflows, which only delays merging.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::io::{IoBackend, MmapIo};
use crate::segment::Shape;

/// Total accounting file size: 8 KiB, 682 slots.
pub const COUNT_FILE_SIZE: i64 = 2 << 12;

const SLOT_SIZE: i64 = 12;

/// Subdirectory holding the per-shape count files.
pub const COUNT_DIR: &str = "COUNT_FILE";

/// File name of the count file for a shape, e.g. `log.string.count_file`.
pub fn file_name(shape: Shape) -> String {
    format!("log.{}.count_file", shape)
}

/// A dead-bytes update: the superseded record's segment and size.
#[derive(Debug, Clone, Copy)]
pub struct CountUpdate {
    pub segment_id: u32,
    pub record_size: u32,
}

/// The space-accounting file for one shape, plus its background updater.
pub struct CountFile {
    state: Arc<Mutex<SlotState>>,
    tx: Option<SyncSender<CountUpdate>>,
    worker: Option<JoinHandle<()>>,
    dropped: AtomicU64,
}

struct SlotState {
    backend: MmapIo,
    /// segment id -> slot offset
    used: HashMap<u32, i64>,
    /// free slot offsets, used as a stack
    free: Vec<i64>,
}

impl CountFile {
    /// Open (or create) the count file for `shape` under `dir`, rebuild the
    /// slot tables by scanning it, and start the updater worker.
    pub fn open(dir: &Path, shape: Shape, buffer_size: usize) -> Result<CountFile> {
        let backend = MmapIo::open(&dir.join(file_name(shape)), COUNT_FILE_SIZE)?;

        let mut used = HashMap::new();
        let mut free = Vec::new();
        let mut offset = 0;
        while offset + SLOT_SIZE <= COUNT_FILE_SIZE {
            let mut buf = [0u8; 8];
            backend.read(&mut buf, offset)?;
            let segment_id = LittleEndian::read_u32(&buf[..4]);
            let segment_size = LittleEndian::read_u32(&buf[4..8]);
            if segment_id == 0 && segment_size == 0 {
                free.push(offset);
            } else {
                used.insert(segment_id, offset);
            }
            offset += SLOT_SIZE;
        }
        // Pop order matches the scan order of the original free list
        free.reverse();

        let state = Arc::new(Mutex::new(SlotState {
            backend,
            used,
            free,
        }));

        let (tx, rx) = sync_channel(buffer_size);
        let worker_state = Arc::clone(&state);
        let worker = std::thread::Builder::new()
            .name(format!("count-{}", shape))
            .spawn(move || Self::listen(worker_state, rx))
            .map_err(|e| Error::Io(e.to_string()))?;

        Ok(CountFile {
            state,
            tx: Some(tx),
            worker: Some(worker),
            dropped: AtomicU64::new(0),
        })
    }

    fn listen(state: Arc<Mutex<SlotState>>, rx: Receiver<CountUpdate>) {
        // Exits when every sender is gone
        for update in rx {
            let mut state = match state.lock() {
                Ok(state) => state,
                Err(_) => return,
            };
            if let Err(e) = state.add_dead_bytes(update.segment_id, update.record_size) {
                error!(segment_id = update.segment_id, error = %e, "count file update failed");
            }
        }
    }

    /// Queue a dead-bytes update without blocking. Overflow is dropped with
    /// a warning; the dropped count is observable via [`Self::dropped_updates`].
    pub fn push(&self, update: CountUpdate) {
        if update.record_size == 0 {
            return;
        }
        let Some(tx) = self.tx.as_ref() else { return };
        match tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("count update queue full, dropping update");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("count update worker is gone, dropping update");
            }
        }
    }

    /// Updates dropped because the queue was full.
    pub fn dropped_updates(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Initialise the slot for a newly created segment. A no-op if the
    /// segment already has one.
    pub fn set_segment_size(&self, segment_id: u32, segment_size: u32) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.used.contains_key(&segment_id) {
            return Ok(());
        }
        let offset = state.alloc(segment_id)?;

        let mut buf = [0u8; 8];
        LittleEndian::write_u32(&mut buf[..4], segment_id);
        LittleEndian::write_u32(&mut buf[4..8], segment_size);
        state.backend.write(&buf, offset)?;
        Ok(())
    }

    /// Add to the dead-byte count of a segment, in the caller's thread.
    pub fn record_dead_bytes(&self, segment_id: u32, delta: u32) -> Result<()> {
        self.state.lock()?.add_dead_bytes(segment_id, delta)
    }

    /// Segment ids whose dead-byte fraction reaches `ratio`, excluding the
    /// active segment, ascending.
    pub fn candidates(&self, active_segment_id: u32, ratio: f64) -> Result<Vec<u32>> {
        let state = self.state.lock()?;
        let mut out = Vec::new();
        let mut offset = 0;
        while offset + SLOT_SIZE <= COUNT_FILE_SIZE {
            let mut buf = [0u8; 12];
            state.backend.read(&mut buf, offset)?;
            offset += SLOT_SIZE;

            let segment_id = LittleEndian::read_u32(&buf[..4]);
            let segment_size = LittleEndian::read_u32(&buf[4..8]);
            let dead_bytes = LittleEndian::read_u32(&buf[8..12]);

            if segment_size == 0 || dead_bytes == 0 {
                continue;
            }
            if dead_bytes as f64 / segment_size as f64 >= ratio && segment_id != active_segment_id {
                out.push(segment_id);
            }
        }
        // Lower ids are older; merge oldest first
        out.sort_unstable();
        Ok(out)
    }

    /// Zero the slot of a merged-away segment and put it back on the free
    /// stack.
    pub fn clear(&self, segment_id: u32) -> Result<()> {
        let mut state = self.state.lock()?;
        let Some(&offset) = state.used.get(&segment_id) else {
            return Ok(());
        };
        let buf = [0u8; 12];
        state.backend.write(&buf, offset)?;

        state.free.push(offset);
        state.used.remove(&segment_id);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.state.lock()?.backend.sync()
    }
}

impl Drop for CountFile {
    fn drop(&mut self) {
        // Disconnect the channel so the worker drains and exits
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Ok(state) = self.state.lock() {
            let _ = state.backend.close();
        }
    }
}

impl SlotState {
    /// Slot offset for `segment_id`, allocating from the free stack when
    /// the segment has none yet.
    fn alloc(&mut self, segment_id: u32) -> Result<i64> {
        if let Some(&offset) = self.used.get(&segment_id) {
            return Ok(offset);
        }
        let offset = self.free.pop().ok_or(Error::CountFileNoSpace)?;
        self.used.insert(segment_id, offset);
        Ok(offset)
    }

    fn add_dead_bytes(&mut self, segment_id: u32, delta: u32) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        let offset = self.alloc(segment_id)?;

        let mut buf = [0u8; 4];
        self.backend.read(&mut buf, offset + 8)?;
        let dead_bytes = LittleEndian::read_u32(&buf).saturating_add(delta);
        LittleEndian::write_u32(&mut buf, dead_bytes);
        self.backend.write(&buf, offset + 8)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_temp_count_file() -> (tempfile::TempDir, CountFile) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let cf = CountFile::open(dir.path(), Shape::String, 64).expect("Failed to open count file");
        (dir, cf)
    }

    #[test]
    fn test_candidates_by_ratio() {
        let (_dir, cf) = create_temp_count_file();

        cf.set_segment_size(1, 1000).unwrap();
        cf.set_segment_size(2, 1000).unwrap();
        cf.set_segment_size(3, 1000).unwrap();

        cf.record_dead_bytes(1, 600).unwrap();
        cf.record_dead_bytes(2, 100).unwrap();
        cf.record_dead_bytes(3, 900).unwrap();

        // Segment 3 is active and must be excluded
        assert_eq!(cf.candidates(3, 0.5).unwrap(), vec![1]);
        assert_eq!(cf.candidates(0, 0.5).unwrap(), vec![1, 3]);
        assert_eq!(cf.candidates(0, 0.05).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_dead_bytes_accumulate() {
        let (_dir, cf) = create_temp_count_file();

        cf.set_segment_size(1, 100).unwrap();
        cf.record_dead_bytes(1, 30).unwrap();
        cf.record_dead_bytes(1, 30).unwrap();

        assert_eq!(cf.candidates(9, 0.6).unwrap(), vec![1]);
    }

    #[test]
    fn test_clear_frees_slot() {
        let (_dir, cf) = create_temp_count_file();

        cf.set_segment_size(1, 100).unwrap();
        cf.record_dead_bytes(1, 90).unwrap();
        cf.clear(1).unwrap();

        assert!(cf.candidates(9, 0.1).unwrap().is_empty());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        {
            let cf =
                CountFile::open(dir.path(), Shape::String, 64).expect("Failed to open count file");
            cf.set_segment_size(4, 100).unwrap();
            cf.record_dead_bytes(4, 80).unwrap();
            cf.sync().unwrap();
        }

        let cf = CountFile::open(dir.path(), Shape::String, 64).expect("Failed to reopen");
        assert_eq!(cf.candidates(9, 0.5).unwrap(), vec![4]);
        // The rebuilt slot table reuses the existing slot for segment 4
        cf.set_segment_size(4, 100).unwrap();
        cf.record_dead_bytes(4, 10).unwrap();
        assert_eq!(cf.candidates(9, 0.9).unwrap(), vec![4]);
    }

    #[test]
    fn test_queued_updates_apply() {
        let (_dir, cf) = create_temp_count_file();

        cf.set_segment_size(2, 100).unwrap();
        cf.push(CountUpdate {
            segment_id: 2,
            record_size: 70,
        });

        // The worker applies asynchronously; give it a moment
        for _ in 0..100 {
            if cf.candidates(9, 0.5).unwrap() == vec![2] {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("queued update was never applied");
    }

    #[test]
    fn test_slot_exhaustion() {
        let (_dir, cf) = create_temp_count_file();

        let capacity = (COUNT_FILE_SIZE / SLOT_SIZE) as u32;
        for id in 1..=capacity {
            cf.set_segment_size(id, 10).unwrap();
        }
        assert_eq!(
            cf.set_segment_size(capacity + 1, 10),
            Err(Error::CountFileNoSpace)
        );
    }
}
