//! Space reclamation.
//!
//! A merge scans an immutable segment with a high dead-bytes fraction and
//! rewrites every record that is still the current copy of its key through
//! the normal write path, then deletes the segment and frees its
//! accounting slot. Records that are tombstones, expired, or superseded
//! (the locator has moved on) are simply dropped.
//!
//! Crashing mid-merge is harmless: the old segment is deleted only after
//! the scan, so replay on the next startup sees either the old copy, the
//! new one, or both, and the newest always wins.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use tracing::{error, info, warn};

use crate::db::{unix_now, Db, DbInner};
use crate::error::{Error, Result};
use crate::index::{fingerprint, KeyTree};
use crate::keys::{decode_hash_key, decode_list_key, decode_zset_key};
use crate::segment::record::{LogRecord, RecordKind};
use crate::segment::Shape;

impl Db {
    /// Merge every candidate segment of `shape` right now, using the
    /// configured ratio. Refuses while another merge is in flight.
    pub fn merge_shape(&self, shape: Shape) -> Result<()> {
        if self.inner.merges_running.load(Ordering::SeqCst) > 0 {
            return Err(Error::MergeRunning);
        }
        self.inner.merge(shape, None, self.inner.config.merge_ratio)
    }

    /// Merge one specific segment of `shape`, provided it qualifies under
    /// `ratio`. Refuses while another merge is in flight.
    pub fn merge_segment(&self, shape: Shape, segment_id: u32, ratio: f64) -> Result<()> {
        if self.inner.merges_running.load(Ordering::SeqCst) > 0 {
            return Err(Error::MergeRunning);
        }
        self.inner.merge(shape, Some(segment_id), ratio)
    }
}

/// Decrements the in-flight merge counter on every exit path.
struct MergeGuard<'a>(&'a AtomicI32);

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DbInner {
    pub(crate) fn merge(&self, shape: Shape, specified: Option<u32>, ratio: f64) -> Result<()> {
        self.merges_running.fetch_add(1, Ordering::SeqCst);
        let _guard = MergeGuard(&self.merges_running);

        let active = match self.files.read()?.get(shape).active.clone() {
            Some(active) => active,
            None => return Ok(()),
        };

        let counts = self.counts.get(shape);
        counts.sync()?;
        let candidates = counts.candidates(active.id, ratio)?;

        for segment_id in candidates {
            if let Some(only) = specified {
                if only != segment_id {
                    continue;
                }
            }
            // Only immutable segments are merged; the active one never is
            let Some(immutable) = self
                .files
                .read()?
                .get(shape)
                .immutables
                .get(&segment_id)
                .cloned()
            else {
                continue;
            };

            let mut offset = 0i64;
            loop {
                let (record, size) = match immutable.read_record(offset) {
                    Ok(read) => read,
                    Err(Error::EndOfSegment) | Err(Error::Eof) => break,
                    Err(e) => return Err(e),
                };

                let expired = record.expires_at != 0 && record.expires_at <= unix_now();
                if record.kind != RecordKind::Delete && !expired {
                    self.rewrite(shape, segment_id, offset, size as u32, &record)?;
                }
                offset += size;
            }

            {
                let mut files = self.files.write()?;
                files.get_mut(shape).immutables.remove(&segment_id);
                if let Err(e) = immutable.delete() {
                    error!(shape = %shape, segment_id, error = %e, "failed to delete merged segment");
                }
            }
            counts.clear(segment_id)?;
            info!(shape = %shape, segment_id, "merged segment reclaimed");
        }
        Ok(())
    }

    /// Re-append `record` if it is still the current copy of its key,
    /// resolving the key through the shape's own index and lock.
    fn rewrite(
        &self,
        shape: Shape,
        segment_id: u32,
        offset: i64,
        size: u32,
        record: &LogRecord,
    ) -> Result<()> {
        match shape {
            Shape::String => {
                let index = self.str_index.write()?;
                self.rewrite_record(&index.tree, &record.key, shape, segment_id, offset, size, record)
            }
            Shape::List => {
                let index = self.list_index.write()?;
                let tree_key = if record.kind == RecordKind::ListSeq {
                    record.key.clone()
                } else {
                    match decode_list_key(&record.key) {
                        Some((key, _)) => key,
                        None => return Ok(()),
                    }
                };
                match index.trees.get(&tree_key) {
                    Some(tree) => self.rewrite_record(
                        tree,
                        &record.key,
                        shape,
                        segment_id,
                        offset,
                        size,
                        record,
                    ),
                    None => Ok(()),
                }
            }
            Shape::Hash => {
                let index = self.hash_index.write()?;
                let Some((tree_key, field)) = decode_hash_key(&record.key) else {
                    return Ok(());
                };
                match index.trees.get(&tree_key) {
                    Some(tree) => {
                        self.rewrite_record(tree, &field, shape, segment_id, offset, size, record)
                    }
                    None => Ok(()),
                }
            }
            Shape::Set => {
                let index = self.set_index.write()?;
                match index.trees.get(&record.key) {
                    Some(tree) => self.rewrite_record(
                        tree,
                        &fingerprint(&record.value),
                        shape,
                        segment_id,
                        offset,
                        size,
                        record,
                    ),
                    None => Ok(()),
                }
            }
            Shape::ZSet => {
                let index = self.zset_index.write()?;
                let Some((tree_key, _)) = decode_zset_key(&record.key) else {
                    return Ok(());
                };
                match index.trees.get(&tree_key) {
                    Some(tree) => self.rewrite_record(
                        tree,
                        &fingerprint(&record.value),
                        shape,
                        segment_id,
                        offset,
                        size,
                        record,
                    ),
                    None => Ok(()),
                }
            }
        }
    }

    /// The index holds the newest locator for every key. Rewrite only when
    /// it still points exactly at this record and the record is unexpired;
    /// anything else is garbage the merge is reclaiming. The rewrite sends
    /// no dead-bytes update, because the superseded location is in the
    /// segment being discarded.
    #[allow(clippy::too_many_arguments)]
    fn rewrite_record(
        &self,
        tree: &KeyTree,
        index_key: &[u8],
        shape: Shape,
        segment_id: u32,
        offset: i64,
        size: u32,
        record: &LogRecord,
    ) -> Result<()> {
        let Some(current) = tree.get(index_key) else {
            return Ok(());
        };
        let unexpired = current.expires_at == 0 || current.expires_at > unix_now();
        if current.segment_id == segment_id
            && current.offset == offset
            && current.size == size
            && unexpired
        {
            let locator = self.write_log_record(record, shape)?;
            self.update_index(tree, index_key, locator, &record.value, false, shape);
        }
        Ok(())
    }
}

/// Start the periodic merge thread. Returns None when the interval is
/// zero (disabled). The loop exits on the shutdown channel, when the
/// database is gone, or when a termination signal arrives.
pub(crate) fn spawn_merge_loop(inner: &Arc<DbInner>) -> Option<(Sender<()>, JoinHandle<()>)> {
    let interval = inner.config.merge_interval;
    if interval.is_zero() {
        return None;
    }
    let ratio = inner.config.merge_ratio;
    let weak: Weak<DbInner> = Arc::downgrade(inner);
    let (tx, rx) = mpsc::channel::<()>();

    let term = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM, SIGHUP, SIGQUIT] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&term)) {
            warn!(signal, error = %e, "failed to register termination signal");
        }
    }

    let worker = std::thread::Builder::new()
        .name("merge-ticker".to_string())
        .spawn(move || loop {
            match rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if term.load(Ordering::Relaxed) {
                info!("termination signal received, stopping merge loop");
                break;
            }
            let Some(db) = weak.upgrade() else { break };

            let running = db.merges_running.load(Ordering::SeqCst);
            if running > 0 {
                warn!(running, "merges still in flight, skipping this cycle");
                continue;
            }

            // One worker per shape; they never contend on locks
            let workers: Vec<_> = Shape::ALL
                .into_iter()
                .map(|shape| {
                    let db = Arc::clone(&db);
                    std::thread::spawn(move || {
                        if let Err(e) = db.merge(shape, None, ratio) {
                            error!(shape = %shape, error = %e, "periodic merge failed");
                        }
                    })
                })
                .collect();
            for worker in workers {
                let _ = worker.join();
            }
        });

    match worker {
        Ok(handle) => Some((tx, handle)),
        Err(e) => {
            error!(error = %e, "failed to spawn merge loop");
            None
        }
    }
}
