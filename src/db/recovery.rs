//! Startup: segment discovery and index replay.
//!
//! Every file matching `log.<shape>.<digits>` is opened; per shape, the
//! highest id becomes the active segment and the rest are immutable. One
//! worker per shape then walks its segments in id order from offset 0,
//! applying each record to the shape's index (delete on tombstone or
//! expired, insert otherwise) until the all-zero terminator or the end of
//! the file. The active segment's append offset resumes at the terminator.

use std::str;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{Config, StoreMode};
use crate::db::{unix_now, DbInner, PerShape, ShapeFiles};
use crate::error::{Error, Result};
use crate::index::{fingerprint, tree_for, Locator};
use crate::keys::{decode_hash_key, decode_list_key, decode_zset_key};
use crate::segment::record::{LogRecord, RecordKind};
use crate::segment::{self, Segment, Shape};
use crate::zset::parse_score;

/// Scan the database directory and open every segment, ordered by id per
/// shape, splitting them into active (highest id) and immutable.
pub(crate) fn load_segments(config: &Config) -> Result<(PerShape<ShapeFiles>, PerShape<Vec<u32>>)> {
    let mut ids: PerShape<Vec<u32>> = PerShape::try_from_fn(|_| Ok(Vec::new()))?;

    for entry in std::fs::read_dir(&config.path)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((shape, id)) = segment::parse_file_name(name) {
            ids.get_mut(shape).push(id);
        }
    }

    let mut files: PerShape<ShapeFiles> = PerShape::try_from_fn(|_| Ok(ShapeFiles::default()))?;
    for shape in Shape::ALL {
        let list = ids.get_mut(shape);
        // Lower ids were created earlier
        list.sort_unstable();

        for (i, &id) in list.iter().enumerate() {
            let segment = Arc::new(Segment::open(
                &config.path,
                shape,
                id,
                config.segment_size_threshold,
                config.io_type,
            )?);
            let slot = files.get_mut(shape);
            if i == list.len() - 1 {
                slot.active = Some(segment);
            } else {
                slot.immutables.insert(id, segment);
            }
        }
        if !list.is_empty() {
            debug!(shape = %shape, segments = list.len(), "segments discovered");
        }
    }
    Ok((files, ids))
}

/// Rebuild every shape's index by replaying its segments, one worker per
/// shape. Any read failure other than reaching the end aborts the open.
pub(crate) fn replay(inner: &DbInner, ids: &PerShape<Vec<u32>>) -> Result<()> {
    std::thread::scope(|scope| {
        let workers: Vec<_> = Shape::ALL
            .into_iter()
            .map(|shape| scope.spawn(move || replay_shape(inner, shape, ids.get(shape))))
            .collect();
        for worker in workers {
            worker
                .join()
                .map_err(|_| Error::Io("replay worker panicked".to_string()))??;
        }
        Ok(())
    })
}

fn replay_shape(inner: &DbInner, shape: Shape, ids: &[u32]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let resident = inner.config.store_mode == StoreMode::Memory;
    let mut count = 0usize;

    match shape {
        Shape::String => {
            let index = inner.str_index.write()?;
            walk_segments(inner, shape, ids, |record, locator| {
                count += 1;
                if dead(&record) {
                    index.tree.remove(&record.key);
                } else {
                    let locator = with_value(locator, &record, resident);
                    index.tree.put(record.key, locator);
                }
                Ok(())
            })?;
        }
        Shape::List => {
            let mut index = inner.list_index.write()?;
            walk_segments(inner, shape, ids, |record, locator| {
                count += 1;
                // Sequence metadata is keyed by the outer key; data entries
                // carry it inside the list key
                let tree_key = if record.kind == RecordKind::ListSeq {
                    record.key.clone()
                } else {
                    decode_list_key(&record.key)
                        .ok_or_else(|| Error::InvalidInput("malformed list key".to_string()))?
                        .0
                };
                let tree = tree_for(&mut index.trees, &tree_key);
                if dead(&record) {
                    tree.remove(&record.key);
                } else {
                    let locator = with_value(locator, &record, resident);
                    tree.put(record.key, locator);
                }
                Ok(())
            })?;
        }
        Shape::Hash => {
            let mut index = inner.hash_index.write()?;
            walk_segments(inner, shape, ids, |record, locator| {
                count += 1;
                let (tree_key, field) = decode_hash_key(&record.key)
                    .ok_or_else(|| Error::InvalidInput("malformed hash key".to_string()))?;
                let tree = tree_for(&mut index.trees, &tree_key);
                if dead(&record) {
                    tree.remove(&field);
                } else {
                    let locator = with_value(locator, &record, resident);
                    tree.put(field, locator);
                }
                Ok(())
            })?;
        }
        Shape::Set => {
            let mut index = inner.set_index.write()?;
            walk_segments(inner, shape, ids, |record, locator| {
                count += 1;
                let tree = tree_for(&mut index.trees, &record.key);
                if dead(&record) {
                    // Set tombstones store the member's fingerprint
                    tree.remove(&record.value);
                } else {
                    let sum = fingerprint(&record.value);
                    let locator = with_value(locator, &record, resident);
                    tree.put(sum, locator);
                }
                Ok(())
            })?;
        }
        Shape::ZSet => {
            let mut index = inner.zset_index.write()?;
            walk_segments(inner, shape, ids, |record, locator| {
                count += 1;
                if dead(&record) {
                    // ZSet tombstones store the raw member, so the ordered
                    // structure can be unwound as well
                    let tree = tree_for(&mut index.trees, &record.key);
                    tree.remove(&fingerprint(&record.value));
                    index.sorted.zrem(&record.key, &record.value);
                } else {
                    let (tree_key, score_bytes) = decode_zset_key(&record.key)
                        .ok_or_else(|| Error::InvalidInput("malformed zset key".to_string()))?;
                    let score = parse_score(
                        str::from_utf8(&score_bytes)
                            .map_err(|_| Error::InvalidInput("malformed score".to_string()))?,
                    )?;
                    index.sorted.zadd(&tree_key, score, &record.value);
                    let sum = fingerprint(&record.value);
                    let tree = tree_for(&mut index.trees, &tree_key);
                    let locator = with_value(locator, &record, resident);
                    tree.put(sum, locator);
                }
                Ok(())
            })?;
        }
    }

    if count > 0 {
        info!(shape = %shape, records = count, "index replayed");
    }
    Ok(())
}

fn dead(record: &LogRecord) -> bool {
    record.kind == RecordKind::Delete
        || (record.expires_at != 0 && record.expires_at < unix_now())
}

fn with_value(mut locator: Locator, record: &LogRecord, resident: bool) -> Locator {
    if resident {
        locator.value = Some(record.value.clone());
    }
    locator
}

/// Walk the shape's segments in id order, applying each record; after the
/// last (active) segment, restore its append offset.
fn walk_segments(
    inner: &DbInner,
    shape: Shape,
    ids: &[u32],
    mut apply: impl FnMut(LogRecord, Locator) -> Result<()>,
) -> Result<()> {
    for (i, &id) in ids.iter().enumerate() {
        let segment = {
            let files = inner.files.read()?;
            let slot = files.get(shape);
            match &slot.active {
                Some(active) if active.id == id => Some(Arc::clone(active)),
                _ => slot.immutables.get(&id).cloned(),
            }
        }
        .ok_or(Error::SegmentNotFound)?;

        let mut offset = 0i64;
        loop {
            match segment.read_record(offset) {
                Ok((record, size)) => {
                    let locator = Locator {
                        segment_id: id,
                        offset,
                        size: size as u32,
                        expires_at: record.expires_at,
                        value: None,
                    };
                    apply(record, locator)?;
                    offset += size;
                }
                Err(Error::EndOfSegment) | Err(Error::Eof) => break,
                Err(e) => return Err(e),
            }
        }

        if i == ids.len() - 1 {
            segment.set_write_offset(offset);
        }
    }
    Ok(())
}
