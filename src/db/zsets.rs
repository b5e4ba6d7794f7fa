//! Sorted sets: ordered queries are answered by the in-memory structure
//! (dictionary + skip list per outer key); persistence writes one record
//! per `(member, score)` with `encode_zset_key(key, score_string)` as the
//! record key, indexed by member fingerprint. Tombstones carry the raw
//! member as their value so replay can unwind both the tree and the skip
//! list.

use crate::db::{Db, DbInner};
use crate::error::Result;
use crate::index::{fingerprint, tree_for, ZSetIndex};
use crate::keys::encode_zset_key;
use crate::segment::record::{LogRecord, RecordKind};
use crate::segment::Shape;
use crate::zset::format_score;

impl Db {
    /// Add `member` with `score` to the sorted set at `key`, moving it if
    /// the score changed.
    pub fn zadd(&self, key: &[u8], score: f64, member: &[u8]) -> Result<()> {
        let mut index = self.inner.zset_index.write()?;
        self.inner.zadd_locked(&mut index, key, score, member)
    }

    /// The score of `member`, or None.
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Result<Option<f64>> {
        let index = self.inner.zset_index.read()?;
        Ok(index.sorted.zscore(key, member))
    }

    /// Number of members in the sorted set at `key`.
    pub fn zcard(&self, key: &[u8]) -> Result<usize> {
        let index = self.inner.zset_index.read()?;
        Ok(index.sorted.zcard(key))
    }

    /// 0-based rank of `member`, scores low to high.
    pub fn zrank(&self, key: &[u8], member: &[u8]) -> Result<Option<u64>> {
        let index = self.inner.zset_index.read()?;
        Ok(index.sorted.zrank(key, member))
    }

    /// 0-based rank of `member`, scores high to low.
    pub fn zrevrank(&self, key: &[u8], member: &[u8]) -> Result<Option<u64>> {
        let index = self.inner.zset_index.read()?;
        Ok(index.sorted.zrevrank(key, member))
    }

    /// Add `increment` to the score of `member` (0 when absent), persisting
    /// and returning the new score.
    pub fn zincrby(&self, key: &[u8], increment: f64, member: &[u8]) -> Result<f64> {
        let mut index = self.inner.zset_index.write()?;
        let updated = index.sorted.zscore(key, member).unwrap_or(0.0) + increment;
        self.inner.zadd_locked(&mut index, key, updated, member)?;
        Ok(updated)
    }

    /// Members in rank range `[start, stop]`, scores low to high; negative
    /// indexes count from the end.
    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let index = self.inner.zset_index.read()?;
        Ok(index.sorted.zrange(key, start, stop))
    }

    pub fn zrange_with_scores(
        &self,
        key: &[u8],
        start: i64,
        stop: i64,
    ) -> Result<Vec<(Vec<u8>, f64)>> {
        let index = self.inner.zset_index.read()?;
        Ok(index.sorted.zrange_with_scores(key, start, stop))
    }

    /// Members in rank range `[start, stop]`, scores high to low.
    pub fn zrevrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let index = self.inner.zset_index.read()?;
        Ok(index.sorted.zrevrange(key, start, stop))
    }

    pub fn zrevrange_with_scores(
        &self,
        key: &[u8],
        start: i64,
        stop: i64,
    ) -> Result<Vec<(Vec<u8>, f64)>> {
        let index = self.inner.zset_index.read()?;
        Ok(index.sorted.zrevrange_with_scores(key, start, stop))
    }

    /// Remove `member` from the sorted set at `key`; false when absent.
    pub fn zrem(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let mut index = self.inner.zset_index.write()?;
        if !index.sorted.zrem(key, member) {
            return Ok(false);
        }

        let record = LogRecord {
            key: key.to_vec(),
            value: member.to_vec(),
            kind: RecordKind::Delete,
            ..Default::default()
        };
        let locator = self.inner.write_log_record(&record, Shape::ZSet)?;
        if let Some(tree) = index.trees.get(key) {
            self.inner
                .delete_index(tree, &fingerprint(member), &locator, Shape::ZSet);
        }
        Ok(true)
    }

    /// Members with `min <= score <= max`, low to high.
    pub fn zscore_range(&self, key: &[u8], min: f64, max: f64) -> Result<Vec<(Vec<u8>, f64)>> {
        let index = self.inner.zset_index.read()?;
        Ok(index.sorted.zscore_range(key, min, max))
    }

    /// Members with `min <= score <= max`, high to low.
    pub fn zrev_score_range(&self, key: &[u8], max: f64, min: f64) -> Result<Vec<(Vec<u8>, f64)>> {
        let index = self.inner.zset_index.read()?;
        Ok(index.sorted.zrev_score_range(key, max, min))
    }

    /// Member and score at 0-based `rank`, scores low to high.
    pub fn zget_by_rank(&self, key: &[u8], rank: i64) -> Result<Option<(Vec<u8>, f64)>> {
        let index = self.inner.zset_index.read()?;
        Ok(index.sorted.zget_by_rank(key, rank))
    }

    /// Member and score at 0-based `rank`, scores high to low.
    pub fn zrev_get_by_rank(&self, key: &[u8], rank: i64) -> Result<Option<(Vec<u8>, f64)>> {
        let index = self.inner.zset_index.read()?;
        Ok(index.sorted.zrev_get_by_rank(key, rank))
    }
}

impl DbInner {
    pub(crate) fn zadd_locked(
        &self,
        index: &mut ZSetIndex,
        key: &[u8],
        score: f64,
        member: &[u8],
    ) -> Result<()> {
        let sum = fingerprint(member);

        let record = LogRecord {
            key: encode_zset_key(key, format_score(score).as_bytes()),
            value: member.to_vec(),
            ..Default::default()
        };
        let locator = self.write_log_record(&record, Shape::ZSet)?;

        let tree = tree_for(&mut index.trees, key);
        self.update_index(tree, &sum, locator, member, true, Shape::ZSet);
        index.sorted.zadd(key, score, member);
        Ok(())
    }
}
