//! Hashes: the outer key maps to a tree keyed by field. The on-disk record
//! key is the `(key, field)` pair encoding, so replay can reconstruct both
//! halves from the record alone.

use crate::db::Db;
use crate::error::{Error, Result};
use crate::index::tree_for;
use crate::keys::encode_hash_key;
use crate::segment::record::{LogRecord, RecordKind};
use crate::segment::Shape;

impl Db {
    /// Set `field` in the hash at `key` to `value`.
    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<()> {
        let mut index = self.inner.hash_index.write()?;
        let tree = tree_for(&mut index.trees, key);

        let record = LogRecord {
            key: encode_hash_key(key, field),
            value: value.to_vec(),
            ..Default::default()
        };
        let locator = self.inner.write_log_record(&record, Shape::Hash)?;
        self.inner
            .update_index(tree, field, locator, value, true, Shape::Hash);
        Ok(())
    }

    /// The value of `field` in the hash at `key`, or None.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        let index = self.inner.hash_index.read()?;
        let Some(tree) = index.trees.get(key) else {
            return Ok(None);
        };
        match self.inner.get_val(tree, field, Shape::Hash) {
            Ok(value) => Ok(Some(value)),
            Err(Error::KeyNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove `field` from the hash at `key`; false when it was absent.
    pub fn hdel(&self, key: &[u8], field: &[u8]) -> Result<bool> {
        let index = self.inner.hash_index.write()?;
        let Some(tree) = index.trees.get(key) else {
            return Ok(false);
        };
        if tree.get(field).is_none() {
            return Ok(false);
        }

        let record = LogRecord {
            key: encode_hash_key(key, field),
            kind: RecordKind::Delete,
            ..Default::default()
        };
        let locator = self.inner.write_log_record(&record, Shape::Hash)?;
        Ok(self
            .inner
            .delete_index(tree, field, &locator, Shape::Hash))
    }

    /// Does `field` hold a live value in the hash at `key`?
    pub fn hexists(&self, key: &[u8], field: &[u8]) -> Result<bool> {
        let index = self.inner.hash_index.read()?;
        let Some(tree) = index.trees.get(key) else {
            return Ok(false);
        };
        match self.inner.get_val(tree, field, Shape::Hash) {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
