//! Lists over the log: the outer key maps to a tree holding one `ListSeq`
//! metadata entry (the head/tail sequence pair) plus one data entry per
//! element, keyed by `encode_list_key(key, seq)`. Pushing left decrements
//! the head; pushing right increments the tail; the live length is always
//! `tail - head - 1`.

use byteorder::{ByteOrder, LittleEndian};

use crate::db::{Db, DbInner};
use crate::error::{Error, Result};
use crate::index::{tree_for, KeyTree};
use crate::keys::encode_list_key;
use crate::segment::record::{LogRecord, RecordKind};
use crate::segment::Shape;

/// Fresh lists start in the middle of the sequence space so both ends can
/// grow: head at 2^31, tail right above it.
pub(crate) const INITIAL_LIST_SEQ: u32 = 1 << 31;

impl Db {
    /// Prepend `values` to the list at `key`, leftmost last.
    pub fn lpush(&self, key: &[u8], values: &[&[u8]]) -> Result<()> {
        let mut index = self.inner.list_index.write()?;
        let tree = tree_for(&mut index.trees, key);
        for value in values {
            self.inner.push_list(tree, key, value, true)?;
        }
        Ok(())
    }

    /// Append `values` to the list at `key`.
    pub fn rpush(&self, key: &[u8], values: &[&[u8]]) -> Result<()> {
        let mut index = self.inner.list_index.write()?;
        let tree = tree_for(&mut index.trees, key);
        for value in values {
            self.inner.push_list(tree, key, value, false)?;
        }
        Ok(())
    }

    /// Remove and return the head element, or None when the list is empty.
    pub fn lpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let index = self.inner.list_index.write()?;
        match index.trees.get(key) {
            Some(tree) => self.inner.pop_list(tree, key, true),
            None => Ok(None),
        }
    }

    /// Remove and return the tail element, or None when the list is empty.
    pub fn rpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let index = self.inner.list_index.write()?;
        match index.trees.get(key) {
            Some(tree) => self.inner.pop_list(tree, key, false),
            None => Ok(None),
        }
    }

    /// Number of elements in the list at `key`.
    pub fn llen(&self, key: &[u8]) -> Result<u64> {
        let index = self.inner.list_index.read()?;
        let Some(tree) = index.trees.get(key) else {
            return Ok(0);
        };
        let (head, tail) = self.inner.list_seq(tree, key)?;
        Ok((tail - head - 1) as u64)
    }
}

impl DbInner {
    /// The list's `(head, tail)` sequence pair, defaulting to the initial
    /// values for a list with no metadata record.
    pub(crate) fn list_seq(&self, tree: &KeyTree, key: &[u8]) -> Result<(u32, u32)> {
        match self.get_val(tree, key, Shape::List) {
            Ok(value) if value.len() >= 8 => Ok((
                LittleEndian::read_u32(&value[..4]),
                LittleEndian::read_u32(&value[4..8]),
            )),
            Ok(_) => Err(Error::InvalidInput(
                "malformed list sequence record".to_string(),
            )),
            Err(Error::KeyNotFound) => Ok((INITIAL_LIST_SEQ, INITIAL_LIST_SEQ + 1)),
            Err(e) => Err(e),
        }
    }

    /// Persist the `(head, tail)` pair as the list's metadata record.
    fn write_list_seq(&self, tree: &KeyTree, key: &[u8], head: u32, tail: u32) -> Result<()> {
        let mut buf = vec![0u8; 8];
        LittleEndian::write_u32(&mut buf[..4], head);
        LittleEndian::write_u32(&mut buf[4..8], tail);

        let record = LogRecord {
            key: key.to_vec(),
            value: buf,
            kind: RecordKind::ListSeq,
            ..Default::default()
        };
        let locator = self.write_log_record(&record, Shape::List)?;
        self.update_index(tree, key, locator, &record.value, true, Shape::List);
        Ok(())
    }

    fn push_list(&self, tree: &KeyTree, key: &[u8], value: &[u8], left: bool) -> Result<()> {
        let (mut head, mut tail) = self.list_seq(tree, key)?;

        let seq = if left { head } else { tail };
        let list_key = encode_list_key(key, seq);

        let record = LogRecord {
            key: list_key.clone(),
            value: value.to_vec(),
            ..Default::default()
        };
        let locator = self.write_log_record(&record, Shape::List)?;
        self.update_index(tree, &list_key, locator, value, true, Shape::List);

        if left {
            head -= 1;
        } else {
            tail += 1;
        }
        self.write_list_seq(tree, key, head, tail)
    }

    fn pop_list(&self, tree: &KeyTree, key: &[u8], left: bool) -> Result<Option<Vec<u8>>> {
        let (mut head, mut tail) = self.list_seq(tree, key)?;

        if tail - head - 1 == 0 {
            // Empty: reset drifted counters so the sequence space recentres
            if head != INITIAL_LIST_SEQ || tail != INITIAL_LIST_SEQ + 1 {
                self.write_list_seq(tree, key, INITIAL_LIST_SEQ, INITIAL_LIST_SEQ + 1)?;
            }
            return Ok(None);
        }

        let seq = if left { head + 1 } else { tail - 1 };
        let list_key = encode_list_key(key, seq);
        let value = self.get_val(tree, &list_key, Shape::List)?;

        let record = LogRecord {
            key: list_key.clone(),
            kind: RecordKind::Delete,
            ..Default::default()
        };
        let locator = self.write_log_record(&record, Shape::List)?;

        if left {
            head += 1;
        } else {
            tail -= 1;
        }
        self.write_list_seq(tree, key, head, tail)?;
        self.delete_index(tree, &list_key, &locator, Shape::List);
        Ok(Some(value))
    }
}
