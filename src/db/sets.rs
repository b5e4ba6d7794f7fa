//! Sets: the outer key maps to a tree keyed by the 128-bit fingerprint of
//! each member; the disk record stores the full member as its value, so the
//! member bytes can always be recovered from the log. Tombstones carry the
//! fingerprint as their value so replay can unwind the index.

use crate::db::{Db, DbInner};
use crate::error::{Error, Result};
use crate::index::{fingerprint, tree_for, KeyTree};
use crate::segment::record::{LogRecord, RecordKind};
use crate::segment::Shape;

impl Db {
    /// Add `members` to the set at `key`; members already present (by
    /// fingerprint) are overwritten in place. Empty members are ignored.
    pub fn sadd(&self, key: &[u8], members: &[&[u8]]) -> Result<()> {
        let mut index = self.inner.set_index.write()?;
        let tree = tree_for(&mut index.trees, key);

        for member in members {
            if member.is_empty() {
                continue;
            }
            let sum = fingerprint(member);

            let record = LogRecord {
                key: key.to_vec(),
                value: member.to_vec(),
                ..Default::default()
            };
            let locator = self.inner.write_log_record(&record, Shape::Set)?;
            self.inner
                .update_index(tree, &sum, locator, member, true, Shape::Set);
        }
        Ok(())
    }

    /// Remove and return up to `count` members of the set at `key`.
    pub fn spop(&self, key: &[u8], count: usize) -> Result<Vec<Vec<u8>>> {
        let index = self.inner.set_index.write()?;
        let Some(tree) = index.trees.get(key) else {
            return Ok(Vec::new());
        };

        let sums = tree.first_keys(count);
        let mut values = Vec::with_capacity(sums.len());
        for sum in &sums {
            values.push(self.inner.get_val(tree, sum, Shape::Set)?);
        }
        for sum in &sums {
            self.inner.remove_set_member(tree, key, sum)?;
        }
        Ok(values)
    }

    /// Remove `member` from the set at `key`; false when it was absent.
    pub fn srem(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let index = self.inner.set_index.write()?;
        let Some(tree) = index.trees.get(key) else {
            return Ok(false);
        };
        self.inner.remove_set_member(tree, key, &fingerprint(member))
    }

    /// Number of members in the set at `key`.
    pub fn scard(&self, key: &[u8]) -> Result<usize> {
        let index = self.inner.set_index.read()?;
        Ok(index.trees.get(key).map_or(0, |tree| tree.len()))
    }

    /// Is `member` in the set at `key`?
    pub fn sismember(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let index = self.inner.set_index.read()?;
        let Some(tree) = index.trees.get(key) else {
            return Ok(false);
        };
        match self.inner.get_val(tree, &fingerprint(member), Shape::Set) {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All members of the set at `key`, in fingerprint order.
    pub fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let index = self.inner.set_index.read()?;
        let Some(tree) = index.trees.get(key) else {
            return Ok(Vec::new());
        };
        let mut members = Vec::with_capacity(tree.len());
        for sum in tree.keys() {
            members.push(self.inner.get_val(tree, &sum, Shape::Set)?);
        }
        Ok(members)
    }
}

impl DbInner {
    fn remove_set_member(&self, tree: &KeyTree, key: &[u8], sum: &[u8]) -> Result<bool> {
        if tree.get(sum).is_none() {
            return Ok(false);
        }

        let record = LogRecord {
            key: key.to_vec(),
            value: sum.to_vec(),
            kind: RecordKind::Delete,
            ..Default::default()
        };
        let locator = self.write_log_record(&record, Shape::Set)?;
        Ok(self.delete_index(tree, sum, &locator, Shape::Set))
    }
}
