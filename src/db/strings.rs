use std::time::Duration;

use crate::db::{unix_now, Db};
use crate::error::{Error, Result};
use crate::segment::record::{LogRecord, RecordKind};
use crate::segment::Shape;

impl Db {
    /// Set `key` to hold `value`, overwriting any previous value.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let index = self.inner.str_index.write()?;

        let record = LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            ..Default::default()
        };
        let locator = self.inner.write_log_record(&record, Shape::String)?;
        self.inner
            .update_index(&index.tree, key, locator, value, true, Shape::String);
        Ok(())
    }

    /// Set `key` to hold `value` and time out after `ttl`.
    pub fn set_ex(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        let index = self.inner.str_index.write()?;

        let record = LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            expires_at: unix_now() + ttl.as_secs() as i64,
            ..Default::default()
        };
        let locator = self.inner.write_log_record(&record, Shape::String)?;
        self.inner
            .update_index(&index.tree, key, locator, value, true, Shape::String);
        Ok(())
    }

    /// Set `key` to hold `value` only if it does not already hold a live
    /// one; a no-op otherwise.
    pub fn set_nx(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let index = self.inner.str_index.write()?;

        match self.inner.get_val(&index.tree, key, Shape::String) {
            Ok(_) => return Ok(()),
            Err(Error::KeyNotFound) => {}
            Err(e) => return Err(e),
        }

        let record = LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            ..Default::default()
        };
        let locator = self.inner.write_log_record(&record, Shape::String)?;
        self.inner
            .update_index(&index.tree, key, locator, value, true, Shape::String);
        Ok(())
    }

    /// The value of `key`, or `KeyNotFound`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let index = self.inner.str_index.read()?;
        self.inner.get_val(&index.tree, key, Shape::String)
    }

    /// The values of every key in `keys`; missing or expired keys yield
    /// None. An empty key list is an input error.
    pub fn mget(&self, keys: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        let index = self.inner.str_index.read()?;

        if keys.is_empty() {
            return Err(Error::InvalidInput(
                "wrong number of arguments".to_string(),
            ));
        }
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            match self.inner.get_val(&index.tree, key, Shape::String) {
                Ok(value) => values.push(Some(value)),
                Err(Error::KeyNotFound) => values.push(None),
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }

    /// Delete `key` by appending a tombstone and dropping the index entry.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let index = self.inner.str_index.write()?;

        let record = LogRecord {
            key: key.to_vec(),
            kind: RecordKind::Delete,
            ..Default::default()
        };
        let locator = self.inner.write_log_record(&record, Shape::String)?;
        self.inner
            .delete_index(&index.tree, key, &locator, Shape::String);
        Ok(())
    }
}
