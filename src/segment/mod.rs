//! Append-only log segments.
//!
//! A segment wraps an IO backend with its identity (shape + id) and an
//! atomic append offset. Segments are named `log.<shape>.<10-digit-id>`
//! inside the database directory, pre-sized to the rotation threshold, and
//! become immutable the moment a rotation replaces them.

pub mod record;

pub use record::{LogRecord, RecordKind, MAX_HEADER_SIZE};

use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::config::IoType;
use crate::error::{Error, Result};
use crate::io::{self, IoBackend};

/// Prefix shared by every segment file.
pub const FILE_PREFIX: &str = "log.";

/// Segment ids start at 0 per shape.
pub const INITIAL_SEGMENT_ID: u32 = 0;

/// The five data shapes, each with its own segment family, index and lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    String,
    List,
    Hash,
    Set,
    ZSet,
}

impl Shape {
    pub const ALL: [Shape; 5] = [
        Shape::String,
        Shape::List,
        Shape::Hash,
        Shape::Set,
        Shape::ZSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::String => "string",
            Shape::List => "list",
            Shape::Hash => "hash",
            Shape::Set => "set",
            Shape::ZSet => "zset",
        }
    }

    fn parse(s: &str) -> Option<Shape> {
        match s {
            "string" => Some(Shape::String),
            "list" => Some(Shape::List),
            "hash" => Some(Shape::Hash),
            "set" => Some(Shape::Set),
            "zset" => Some(Shape::ZSet),
            _ => None,
        }
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File name of segment `id` for `shape`, e.g. `log.string.0000000003`.
pub fn file_name(shape: Shape, id: u32) -> String {
    format!("{}{}.{:010}", FILE_PREFIX, shape, id)
}

/// Parse a directory entry name back into `(shape, id)`; None for files
/// that are not segments.
pub fn parse_file_name(name: &str) -> Option<(Shape, u32)> {
    let rest = name.strip_prefix(FILE_PREFIX)?;
    let (shape, id) = rest.split_once('.')?;
    Some((Shape::parse(shape)?, id.parse().ok()?))
}

/// One append-only log file for one shape.
pub struct Segment {
    pub shape: Shape,
    pub id: u32,
    write_offset: AtomicI64,
    backend: Box<dyn IoBackend>,
}

impl Segment {
    /// Open (or create, pre-sized to `size`) the segment `id` for `shape`
    /// under `dir` with the requested IO backend.
    pub fn open(dir: &Path, shape: Shape, id: u32, size: i64, io_type: IoType) -> Result<Segment> {
        let path = Self::path(dir, shape, id);
        let backend = io::open_backend(&path, size, io_type)?;
        Ok(Segment {
            shape,
            id,
            write_offset: AtomicI64::new(0),
            backend,
        })
    }

    pub fn path(dir: &Path, shape: Shape, id: u32) -> PathBuf {
        dir.join(file_name(shape, id))
    }

    /// Append `buf`, returning the offset it landed at. The caller
    /// serialises appends per shape; the offset advance itself is atomic.
    pub fn append(&self, buf: &[u8]) -> Result<i64> {
        if buf.is_empty() {
            return Ok(self.write_offset.load(Ordering::SeqCst));
        }
        let offset = self.write_offset.fetch_add(buf.len() as i64, Ordering::SeqCst);
        let written = self.backend.write(buf, offset)?;
        if written != buf.len() {
            return Err(Error::ShortWrite);
        }
        Ok(offset)
    }

    /// Read the record starting at `offset`, returning it with its on-disk
    /// size. An all-zero header reads as `EndOfSegment`.
    pub fn read_record(&self, offset: i64) -> Result<(LogRecord, i64)> {
        let mut header_buf = [0u8; MAX_HEADER_SIZE];
        self.backend.read(&mut header_buf, offset)?;
        let (header, header_size) = record::decode_header(&header_buf)?;

        if header.crc32 == 0 && header.ksize == 0 && header.vsize == 0 {
            return Err(Error::EndOfSegment);
        }

        let ksize = header.ksize as usize;
        let vsize = header.vsize as usize;
        let size = header_size as i64 + (ksize + vsize) as i64;

        let (key, value) = if ksize + vsize > 0 {
            let mut kv = vec![0u8; ksize + vsize];
            self.backend.read(&mut kv, offset + header_size as i64)?;
            let value = kv.split_off(ksize);
            (kv, value)
        } else {
            (Vec::new(), Vec::new())
        };

        if record::record_crc(&header_buf[4..header_size], &key, &value) != header.crc32 {
            return Err(Error::InvalidCrc);
        }

        Ok((
            LogRecord {
                key,
                value,
                expires_at: header.expires_at,
                kind: RecordKind::try_from(header.kind)?,
            },
            size,
        ))
    }

    /// The offset the next append will land at.
    pub fn write_offset(&self) -> i64 {
        self.write_offset.load(Ordering::SeqCst)
    }

    /// Restore the append offset after replay.
    pub fn set_write_offset(&self, offset: i64) {
        self.write_offset.store(offset, Ordering::SeqCst);
    }

    pub fn sync(&self) -> Result<()> {
        self.backend.sync()
    }

    pub fn close(&self) -> Result<()> {
        self.backend.close()
    }

    /// Remove the segment file. The data cannot be retrieved afterwards, so
    /// use it carefully.
    pub fn delete(&self) -> Result<()> {
        self.backend.delete()
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("shape", &self.shape)
            .field("id", &self.id)
            .field("write_offset", &self.write_offset())
            .finish()
    }
}
