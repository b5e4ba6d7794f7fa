//! On-disk record codec.
//!
//! ```text
//! +-------+--------+----------+------------+------------+-------+---------+
//! |  crc  |  kind  | key size | value size | expires at |  key  |  value  |
//! +-------+--------+----------+------------+------------+-------+---------+
//! |----------------------- header ---------------------|
//!         |--------------------------- crc check ---------------------...-|
//! ```
//!
//! The crc is a little-endian CRC-32 (IEEE polynomial) over everything that
//! follows it. Sizes and the expiry timestamp are zigzag varints, so the
//! header occupies between 7 and 25 bytes. A fully zero header marks the
//! end of the records in a segment; the pre-sized file guarantees trailing
//! bytes read as zero.

use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{Error, Result};

/// crc(4) + kind(1) + ksize(<=5) + vsize(<=5) + expires_at(<=10)
pub const MAX_HEADER_SIZE: usize = 25;

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// What a record means to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RecordKind {
    /// A live key-value pair.
    #[default]
    Default = 0,
    /// A tombstone: the key is no longer live.
    Delete = 1,
    /// A list's head/tail sequence metadata.
    ListSeq = 2,
}

impl TryFrom<u8> for RecordKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(RecordKind::Default),
            1 => Ok(RecordKind::Delete),
            2 => Ok(RecordKind::ListSeq),
            _ => Err(Error::Unsupported("record kind")),
        }
    }
}

/// The persisted entity: key and value bytes plus expiry and kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Seconds since the epoch; 0 means never.
    pub expires_at: i64,
    pub kind: RecordKind,
}

/// Decoded leading bytes of a record. The kind byte stays raw until the
/// crc has been verified.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    pub crc32: u32,
    pub kind: u8,
    pub ksize: u32,
    pub vsize: u32,
    pub expires_at: i64,
}

/// Encode a record into its on-disk bytes; also returns the record size.
pub fn encode_record(record: &LogRecord) -> (Vec<u8>, usize) {
    let mut header = [0u8; MAX_HEADER_SIZE];
    header[4] = record.kind as u8;
    let mut index = 5;
    index += put_varint(&mut header[index..], record.key.len() as i64);
    index += put_varint(&mut header[index..], record.value.len() as i64);
    index += put_varint(&mut header[index..], record.expires_at);

    let size = index + record.key.len() + record.value.len();
    let mut buf = Vec::with_capacity(size);
    buf.extend_from_slice(&header[..index]);
    buf.extend_from_slice(&record.key);
    buf.extend_from_slice(&record.value);

    let crc = CRC32.checksum(&buf[4..]);
    LittleEndian::write_u32(&mut buf[..4], crc);
    (buf, size)
}

/// Decode a header from the leading bytes of a record, returning it with
/// the number of bytes it occupied.
pub(crate) fn decode_header(buf: &[u8]) -> Result<(RecordHeader, usize)> {
    if buf.len() <= 4 {
        return Err(Error::Eof);
    }
    let crc32 = LittleEndian::read_u32(&buf[..4]);
    let kind = buf[4];
    let mut index = 5;

    let (ksize, n) = varint(&buf[index..]).ok_or(Error::InvalidCrc)?;
    index += n;
    let (vsize, n) = varint(&buf[index..]).ok_or(Error::InvalidCrc)?;
    index += n;
    let (expires_at, n) = varint(&buf[index..]).ok_or(Error::InvalidCrc)?;
    index += n;

    if ksize < 0 || vsize < 0 || ksize > u32::MAX as i64 || vsize > u32::MAX as i64 {
        return Err(Error::InvalidCrc);
    }

    Ok((
        RecordHeader {
            crc32,
            kind,
            ksize: ksize as u32,
            vsize: vsize as u32,
            expires_at,
        },
        index,
    ))
}

/// The crc of a record as stored: header bytes after the crc field, then
/// key, then value.
pub(crate) fn record_crc(header_after_crc: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(header_after_crc);
    digest.update(key);
    digest.update(value);
    digest.finalize()
}

/// Zigzag-encode `x` into `buf` as a base-128 varint; returns bytes used.
pub(crate) fn put_varint(buf: &mut [u8], x: i64) -> usize {
    let mut ux = (x as u64) << 1;
    if x < 0 {
        ux = !ux;
    }
    put_uvarint(buf, ux)
}

fn put_uvarint(buf: &mut [u8], mut x: u64) -> usize {
    let mut i = 0;
    while x >= 0x80 {
        buf[i] = (x as u8) | 0x80;
        x >>= 7;
        i += 1;
    }
    buf[i] = x as u8;
    i + 1
}

/// Decode a zigzag varint from the front of `buf`; None if truncated.
pub(crate) fn varint(buf: &[u8]) -> Option<(i64, usize)> {
    let (ux, n) = uvarint(buf)?;
    let mut x = (ux >> 1) as i64;
    if ux & 1 != 0 {
        x = !x;
    }
    Some((x, n))
}

fn uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut x = 0u64;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if i == 10 || (i == 9 && b > 1) {
            return None;
        }
        if b < 0x80 {
            return Some((x | ((b as u64) << shift), i + 1));
        }
        x |= ((b & 0x7f) as u64) << shift;
        shift += 7;
    }
    None
}
