//! Composite-key codecs.
//!
//! Hash fields and zset score strings ride inside the record key as a
//! varint-framed `(outer key, field)` pair, so replay can reconstruct both
//! halves from the record alone. List data entries pack the 32-bit sequence
//! number in front of the outer key.

use byteorder::{ByteOrder, LittleEndian};

use crate::segment::record::{put_varint, varint};

/// Scratch space for the two size varints: 5 bytes each.
const PAIR_HEADER_MAX: usize = 10;

/// `varint(ksize) | varint(fsize) | key | field`.
pub fn encode_hash_key(key: &[u8], field: &[u8]) -> Vec<u8> {
    let mut header = [0u8; PAIR_HEADER_MAX];
    let mut index = 0;
    index += put_varint(&mut header[index..], key.len() as i64);
    index += put_varint(&mut header[index..], field.len() as i64);

    if key.len() + field.len() > 0 {
        let mut buf = Vec::with_capacity(index + key.len() + field.len());
        buf.extend_from_slice(&header[..index]);
        buf.extend_from_slice(key);
        buf.extend_from_slice(field);
        return buf;
    }
    header[..index].to_vec()
}

/// Split an encoded hash key back into `(key, field)`; None if malformed.
pub fn decode_hash_key(buf: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut index = 0;
    let (ksize, n) = varint(&buf[index..])?;
    index += n;
    let (_, n) = varint(&buf[index..])?;
    index += n;

    let sep = index.checked_add(usize::try_from(ksize).ok()?)?;
    if sep > buf.len() {
        return None;
    }
    Some((buf[index..sep].to_vec(), buf[sep..].to_vec()))
}

/// Zset record keys pair the outer key with the score's decimal string,
/// using the same layout as hash keys.
pub fn encode_zset_key(key: &[u8], score: &[u8]) -> Vec<u8> {
    encode_hash_key(key, score)
}

pub fn decode_zset_key(buf: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    decode_hash_key(buf)
}

/// `seq (4 bytes LE) | key`, bijective with [`decode_list_key`].
pub fn encode_list_key(key: &[u8], seq: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 4 + key.len()];
    LittleEndian::write_u32(&mut buf[..4], seq);
    buf[4..].copy_from_slice(key);
    buf
}

/// Split an encoded list key back into `(key, seq)`; None if malformed.
pub fn decode_list_key(buf: &[u8]) -> Option<(Vec<u8>, u32)> {
    if buf.len() < 4 {
        return None;
    }
    Some((buf[4..].to_vec(), LittleEndian::read_u32(&buf[..4])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_round_trip() {
        let cases: [(&[u8], &[u8]); 4] = [
            (b"user", b"name"),
            (b"user", b""),
            (b"", b"field"),
            (b"k", b"a.much.longer.field.name"),
        ];
        for (key, field) in cases {
            let encoded = encode_hash_key(key, field);
            let (k, f) = decode_hash_key(&encoded).expect("Decode failed");
            assert_eq!(k, key);
            assert_eq!(f, field);
        }
    }

    #[test]
    fn test_empty_pair_is_header_only() {
        let encoded = encode_hash_key(b"", b"");
        assert_eq!(encoded, vec![0, 0]);
        let (k, f) = decode_hash_key(&encoded).expect("Decode failed");
        assert!(k.is_empty());
        assert!(f.is_empty());
    }

    #[test]
    fn test_zset_key_round_trip() {
        let encoded = encode_zset_key(b"board", b"1.5");
        let (k, s) = decode_zset_key(&encoded).expect("Decode failed");
        assert_eq!(k, b"board");
        assert_eq!(s, b"1.5");
    }

    #[test]
    fn test_list_key_round_trip() {
        let encoded = encode_list_key(b"queue", 1 << 31);
        let (key, seq) = decode_list_key(&encoded).expect("Decode failed");
        assert_eq!(key, b"queue");
        assert_eq!(seq, 1 << 31);
    }

    #[test]
    fn test_list_keys_differ_by_seq() {
        assert_ne!(encode_list_key(b"q", 7), encode_list_key(b"q", 8));
    }

    #[test]
    fn test_malformed_keys_rejected() {
        assert!(decode_hash_key(&[]).is_none());
        // ksize claims more bytes than present
        assert!(decode_hash_key(&[20, 0, b'x']).is_none());
        assert!(decode_list_key(&[1, 2]).is_none());
    }
}
