//! In-memory indexes: the point of truth for live data.
//!
//! Every shape maps logical keys to [`Locator`]s through one or more
//! [`KeyTree`]s. Strings use a single global tree; lists, hashes, sets and
//! zsets keep one tree per outer key. Set and zset trees are keyed by a
//! 128-bit fingerprint of the member rather than the member itself, trading
//! a negligible (2^-64) collision probability for bounded key sizes.

pub mod tree;

pub use tree::KeyTree;

use std::collections::HashMap;
use std::io::Cursor;

use crate::zset::SortedSet;

/// Where the most recent record for a key physically lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub segment_id: u32,
    pub offset: i64,
    pub size: u32,
    /// Seconds since the epoch; 0 means never.
    pub expires_at: i64,
    /// Populated only in memory-resident store mode, in which case reads
    /// never touch disk.
    pub value: Option<Vec<u8>>,
}

/// 128-bit Murmur3 fingerprint of a set/zset member.
pub fn fingerprint(member: &[u8]) -> Vec<u8> {
    // Reading from an in-memory cursor cannot fail
    let sum = murmur3::murmur3_x64_128(&mut Cursor::new(member), 0).unwrap_or_default();
    sum.to_le_bytes().to_vec()
}

/// String index: one global tree keyed by the user key.
#[derive(Debug, Default)]
pub struct StrIndex {
    pub tree: KeyTree,
}

/// List index: one tree per outer key, holding both the `ListSeq` metadata
/// entry (keyed by the outer key) and the data entries (keyed by
/// `encode_list_key(key, seq)`).
#[derive(Debug, Default)]
pub struct ListIndex {
    pub trees: HashMap<Vec<u8>, KeyTree>,
}

/// Hash index: one tree per outer key, keyed by field.
#[derive(Debug, Default)]
pub struct HashIndex {
    pub trees: HashMap<Vec<u8>, KeyTree>,
}

/// Set index: one tree per outer key, keyed by member fingerprint.
#[derive(Debug, Default)]
pub struct SetIndex {
    pub trees: HashMap<Vec<u8>, KeyTree>,
}

/// ZSet index: fingerprint-keyed trees plus the in-memory ordered
/// structure that answers rank and range queries.
#[derive(Debug, Default)]
pub struct ZSetIndex {
    pub trees: HashMap<Vec<u8>, KeyTree>,
    pub sorted: SortedSet,
}

/// Fetch-or-create the tree for an outer key.
pub(crate) fn tree_for<'a>(
    trees: &'a mut HashMap<Vec<u8>, KeyTree>,
    key: &[u8],
) -> &'a mut KeyTree {
    trees.entry(key.to_vec()).or_default()
}
