use crossbeam_skiplist::SkipMap;

use super::Locator;

/// Byte-keyed ordered map from key to locator.
///
/// Backed by a skip list, which keeps keys in lexicographic order and makes
/// ordered and prefix iteration cheap. Operations are synchronous; callers
/// serialise mutation externally through the owning shape's lock, which is
/// also what makes the get-then-insert in [`KeyTree::put`] sound.
#[derive(Debug, Default)]
pub struct KeyTree {
    map: SkipMap<Vec<u8>, Locator>,
}

impl KeyTree {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
        }
    }

    /// Insert or replace, returning the previous locator if one existed.
    pub fn put(&self, key: Vec<u8>, locator: Locator) -> Option<Locator> {
        let old = self.map.get(&key).map(|entry| entry.value().clone());
        self.map.insert(key, locator);
        old
    }

    pub fn get(&self, key: &[u8]) -> Option<Locator> {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    /// Remove, returning the locator that was removed.
    pub fn remove(&self, key: &[u8]) -> Option<Locator> {
        self.map.remove(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// All keys, in lexicographic order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    /// The first `count` keys in lexicographic order.
    pub fn first_keys(&self, count: usize) -> Vec<Vec<u8>> {
        self.map
            .iter()
            .take(count)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Up to `limit` keys beginning with `prefix`, in order. An empty
    /// prefix scans from the front.
    pub fn prefix_scan(&self, prefix: &[u8], limit: usize) -> Vec<Vec<u8>> {
        self.map
            .range(prefix.to_vec()..)
            .take_while(|entry| entry.key().starts_with(prefix))
            .take(limit)
            .map(|entry| entry.key().clone())
            .collect()
    }
}
