use std::collections::{HashMap, HashSet};

// Decoded values keyed by encoded key, plus the encoded keys that differ from
// what is on disk. Every changed key has a cache entry.
#[derive(Debug)]
pub(super) struct Overlay<V> {
    // None is a tombstone.
    cache: HashMap<Vec<u8>, Option<V>>,
    changed: HashSet<Vec<u8>>,
}

impl<V> Overlay<V> {
    pub(super) fn new() -> Self {
        Overlay {
            cache: HashMap::new(),
            changed: HashSet::new(),
        }
    }

    pub(super) fn contains(&self, key: &[u8]) -> bool {
        self.cache.contains_key(key)
    }

    pub(super) fn get(&self, key: &[u8]) -> Option<&V> {
        self.cache.get(key).and_then(|slot| slot.as_ref())
    }

    // Some(None) for a tombstone, None if the key isn't cached.
    pub(super) fn slot(&self, key: &[u8]) -> Option<&Option<V>> {
        self.cache.get(key)
    }

    pub(super) fn is_deleted(&self, key: &[u8]) -> bool {
        matches!(self.cache.get(key), Some(None))
    }

    // Caches a value read from disk. An existing entry wins.
    pub(super) fn insert_loaded(&mut self, key: Vec<u8>, value: V) -> Option<&V> {
        self.cache.entry(key).or_insert(Some(value)).as_ref()
    }

    // Caches a tombstone for a key absent on disk, without tracking it.
    pub(super) fn insert_deleted(&mut self, key: Vec<u8>) {
        self.cache.entry(key).or_insert(None);
    }

    pub(super) fn set(&mut self, key: Vec<u8>, value: Option<V>) {
        self.cache.insert(key.clone(), value);
        self.changed.insert(key);
    }

    pub(super) fn mark(&mut self, key: Vec<u8>) {
        debug_assert!(self.cache.contains_key(&key));
        self.changed.insert(key);
    }

    pub(super) fn is_changed(&self, key: &[u8]) -> bool {
        self.changed.contains(key)
    }

    pub(super) fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    pub(super) fn changed(&self) -> impl Iterator<Item = &[u8]> {
        self.changed.iter().map(|k| k.as_slice())
    }

    pub(super) fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub(super) fn changed_len(&self) -> usize {
        self.changed.len()
    }

    pub(super) fn keys_holding(&self, value: &V) -> Vec<Vec<u8>>
    where
        V: PartialEq,
    {
        self.cache
            .iter()
            .filter(|(_, slot)| slot.as_ref() == Some(value))
            .map(|(k, _)| k.clone())
            .collect()
    }

    // Unsaved edits survive.
    pub(super) fn drop_unchanged(&mut self) {
        let changed = &self.changed;
        self.cache.retain(|k, _| changed.contains(k));
    }

    pub(super) fn clear_changes(&mut self) {
        self.changed.clear();
    }

    pub(super) fn clear(&mut self) {
        self.cache.clear();
        self.changed.clear();
    }
}
