//! The local chunk store (§3): hash -> chunk bytes, populated from the
//! fragment file at startup and extended as downloads complete.
//!
//! Read-only after load except for the single append-on-complete mutation,
//! so (per §5) it needs no locking — it's owned outright by the event-loop
//! task, the same way `sauoro-amethyst`'s server owns its session map
//! without sharing it across spawned tasks.

use crate::files::Fragment;
use crate::packet::Hash;
use bytes::Bytes;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    chunks: HashMap<Hash, Bytes>,
}

impl LocalStore {
    pub fn from_fragments(fragments: Vec<Fragment>) -> Self {
        let chunks = fragments
            .into_iter()
            .map(|f| (f.hash, f.bytes))
            .collect();
        Self { chunks }
    }

    pub fn has(&self, hash: &Hash) -> bool {
        self.chunks.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<Bytes> {
        self.chunks.get(hash).cloned()
    }

    pub fn insert(&mut self, hash: Hash, bytes: Bytes) {
        self.chunks.insert(hash, bytes);
    }

    /// Hashes from `wanted` that this store does not already hold.
    pub fn missing_of<'a>(&self, wanted: &'a [Hash]) -> Vec<Hash> {
        wanted.iter().filter(|h| !self.has(h)).copied().collect()
    }

    /// Hashes from `requested` that this store does hold.
    pub fn intersection_of(&self, requested: &[Hash]) -> Vec<Hash> {
        requested.iter().filter(|h| self.has(h)).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_of_filters_held_hashes() {
        let mut store = LocalStore::default();
        store.insert([1; 20], Bytes::from_static(b"a"));
        let wanted = vec![[1; 20], [2; 20]];
        assert_eq!(store.missing_of(&wanted), vec![[2; 20]]);
    }

    #[test]
    fn intersection_of_returns_only_held_hashes() {
        let mut store = LocalStore::default();
        store.insert([1; 20], Bytes::from_static(b"a"));
        let requested = vec![[1; 20], [2; 20]];
        assert_eq!(store.intersection_of(&requested), vec![[1; 20]]);
    }
}
