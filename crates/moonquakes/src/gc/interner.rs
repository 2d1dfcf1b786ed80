// Short-string intern table: hash-bucketed ids, compared by content on
// collision. Long strings bypass this entirely.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};

use ahash::RandomState;

use crate::gc::StrId;

pub struct Interner {
    buckets: HashMap<u64, Vec<StrId>, RandomState>,
    hasher: RandomState,
}

impl Interner {
    pub fn new() -> Self {
        Interner {
            buckets: HashMap::with_capacity_and_hasher(256, RandomState::new()),
            hasher: RandomState::new(),
        }
    }

    #[inline]
    pub fn hash_bytes(&self, bytes: &[u8]) -> u64 {
        let mut h = self.hasher.build_hasher();
        bytes.hash(&mut h);
        h.finish()
    }

    /// Candidates sharing this hash; the caller compares contents.
    pub fn bucket(&self, hash: u64) -> &[StrId] {
        self.buckets.get(&hash).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn insert(&mut self, hash: u64, id: StrId) {
        self.buckets.entry(hash).or_default().push(id);
    }

    /// Drops a dead string, called during sweep.
    pub fn remove(&mut self, hash: u64, id: StrId) {
        if let Some(ids) = self.buckets.get_mut(&hash) {
            ids.retain(|&i| i != id);
            if ids.is_empty() {
                self.buckets.remove(&hash);
            }
        }
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}
