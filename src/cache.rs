//! Process-wide bounded LRU cache mapping [`Fid`] to fragment bytes.
//!
//! A map plus an access-order list, evicting the least-recently-used entry
//! once the map grows past capacity. A process-wide, last-writer-wins
//! cache with no single-flight guarantee is all that's required here, so a
//! single `Mutex`-guarded ordered map suffices.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use crate::fid::Fid;

/// Default bound on the number of cached fragments.
pub const DEFAULT_MAX_COUNT: usize = 1024;

struct Inner {
    map: HashMap<Fid, Vec<u8>>,
    /// Access order, oldest first. A linear scan on eviction is acceptable
    /// at the default bound (1024 entries); callers needing a tighter
    /// eviction cost can raise `max_count` and watch `Cache::len`.
    order: Vec<Fid>,
    max_count: usize,
}

impl Inner {
    fn touch(&mut self, key: &Fid) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let key = self.order.remove(pos);
            self.order.push(key);
        }
    }

    fn evict_if_needed(&mut self) {
        while self.map.len() > self.max_count && !self.order.is_empty() {
            let oldest = self.order.remove(0);
            self.map.remove(&oldest);
        }
    }
}

/// Bounded, count-based LRU cache of fragment bytes, keyed by [`Fid`].
///
/// Local to a process and associated with a single store handle rather
/// than realized as a global singleton, so that several
/// independently-cached stores can coexist. Values are immutable once
/// written, so concurrent writers racing on the same key are safe:
/// mutation is last-writer-wins.
pub struct Cache {
    inner: Mutex<Inner>,
}

impl Cache {
    pub fn new(max_count: usize) -> Cache {
        Cache {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: Vec::new(),
                max_count,
            }),
        }
    }

    pub fn get(&self, key: &Fid) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let found = inner.map.get(key).cloned();
        if found.is_some() {
            log::trace!("cache: hit for {:?}", key);
            inner.touch(key);
        } else {
            log::trace!("cache: miss for {:?}", key);
        }
        found
    }

    pub fn put(&self, key: Fid, value: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.insert(key, value);
        inner.touch(&key);
        inner.evict_if_needed();
        log::debug!("cache: put {:?}, {} entries held", key, inner.map.len());
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hook for a "right-successor sibling prefetching" optimization.
    /// Callers never rely on prefetching for correctness, so this is a
    /// documented no-op rather than an eager implementation.
    pub fn prefetch(&self, _keys: &[Fid]) {}
}

impl Default for Cache {
    fn default() -> Cache {
        Cache::new(DEFAULT_MAX_COUNT)
    }
}

#[cfg(test)]
mod cache_test {
    use super::*;

    fn fid(byte: u8) -> Fid {
        Fid::from_bytes([byte; 20])
    }

    #[test]
    fn test_get_put() {
        let cache = Cache::new(2);
        cache.put(fid(1), vec![1]);
        assert_eq!(cache.get(&fid(1)), Some(vec![1]));
        assert_eq!(cache.get(&fid(2)), None);
    }

    #[test]
    fn test_eviction_is_lru() {
        let cache = Cache::new(2);
        cache.put(fid(1), vec![1]);
        cache.put(fid(2), vec![2]);
        // touch 1, making 2 the least-recently-used
        assert_eq!(cache.get(&fid(1)), Some(vec![1]));
        cache.put(fid(3), vec![3]);

        assert_eq!(cache.get(&fid(2)), None);
        assert_eq!(cache.get(&fid(1)), Some(vec![1]));
        assert_eq!(cache.get(&fid(3)), Some(vec![3]));
        assert_eq!(cache.len(), 2);
    }
}
