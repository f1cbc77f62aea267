//! Content-hash keyed result cache with least-recently-used eviction.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::report::DetectionResult;

struct Entry {
    result: DetectionResult,
    last_used: u64,
}

struct Inner {
    entries: HashMap<String, Entry>,
    tick: u64,
    generation: u64,
}

/// Bounded LRU cache. Capacity 0 disables it: nothing is stored, every lookup
/// misses.
///
/// [`ResultCache::clear`] starts a new generation. Results computed under an
/// older generation are refused by [`ResultCache::insert_at`].
pub struct ResultCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity.min(1_024)),
                tick: 0,
                generation: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &str) -> Option<DetectionResult> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            entry.result.clone()
        })
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn insert(&self, key: String, result: DetectionResult) {
        let mut inner = self.inner.lock();
        let generation = inner.generation;
        self.store(&mut inner, key, result, generation);
    }

    /// Store `result` only if no `clear` happened since `generation` was read.
    /// Returns whether it was stored.
    pub fn insert_at(&self, key: String, result: DetectionResult, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        self.store(&mut inner, key, result, generation)
    }

    fn store(
        &self,
        inner: &mut Inner,
        key: String,
        result: DetectionResult,
        generation: u64,
    ) -> bool {
        if self.capacity == 0 || generation != inner.generation {
            return false;
        }
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
            }
        }

        inner.entries.insert(
            key,
            Entry {
                result,
                last_used: tick,
            },
        );
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.generation += 1;
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(confidence: f32) -> DetectionResult {
        let mut r = DetectionResult::failure("n/a", 0.0);
        r.error = None;
        r.confidence = confidence;
        r
    }

    #[test]
    fn stores_and_returns_clones() {
        let cache = ResultCache::new(4);
        cache.insert("a".into(), result(0.3));
        assert_eq!(cache.get("a").map(|r| r.confidence), Some(0.3));
        assert!(cache.get("b").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = ResultCache::new(2);
        cache.insert("a".into(), result(0.1));
        cache.insert("b".into(), result(0.2));
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.insert("c".into(), result(0.3));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn overwrite_does_not_evict() {
        let cache = ResultCache::new(2);
        cache.insert("a".into(), result(0.1));
        cache.insert("b".into(), result(0.2));
        cache.insert("a".into(), result(0.9));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").map(|r| r.confidence), Some(0.9));
    }

    #[test]
    fn zero_capacity_never_hits() {
        let cache = ResultCache::new(0);
        cache.insert("a".into(), result(0.1));
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_empties() {
        let cache = ResultCache::new(3);
        cache.insert("a".into(), result(0.1));
        cache.clear();
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn result_from_before_clear_is_refused() {
        let cache = ResultCache::new(3);
        let before = cache.generation();
        cache.clear();

        assert!(!cache.insert_at("a".into(), result(0.4), before));
        assert!(cache.get("a").is_none());

        assert!(cache.insert_at("a".into(), result(0.5), cache.generation()));
        assert_eq!(cache.get("a").map(|r| r.confidence), Some(0.5));
    }
}
