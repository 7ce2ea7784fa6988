//! Memoized analysis results keyed by analysis context identity.
//!
//! Each key owns a slot guarded by its own mutex. The first request for a key
//! computes while holding the slot lock, so concurrent requests for the same
//! key wait instead of duplicating the work. A failed or cancelled
//! computation leaves the slot empty and removes it from the map, so the next
//! request starts from scratch.

use crate::error::FlowResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

type Slot<V> = Arc<Mutex<Option<Arc<V>>>>;

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

pub struct ResultCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    stats: CacheStats,
}

impl<K, V> Default for ResultCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }
}

impl<K: Hash + Eq + Clone, V> ResultCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of completed entries.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.try_lock().is_some_and(|v| v.is_some()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let slot = self.slots.lock().get(key).cloned()?;
        let value = slot.try_lock()?.clone();
        value
    }

    /// Returns the cached value for `key`, computing it at most once.
    /// Blocks while another thread computes the same key.
    pub fn get_or_compute(&self, key: &K, compute: impl FnOnce() -> FlowResult<V>) -> FlowResult<Arc<V>> {
        loop {
            let slot = self.slot(key);
            let mut guard = slot.lock();
            if let Some(value) = guard.as_ref() {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                trace!("result cache hit");
                return Ok(Arc::clone(value));
            }
            // A previous owner failed and dropped the slot; retry with a fresh one.
            if self.is_current(key, &slot) {
                return self.fill(key, &slot, &mut guard, compute);
            }
        }
    }

    /// Non-blocking variant for nested requests: if another computation holds
    /// the key, the value is computed here without being cached.
    pub fn get_or_compute_nested(&self, key: &K, compute: impl FnOnce() -> FlowResult<V>) -> FlowResult<Arc<V>> {
        let slot = self.slot(key);
        let Some(mut guard) = slot.try_lock() else {
            debug!("result cache key busy, computing uncached");
            return compute().map(Arc::new);
        };
        if let Some(value) = guard.as_ref() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(value));
        }
        if !self.is_current(key, &slot) {
            return compute().map(Arc::new);
        }
        self.fill(key, &slot, &mut guard, compute)
    }

    fn slot(&self, key: &K) -> Slot<V> {
        Arc::clone(self.slots.lock().entry(key.clone()).or_default())
    }

    fn is_current(&self, key: &K, slot: &Slot<V>) -> bool {
        self.slots
            .lock()
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn fill(
        &self,
        key: &K,
        slot: &Slot<V>,
        guard: &mut Option<Arc<V>>,
        compute: impl FnOnce() -> FlowResult<V>,
    ) -> FlowResult<Arc<V>> {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        match compute() {
            Ok(value) => {
                let value = Arc::new(value);
                *guard = Some(Arc::clone(&value));
                Ok(value)
            }
            Err(err) => {
                let mut slots = self.slots.lock();
                if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
                    slots.remove(key);
                }
                if err.is_cancelled() {
                    debug!("analysis cancelled, dropping result cache entry");
                } else {
                    warn!(error = %err, "analysis failed, dropping result cache entry");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowAnalysisError;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn computes_once_per_key() {
        let cache: ResultCache<&str, u32> = ResultCache::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let v = cache
                .get_or_compute(&"k", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .unwrap();
            assert_eq!(*v, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits(), 2);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn failed_computation_is_not_cached() {
        let cache: ResultCache<&str, u32> = ResultCache::new();
        let err = cache
            .get_or_compute(&"k", || Err(FlowAnalysisError::Cancelled))
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(cache.is_empty());
        assert!(cache.get(&"k").is_none());

        let v = cache.get_or_compute(&"k", || Ok(1)).unwrap();
        assert_eq!(*v, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_requests_share_one_computation() {
        let cache: ResultCache<u8, u32> = ResultCache::new();
        let calls = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let v = cache
                        .get_or_compute(&1, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            Ok(42)
                        })
                        .unwrap();
                    assert_eq!(*v, 42);
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_request_on_busy_key_computes_uncached() {
        let cache: ResultCache<u8, u32> = ResultCache::new();
        let outer = cache
            .get_or_compute(&1, || {
                let inner = cache.get_or_compute_nested(&1, || Ok(5))?;
                Ok(*inner + 1)
            })
            .unwrap();
        assert_eq!(*outer, 6);
        assert_eq!(cache.len(), 1);
    }
}
