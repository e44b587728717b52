//! Build-once keyed cache shared by the render-graph and pipeline caches.
//!
//! A lookup miss inserts a `Building` marker under the key before the builder
//! runs, outside the lock. Concurrent callers asking for the same key block on
//! a condition variable until the slot turns `Ready` or disappears (the build
//! failed), in which case they retry and may build themselves. Failures are
//! never cached.
//!
//! ```text
//!   caller A ──miss──▶ [Building] ──build()──▶ [Ready(v)] ──notify──┐
//!   caller B ──────────── wait ◀─────────────────────────────────────┘──▶ v
//! ```

use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

enum Slot<V> {
    Building,
    Ready { value: Arc<V>, inserted: u64 },
}

struct Slots<K, V> {
    map: FxHashMap<K, Slot<V>>,
    next_seq: u64,
}

/// Keyed cache with an insert-if-absent build gate.
pub struct OnceCache<K, V> {
    slots: Mutex<Slots<K, V>>,
    changed: Condvar,
    capacity: Option<usize>,
}

impl<K: Eq + Hash + Clone, V> OnceCache<K, V> {
    /// Creates an unbounded cache.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                map: FxHashMap::default(),
                next_seq: 0,
            }),
            changed: Condvar::new(),
            capacity: None,
        }
    }

    /// Creates a cache that evicts its oldest ready entry once more than
    /// `capacity` entries are ready.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::new()
        }
    }

    /// Returns the cached value for `key` if it is ready.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        match self.slots.lock().map.get(key) {
            Some(Slot::Ready { value, .. }) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Returns the cached value for `key`, running `build` at most once across
    /// all concurrent callers while the value is absent.
    ///
    /// The boolean is `true` when this call performed the build.
    pub fn get_or_try_build<E, F>(&self, key: K, build: F) -> Result<(Arc<V>, bool), E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        {
            let mut slots = self.slots.lock();
            loop {
                match slots.map.get(&key) {
                    Some(Slot::Ready { value, .. }) => return Ok((Arc::clone(value), false)),
                    Some(Slot::Building) => self.changed.wait(&mut slots),
                    None => {
                        slots.map.insert(key.clone(), Slot::Building);
                        break;
                    }
                }
            }
        }

        // Clears the Building marker if `build` unwinds, so waiters are not stranded.
        let mut gate = BuildGate {
            cache: self,
            key: Some(key.clone()),
        };

        let built = build();
        gate.key = None;

        let mut slots = self.slots.lock();
        let result = match built {
            Ok(value) => {
                let value = Arc::new(value);
                let inserted = slots.next_seq;
                slots.next_seq += 1;
                slots.map.insert(
                    key,
                    Slot::Ready {
                        value: Arc::clone(&value),
                        inserted,
                    },
                );
                self.evict_overflow(&mut slots);
                Ok((value, true))
            }
            Err(e) => {
                slots.map.remove(&key);
                Err(e)
            }
        };
        self.changed.notify_all();
        result
    }

    /// Number of ready entries.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .map
            .values()
            .filter(|s| matches!(s, Slot::Ready { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops a ready entry. In-flight builds are left alone.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let mut slots = self.slots.lock();
        match slots.map.get(key) {
            Some(Slot::Ready { .. }) => match slots.map.remove(key) {
                Some(Slot::Ready { value, .. }) => Some(value),
                _ => None,
            },
            _ => None,
        }
    }

    /// Drops every ready entry.
    pub fn clear(&self) {
        self.slots
            .lock()
            .map
            .retain(|_, slot| matches!(slot, Slot::Building));
    }

    fn evict_overflow(&self, slots: &mut Slots<K, V>) {
        let Some(capacity) = self.capacity else {
            return;
        };
        loop {
            let mut ready = 0;
            let mut oldest: Option<(&K, u64)> = None;
            for (k, slot) in &slots.map {
                if let Slot::Ready { inserted, .. } = slot {
                    ready += 1;
                    if oldest.is_none_or(|(_, seq)| *inserted < seq) {
                        oldest = Some((k, *inserted));
                    }
                }
            }
            if ready <= capacity {
                return;
            }
            let Some((key, _)) = oldest else {
                return;
            };
            let key = key.clone();
            slots.map.remove(&key);
        }
    }
}

impl<K: Eq + Hash + Clone, V> Default for OnceCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

struct BuildGate<'a, K: Eq + Hash + Clone, V> {
    cache: &'a OnceCache<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash + Clone, V> Drop for BuildGate<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut slots = self.cache.slots.lock();
            slots.map.remove(&key);
            self.cache.changed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn builds_once_then_hits() {
        let cache: OnceCache<u32, String> = OnceCache::new();
        let (a, built_a) = cache
            .get_or_try_build::<(), _>(1, || Ok("one".to_string()))
            .unwrap();
        let (b, built_b) = cache
            .get_or_try_build::<(), _>(1, || Ok("other".to_string()))
            .unwrap();
        assert!(built_a);
        assert!(!built_b);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn failures_are_not_cached() {
        let cache: OnceCache<u32, u32> = OnceCache::new();
        assert!(cache.get_or_try_build(7, || Err("boom")).is_err());
        assert!(cache.get(&7).is_none());
        let (v, built) = cache.get_or_try_build::<&str, _>(7, || Ok(70)).unwrap();
        assert!(built);
        assert_eq!(*v, 70);
    }

    #[test]
    fn concurrent_requests_share_one_build() {
        let cache: Arc<OnceCache<u32, u32>> = Arc::new(OnceCache::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let builds = Arc::clone(&builds);
                thread::spawn(move || {
                    let (v, _) = cache
                        .get_or_try_build::<(), _>(42, || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok(4200)
                        })
                        .unwrap();
                    v
                })
            })
            .collect();

        let values: Vec<Arc<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache: OnceCache<u32, u32> = OnceCache::with_capacity(2);
        for k in 0..3 {
            cache.get_or_try_build::<(), _>(k, || Ok(k)).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&0).is_none());
        assert!(cache.get(&2).is_some());
    }
}
