// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore chunks - Reader cache
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded cache of opened chunk readers. Entries expire after a period
// without use and the least recently used entry is evicted when the cache is
// over capacity. Only one thread loads a given key; others asking for the
// same key wait for that load instead of opening the file again.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Default number of cached readers.
pub const DEFAULT_CACHE_CAPACITY: usize = 50;

/// Default idle lifetime of a cached reader (6 hours).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug)]
enum Slot<V> {
    Loading,
    Ready { value: V, last_used: Instant },
}

/// Capacity- and TTL-bounded cache with single-loader-per-key semantics.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    capacity: usize,
    ttl: Duration,
    slots: Mutex<HashMap<K, Slot<V>>>,
    loaded: Condvar,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries, each for at most
    /// `ttl` since it was last used.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            slots: Mutex::new(HashMap::new()),
            loaded: Condvar::new(),
        }
    }

    /// Return the cached value for `key`, running `load` if there is none.
    ///
    /// Concurrent callers for the same key block until the first caller's
    /// load finishes. A failed load is not cached; the next caller retries.
    pub fn get_or_load<E>(&self, key: &K, load: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        let mut slots = self.slots.lock();
        loop {
            match slots.get_mut(key) {
                Some(Slot::Ready { value, last_used }) if last_used.elapsed() <= self.ttl => {
                    *last_used = Instant::now();
                    return Ok(value.clone());
                }
                Some(Slot::Ready { .. }) => {
                    slots.remove(key);
                    break;
                }
                Some(Slot::Loading) => self.loaded.wait(&mut slots),
                None => break,
            }
        }
        slots.insert(key.clone(), Slot::Loading);
        drop(slots);

        let mut pending = PendingLoad {
            cache: self,
            key,
            finished: false,
        };
        let result = load();
        pending.finish(result.as_ref().ok().cloned());
        result
    }

    /// Drop the entry for `key`, if any. An in-flight load is left alone.
    pub fn invalidate(&self, key: &K) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(key), Some(Slot::Ready { .. })) {
            slots.remove(key);
        }
    }

    /// Drop every entry that has outlived the TTL.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.slots.lock().retain(|_, slot| match slot {
            Slot::Loading => true,
            Slot::Ready { last_used, .. } => last_used.elapsed() <= ttl,
        });
    }

    /// Number of loaded entries.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready { .. }))
            .count()
    }

    /// `true` if nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(&self, slots: &mut HashMap<K, Slot<V>>) {
        let ttl = self.ttl;
        slots.retain(|_, slot| match slot {
            Slot::Loading => true,
            Slot::Ready { last_used, .. } => last_used.elapsed() <= ttl,
        });
        loop {
            let mut ready = 0;
            let mut oldest: Option<(&K, Instant)> = None;
            for (key, slot) in slots.iter() {
                if let Slot::Ready { last_used, .. } = slot {
                    ready += 1;
                    if oldest.map_or(true, |(_, at)| *last_used < at) {
                        oldest = Some((key, *last_used));
                    }
                }
            }
            if ready <= self.capacity {
                return;
            }
            let Some((key, _)) = oldest else { return };
            let key = key.clone();
            slots.remove(&key);
        }
    }
}

/// Replaces the `Loading` slot when the load ends, including by panic.
struct PendingLoad<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    cache: &'a TtlCache<K, V>,
    key: &'a K,
    finished: bool,
}

impl<K, V> PendingLoad<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn finish(&mut self, value: Option<V>) {
        let mut slots = self.cache.slots.lock();
        match value {
            Some(value) => {
                slots.insert(
                    self.key.clone(),
                    Slot::Ready {
                        value,
                        last_used: Instant::now(),
                    },
                );
                self.cache.evict(&mut slots);
            }
            None => {
                slots.remove(self.key);
            }
        }
        self.finished = true;
        drop(slots);
        self.cache.loaded.notify_all();
    }
}

impl<K, V> Drop for PendingLoad<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.finished {
            self.finish(None);
        }
    }
}
