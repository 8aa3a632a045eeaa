// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::{CpxError, PriceSeries};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Incremental 64-bit FNV-1a hasher.
#[derive(Clone, Copy, Debug)]
pub struct Fnv1a {
    state: u64,
}

impl Default for Fnv1a {
    fn default() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }
}

impl Fnv1a {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write(&value.to_le_bytes());
    }

    pub fn finish(&self) -> u64 {
        self.state
    }
}

/// FNV-1a over an arbitrary byte string.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hasher = Fnv1a::new();
    hasher.write(bytes);
    hasher.finish()
}

/// Content fingerprint of a price series: dates (as day ordinals) and exact price bits.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SeriesFingerprint(pub u64);

impl SeriesFingerprint {
    pub fn of(series: &PriceSeries) -> Self {
        let mut hasher = Fnv1a::new();
        hasher.write_u64(series.len() as u64);
        for point in series.points() {
            let ordinal = chrono::Datelike::num_days_from_ce(&point.date);
            hasher.write(&ordinal.to_le_bytes());
            hasher.write_u64(point.price.to_bits());
        }
        Self(hasher.finish())
    }
}

#[derive(Debug)]
struct CacheInner<K, V> {
    entries: HashMap<K, (V, u64)>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Hit/miss counters of a [`FingerprintCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded, thread-safe least-recently-used map.
///
/// Values are cloned out on lookup, so callers usually store `Arc<T>`.
#[derive(Debug)]
pub struct FingerprintCache<K, V> {
    capacity: usize,
    inner: Mutex<CacheInner<K, V>>,
}

impl<K, V> FingerprintCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Result<Self, CpxError> {
        if capacity == 0 {
            return Err(CpxError::invalid_input(
                "FingerprintCache capacity must be >= 1; got 0",
            ));
        }
        Ok(Self {
            capacity,
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(capacity),
                tick: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner<K, V>> {
        // A panic while holding the lock leaves the map structurally intact.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        inner.tick = inner.tick.wrapping_add(1);
        let tick = inner.tick;
        match inner.entries.get_mut(key) {
            Some((value, last_used)) => {
                *last_used = tick;
                let value = value.clone();
                inner.hits = inner.hits.saturating_add(1);
                Some(value)
            }
            None => {
                inner.misses = inner.misses.saturating_add(1);
                None
            }
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.lock();
        inner.tick = inner.tick.wrapping_add(1);
        let tick = inner.tick;
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, (_, last_used))| *last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                inner.evictions = inner.evictions.saturating_add(1);
            }
        }
        inner.entries.insert(key, (value, tick));
    }

    /// Returns the cached value or computes, stores and returns a new one.
    ///
    /// The lock is released while `compute` runs; concurrent misses on the
    /// same key may both compute, and the last insert wins.
    pub fn get_or_try_insert_with<F>(&self, key: K, compute: F) -> Result<V, CpxError>
    where
        F: FnOnce() -> Result<V, CpxError>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            len: inner.entries.len(),
            capacity: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}
