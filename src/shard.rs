use crate::stats::{ShardOps, ShardStats};
use hashbrown::HashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::hash::Hash;

/// A single shard containing a HashMap protected by a read-write lock.
///
/// Every method takes the lock for exactly its own duration and releases it
/// before returning, including when a callback panics. Callbacks run while
/// the lock is held and must not call back into the same shard: the lock is
/// not reentrant and doing so deadlocks.
pub struct Shard<K, V> {
    map: RwLock<HashMap<K, V>>,
    stats: ShardStats,
}

impl<K, V> Shard<K, V>
where
    K: Hash + Eq,
{
    /// Create an empty shard.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty shard able to hold `capacity` entries without rehashing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: RwLock::new(HashMap::with_capacity(capacity)),
            stats: ShardStats::new(),
        }
    }

    /// Get a copy of the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.stats.record_read();
        self.map.read().get(key).cloned()
    }

    /// Run `f` on the value stored under `key` (or `None`) while holding the read lock.
    pub fn get_cb<F, R>(&self, key: &K, f: F) -> R
    where
        F: FnOnce(Option<&V>) -> R,
    {
        self.stats.record_read();
        let map = self.map.read();
        f(map.get(key))
    }

    /// Insert a key-value pair, returning the previous value if any.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.stats.record_write();
        self.map.write().insert(key, value)
    }

    /// Remove a key-value pair, returning the value if it existed.
    pub fn delete(&self, key: &K) -> Option<V> {
        let result = self.map.write().remove(key);
        if result.is_some() {
            self.stats.record_remove();
        }
        result
    }

    /// Check if a key exists without cloning the value.
    pub fn contains_key(&self, key: &K) -> bool {
        self.stats.record_read();
        self.map.read().contains_key(key)
    }

    /// Get the number of entries in this shard.
    pub fn count(&self) -> usize {
        self.map.read().len()
    }

    /// Check if this shard is empty.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Run `f` with exclusive access to the live mapping.
    ///
    /// Everything `f` does happens as one atomic step relative to every other
    /// operation on this shard. The mutable borrow ends when `f` returns.
    ///
    /// When the shard belongs to a [`ConcurrentMap`](crate::ConcurrentMap),
    /// `f` may only insert keys whose `shard_index` selects this shard;
    /// anything else is never found by the map's lookups.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cmap::Shard;
    ///
    /// let shard = Shard::new();
    /// shard.set("hits", 1);
    ///
    /// let old = shard.update(|map| {
    ///     let entry = map.entry("hits").or_insert(0);
    ///     let old = *entry;
    ///     *entry += 1;
    ///     old
    /// });
    /// assert_eq!(old, 1);
    /// assert_eq!(shard.get(&"hits"), Some(2));
    /// ```
    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut HashMap<K, V>) -> R,
    {
        self.stats.record_update();
        let mut map = self.map.write();
        f(&mut map)
    }

    /// Call `f` once per entry under a single read lock.
    ///
    /// Writers to this shard are blocked until the traversal finishes.
    pub fn view<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        let map = self.map.read();
        for (key, value) in map.iter() {
            f(key, value);
        }
    }

    /// Look up several keys under one read lock, calling `f` for each in order.
    pub fn find<'k, I, F>(&self, keys: I, mut f: F)
    where
        K: 'k,
        I: IntoIterator<Item = &'k K>,
        F: FnMut(&K, Option<&V>),
    {
        let map = self.map.read();
        for key in keys {
            self.stats.record_read();
            f(key, map.get(key));
        }
    }

    /// Independent copy of this shard's entries at this instant.
    pub fn snapshot(&self) -> HashMap<K, V>
    where
        K: Clone,
        V: Clone,
    {
        self.stats.record_snapshot();
        self.map.read().clone()
    }

    /// Copy of this shard's keys at this instant.
    pub fn snapshot_keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.stats.record_snapshot();
        self.map.read().keys().cloned().collect()
    }

    /// Get a snapshot of statistics for this shard.
    pub fn stats(&self) -> ShardOps {
        self.stats.snapshot()
    }

    /// Get a read lock for serialization.
    pub(crate) fn read_lock(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.map.read()
    }
}

impl<K, V> Default for Shard<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for Shard<K, V>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("entries", &self.count())
            .finish()
    }
}

impl<K, V> Serialize for Shard<K, V>
where
    K: Hash + Eq + Serialize,
    V: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let map = self.read_lock();
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (key, value) in map.iter() {
            out.serialize_entry(key, value)?;
        }
        out.end()
    }
}
