use crate::config::Config;
use crate::error::Error;
use crate::hash::{ShardKey, Sharding};
use crate::iter::{BufferedIter, Iter, Keys};
use crate::shard::Shard;
use crate::stats::{ShardOps, Stats};
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Concurrent map split into independently locked shards.
///
/// Every key is owned by exactly one shard, chosen by the map's sharding
/// function. Single-key operations lock only that shard, so operations on
/// keys in different shards never block each other. Whole-map operations
/// (`count`, `keys`, `items`, `clear`, iteration) visit the shards one after
/// another and are only consistent per shard.
///
/// # Example
///
/// ```rust
/// use cmap::ConcurrentMap;
///
/// let map = ConcurrentMap::new();
/// map.set("apples".to_string(), 3);
///
/// let total = map.upsert("apples".to_string(), |old| old.copied().unwrap_or(0) + 2);
/// assert_eq!(total, 5);
/// assert_eq!(map.get(&"apples".to_string()), Some(5));
/// ```
pub struct ConcurrentMap<K, V> {
    shards: Vec<Shard<K, V>>,
    sharding: Sharding<K>,
}

impl<K, V> ConcurrentMap<K, V>
where
    K: ShardKey + Hash + Eq + Send + Sync,
    V: Send + Sync,
{
    /// Create a new map with defaults (32 shards, FNV-1a).
    pub fn new() -> Self {
        Self::build(Config::default(), Sharding::fnv1a())
    }

    /// Create a new map with `shard_count` shards.
    pub fn with_shard_count(shard_count: usize) -> Result<Self, Error> {
        Self::with_config(Config::new().shard_count(shard_count)?)
    }

    /// Create a new map with custom config.
    pub fn with_config(config: Config) -> Result<Self, Error> {
        Self::with_sharding(config, Sharding::fnv1a())
    }
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Hash + Eq + Send + Sync,
    V: Send + Sync,
{
    /// Create a new map with custom config and sharding function.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cmap::{Config, ConcurrentMap, Sharding};
    ///
    /// #[derive(Hash, PartialEq, Eq)]
    /// struct Animal(String);
    ///
    /// impl std::fmt::Display for Animal {
    ///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    ///         f.write_str(&self.0)
    ///     }
    /// }
    ///
    /// let map = ConcurrentMap::with_sharding(Config::default(), Sharding::display())?;
    /// map.set(Animal("cat".into()), 1);
    /// assert!(map.has(&Animal("cat".into())));
    /// # Ok::<(), cmap::Error>(())
    /// ```
    pub fn with_sharding(config: Config, sharding: Sharding<K>) -> Result<Self, Error> {
        if config.shard_count == 0 {
            return Err(Error::InvalidShardCount);
        }
        Ok(Self::build(config, sharding))
    }

    fn build(config: Config, sharding: Sharding<K>) -> Self {
        let capacity = config.capacity_per_shard.unwrap_or(0);
        let shards = (0..config.shard_count)
            .map(|_| Shard::with_capacity(capacity))
            .collect();

        tracing::debug!(
            shard_count = config.shard_count,
            capacity_per_shard = capacity,
            ?sharding,
            "created concurrent map"
        );

        Self { shards, sharding }
    }

    /// Number of shards, fixed at construction.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Figure out which shard this key belongs to.
    #[inline]
    pub fn shard_index(&self, key: &K) -> usize {
        self.sharding.shard_index(key, self.shards.len())
    }

    /// The shard owning `key`.
    ///
    /// Only keys routed to this shard may be inserted through it, e.g. with
    /// [`Shard::update`]. A key placed in any other shard is invisible to the
    /// keyed operations of this map.
    #[inline]
    pub fn get_shard(&self, key: &K) -> &Shard<K, V> {
        &self.shards[self.shard_index(key)]
    }

    /// Insert a key-value pair. Returns the old value if the key existed.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.get_shard(&key).set(key, value)
    }

    /// Insert every pair. Each insert is atomic on its own; the batch is not.
    pub fn set_many<I>(&self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in pairs {
            self.set(key, value);
        }
    }

    /// Get a copy of the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.get_shard(key).get(key)
    }

    /// Run `f` on the value under `key` (or `None`) while the shard's read lock is held.
    ///
    /// Avoids cloning the value. `f` must not call back into the map.
    pub fn get_cb<F, R>(&self, key: &K, f: F) -> R
    where
        F: FnOnce(Option<&V>) -> R,
    {
        self.get_shard(key).get_cb(key, f)
    }

    /// Look up several keys, taking each touched shard's read lock once.
    ///
    /// Results are in the same order as `keys`.
    pub fn get_many(&self, keys: &[K]) -> Vec<Option<V>>
    where
        V: Clone,
    {
        let mut by_shard: Vec<Vec<usize>> = vec![Vec::new(); self.shards.len()];
        for (pos, key) in keys.iter().enumerate() {
            by_shard[self.shard_index(key)].push(pos);
        }

        let mut results = vec![None; keys.len()];
        for (shard, positions) in self.shards.iter().zip(by_shard) {
            if positions.is_empty() {
                continue;
            }
            let mut slots = positions.iter();
            shard.find(positions.iter().map(|&pos| &keys[pos]), |_, value| {
                if let Some(&pos) = slots.next() {
                    results[pos] = value.cloned();
                }
            });
        }
        results
    }

    /// Check whether `key` is present.
    pub fn has(&self, key: &K) -> bool {
        self.get_shard(key).contains_key(key)
    }

    /// Remove a key-value pair, returning the value if it existed.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.get_shard(key).delete(key)
    }

    /// Atomically remove `key` and return its value.
    pub fn pop(&self, key: &K) -> Option<V> {
        self.get_shard(key).update(|map| map.remove(key))
    }

    /// Remove `key` if `predicate` approves, as one atomic step.
    ///
    /// The predicate always runs exactly once, receiving `None` when the key
    /// is absent. Returns `true` only if the key existed and was removed.
    ///
    /// ```rust
    /// use cmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// map.set("job", 3);
    ///
    /// assert!(!map.remove_if(&"job", |_, v| v == Some(&0)));
    /// assert!(map.remove_if(&"job", |_, v| v == Some(&3)));
    /// assert!(!map.has(&"job"));
    /// ```
    pub fn remove_if<F>(&self, key: &K, predicate: F) -> bool
    where
        F: FnOnce(&K, Option<&V>) -> bool,
    {
        self.get_shard(key).update(|map| {
            let existed = map.contains_key(key);
            let remove = predicate(key, map.get(key));
            if existed && remove {
                map.remove(key);
                true
            } else {
                false
            }
        })
    }

    /// Insert `value` only if `key` is absent. Returns whether it was inserted.
    pub fn set_if_absent(&self, key: K, value: V) -> bool {
        self.get_shard(&key).update(|map| match map.entry(key) {
            hashbrown::hash_map::Entry::Occupied(_) => false,
            hashbrown::hash_map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        })
    }

    /// Replace the value under `key` only if it is present. Returns whether it was replaced.
    pub fn set_if_exists(&self, key: K, value: V) -> bool {
        self.get_shard(&key).update(|map| match map.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        })
    }

    /// Insert or update atomically.
    ///
    /// `f` sees the current value (`None` if absent) and returns the value to
    /// store; no other writer can touch the key in between. Returns the stored
    /// value.
    pub fn upsert<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
        V: Clone,
    {
        self.get_shard(&key).update(|map| {
            let value = f(map.get(&key));
            map.insert(key, value.clone());
            value
        })
    }

    /// Return the value under `key`, inserting `producer()` first if absent.
    ///
    /// Concurrent callers racing on the same absent key store exactly one
    /// value; every caller gets that value back.
    pub fn get_or_insert<F>(&self, key: K, producer: F) -> V
    where
        F: FnOnce() -> V,
        V: Clone,
    {
        let shard = self.get_shard(&key);
        if let Some(value) = shard.get(&key) {
            return value;
        }
        // Someone may have inserted between the read and the write lock.
        shard.update(|map| map.entry(key).or_insert_with(producer).clone())
    }

    /// Total number of entries, summed shard by shard.
    ///
    /// Under concurrent writes the result may not match any single instant.
    pub fn count(&self) -> usize {
        self.shards.iter().map(|shard| shard.count()).sum()
    }

    /// Check if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Call `f` for every entry, holding each shard's read lock in turn.
    ///
    /// No entries are copied. `f` must not write to the map.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for shard in &self.shards {
            shard.view(&mut f);
        }
    }

    /// Get detailed statistics about the map and its shards.
    pub fn stats(&self) -> Stats {
        let shard_sizes: Vec<usize> = self.shards.iter().map(|s| s.count()).collect();
        let operations: Vec<ShardOps> = self.shards.iter().map(|s| s.stats()).collect();
        let size: usize = shard_sizes.iter().sum();

        Stats {
            size,
            shard_sizes,
            operations,
        }
    }
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Lazy iterator over copies of all entries.
    ///
    /// Each shard is copied only when iteration reaches it, so the result is
    /// consistent per shard but not across shards. Calling `iter` again
    /// copies afresh.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// map.set("key1", "value1");
    /// map.set("key2", "value2");
    ///
    /// let mut count = 0;
    /// for (_key, _value) in map.iter() {
    ///     count += 1;
    /// }
    /// assert_eq!(count, 2);
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V>
    where
        V: Clone,
    {
        Iter::new(&self.shards)
    }

    /// Iterator over copies of all entries, fed by background workers.
    ///
    /// Copies every shard immediately, then streams the copies concurrently.
    /// Dropping the iterator before it is drained stops and joins the workers.
    pub fn iter_buffered(&self) -> BufferedIter<K, V>
    where
        K: 'static,
        V: Clone + 'static,
    {
        BufferedIter::new(&self.shards)
    }

    /// All keys.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.count());
        keys.extend(Keys::new(&self.shards));
        keys
    }

    /// All values.
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        let mut values = Vec::with_capacity(self.count());
        values.extend(self.iter().map(|(_, value)| value));
        values
    }

    /// All entries collected into a `HashMap`.
    pub fn items(&self) -> HashMap<K, V>
    where
        V: Clone,
    {
        self.iter().collect()
    }

    /// Remove every key observed in a per-shard key snapshot.
    ///
    /// Keys inserted concurrently may survive, so the map is not guaranteed
    /// to be empty afterwards while other threads are writing.
    pub fn clear(&self) {
        let mut removed = 0usize;
        for key in Keys::new(&self.shards) {
            if self.remove(&key).is_some() {
                removed += 1;
            }
        }
        tracing::trace!(removed, "cleared concurrent map");
    }
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Hash + Eq + Send + Sync + Serialize,
    V: Send + Sync + Serialize,
{
    /// Render the map as one flat JSON object.
    ///
    /// ```rust
    /// use cmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// assert_eq!(map.to_json()?, "{}");
    ///
    /// map.set("a".to_string(), 1);
    /// assert_eq!(map.to_json()?, r#"{"a":1}"#);
    /// # Ok::<(), cmap::Error>(())
    /// ```
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(Error::Serialize)
    }

    /// Render the map as indented JSON.
    pub fn to_json_pretty(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(Error::Serialize)
    }
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Hash + Eq + Send + Sync + for<'de> Deserialize<'de>,
    V: Send + Sync + for<'de> Deserialize<'de>,
{
    /// Merge the entries of a JSON object into this map.
    ///
    /// Existing keys are overwritten, other entries are kept. The input is
    /// fully decoded before anything is written, so on error the map is
    /// unchanged.
    pub fn merge_json(&self, json: &str) -> Result<(), Error> {
        let entries: HashMap<K, V> = serde_json::from_str(json).map_err(Error::from_decode)?;
        tracing::debug!(entries = entries.len(), "merging decoded entries");
        self.set_many(entries);
        Ok(())
    }
}

impl<K, V> Default for ConcurrentMap<K, V>
where
    K: ShardKey + Hash + Eq + Send + Sync,
    V: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for ConcurrentMap<K, V>
where
    K: Hash + Eq + Send + Sync,
    V: Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentMap")
            .field("shard_count", &self.shards.len())
            .field("count", &self.count())
            .finish()
    }
}

impl<K, V> Serialize for ConcurrentMap<K, V>
where
    K: Hash + Eq + Send + Sync + Serialize,
    V: Send + Sync + Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Every shard stays read-locked until the end so the announced length
        // matches the entries written. Writers hold one shard lock at a time,
        // so taking them in order cannot deadlock.
        let guards: Vec<_> = self.shards.iter().map(Shard::read_lock).collect();
        let len = guards.iter().map(|map| map.len()).sum();
        let mut out = serializer.serialize_map(Some(len))?;
        for map in &guards {
            for (key, value) in map.iter() {
                out.serialize_entry(key, value)?;
            }
        }
        out.end()
    }
}

impl<K, V> FromIterator<(K, V)> for ConcurrentMap<K, V>
where
    K: ShardKey + Hash + Eq + Send + Sync,
    V: Send + Sync,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = Self::new();
        map.set_many(iter);
        map
    }
}

impl<K, V> Extend<(K, V)> for &ConcurrentMap<K, V>
where
    K: Hash + Eq + Send + Sync,
    V: Send + Sync,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.set_many(iter);
    }
}

struct ConcurrentMapVisitor<K, V> {
    marker: PhantomData<fn() -> ConcurrentMap<K, V>>,
}

impl<'de, K, V> Visitor<'de> for ConcurrentMapVisitor<K, V>
where
    K: ShardKey + Hash + Eq + Send + Sync + Deserialize<'de>,
    V: Send + Sync + Deserialize<'de>,
{
    type Value = ConcurrentMap<K, V>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let map = ConcurrentMap::new();
        while let Some((key, value)) = access.next_entry()? {
            map.set(key, value);
        }
        Ok(map)
    }
}

/// Deserializes into a fresh map with the default configuration.
impl<'de, K, V> Deserialize<'de> for ConcurrentMap<K, V>
where
    K: ShardKey + Hash + Eq + Send + Sync + Deserialize<'de>,
    V: Send + Sync + Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(ConcurrentMapVisitor {
            marker: PhantomData,
        })
    }
}
