use crate::error::Error;
use crate::hash::{ShardKey, Sharding};
use std::hash::Hash;

/// Shard count used when none is configured.
pub const DEFAULT_SHARD_COUNT: usize = 32;

/// Configuration for a ConcurrentMap instance.
///
/// Values are read once at construction; changing a `Config` afterwards never
/// affects maps already built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub(crate) shard_count: usize,
    pub(crate) capacity_per_shard: Option<usize>,
}

impl Config {
    /// Create a new config with defaults (32 shards, no preallocation).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of shards. Must be greater than 0.
    pub fn shard_count(mut self, count: usize) -> Result<Self, Error> {
        if count == 0 {
            return Err(Error::InvalidShardCount);
        }
        self.shard_count = count;
        Ok(self)
    }

    /// Set initial capacity per shard. Total capacity will be approximately
    /// `capacity_per_shard * shard_count`. Omitted by default (HashMap default).
    pub fn capacity_per_shard(mut self, capacity: usize) -> Self {
        self.capacity_per_shard = Some(capacity);
        self
    }

    /// The configured number of shards.
    pub fn get_shard_count(&self) -> usize {
        self.shard_count
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            capacity_per_shard: None,
        }
    }
}

/// Builder for creating a ConcurrentMap with custom configuration.
///
/// ```rust
/// use cmap::{ConcurrentMapBuilder, Sharding};
///
/// let by_name = ConcurrentMapBuilder::new()
///     .shard_count(8)?
///     .capacity_per_shard(64)
///     .build::<String, u32>()?;
/// assert_eq!(by_name.shard_count(), 8);
///
/// let by_id = ConcurrentMapBuilder::new()
///     .build_with_sharding::<(u32, u32), &str>(Sharding::ahash())?;
/// by_id.set((1, 2), "edge");
/// # Ok::<(), cmap::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct ConcurrentMapBuilder {
    config: Config,
}

impl ConcurrentMapBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the number of shards. Must be greater than 0.
    pub fn shard_count(mut self, count: usize) -> Result<Self, Error> {
        self.config = self.config.shard_count(count)?;
        Ok(self)
    }

    /// Set initial capacity per shard. Total capacity ≈ `capacity_per_shard * shard_count`.
    pub fn capacity_per_shard(mut self, capacity: usize) -> Self {
        self.config = self.config.capacity_per_shard(capacity);
        self
    }

    /// Build a map routed by FNV-1a over the key's bytes.
    pub fn build<K, V>(self) -> Result<crate::ConcurrentMap<K, V>, Error>
    where
        K: ShardKey + Hash + Eq + Send + Sync,
        V: Send + Sync,
    {
        crate::ConcurrentMap::with_config(self.config)
    }

    /// Build a map routed by the given sharding function.
    pub fn build_with_sharding<K, V>(
        self,
        sharding: Sharding<K>,
    ) -> Result<crate::ConcurrentMap<K, V>, Error>
    where
        K: Hash + Eq + Send + Sync,
        V: Send + Sync,
    {
        crate::ConcurrentMap::with_sharding(self.config, sharding)
    }
}
