//! # cmap
//!
//! A concurrent map split into independently locked shards.
//!
//! Every key is routed to exactly one shard by a deterministic sharding
//! function. Each shard is a `HashMap` behind its own read-write lock, so
//! threads working on keys in different shards never contend.
//!
//! ## Features
//!
//! - **Sharded locking**: point operations lock one shard only
//! - **Atomic compound operations**: `upsert`, `get_or_insert`,
//!   `set_if_absent`, `set_if_exists`, `remove_if`, `pop`
//! - **Pluggable sharding**: FNV-1a by default, `Display`-based, ahash or custom
//! - **Snapshots**: lazy per-shard copies for iteration, with no locks held
//!   between items and nothing left running if iteration stops early
//! - **JSON**: flat-object `serde` encoding
//!
//! ## Consistency
//!
//! Single-key operations are linearizable per key. Whole-map operations
//! (`count`, `keys`, `values`, `items`, `clear`, iteration, serialization)
//! observe each shard at its own instant: every shard's slice is consistent,
//! the combination need not be.
//!
//! ## Example
//!
//! ```rust
//! use cmap::ConcurrentMap;
//!
//! let map = ConcurrentMap::<String, i32>::new();
//!
//! map.set("a".to_string(), 1);
//! map.set("b".to_string(), 2);
//!
//! // Atomic read-modify-write
//! let a = map.upsert("a".to_string(), |old| old.map_or(0, |v| v + 10));
//! assert_eq!(a, 11);
//!
//! // Exactly one producer result is ever stored
//! let c = map.get_or_insert("c".to_string(), || 3);
//! assert_eq!(c, 3);
//!
//! // Iterate over copies
//! for (key, value) in map.iter() {
//!     println!("{}: {}", key, value);
//! }
//!
//! let json = map.to_json()?;
//! let copy: ConcurrentMap<String, i32> = serde_json::from_str(&json).unwrap();
//! assert_eq!(copy.items(), map.items());
//! # Ok::<(), cmap::Error>(())
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use cmap::{ConcurrentMapBuilder, Sharding};
//!
//! let map = ConcurrentMapBuilder::new()
//!     .shard_count(64)?
//!     .build_with_sharding::<u64, String>(Sharding::display())?;
//! assert_eq!(map.shard_count(), 64);
//! # Ok::<(), cmap::Error>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

/// Main ConcurrentMap implementation.
pub mod concurrent_map;
/// Configuration and builder types.
pub mod config;
/// Error types.
pub mod error;
/// Sharding functions and FNV-1a hashing.
pub mod hash;
/// Snapshot iterators.
pub mod iter;
/// Independently locked shard.
pub mod shard;
/// Statistics and metrics collection.
pub mod stats;

// Re-export main types
pub use concurrent_map::ConcurrentMap;
pub use config::{Config, ConcurrentMapBuilder, DEFAULT_SHARD_COUNT};
pub use error::Error;
pub use hash::{ShardKey, Sharding};
pub use iter::{BufferedIter, Iter, Keys};
pub use shard::Shard;
pub use stats::{ShardOps, Stats};

/// Map type handed to [`Shard::update`] callbacks and returned by [`Shard::snapshot`].
pub use hashbrown::HashMap as ShardMap;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let map = ConcurrentMap::new();

        // Set
        assert!(map.set("key1", "value1").is_none());
        assert_eq!(map.set("key1", "value2"), Some("value1"));

        // Get
        assert_eq!(map.get(&"key1"), Some("value2"));
        assert!(map.get(&"nonexistent").is_none());

        // Remove
        assert_eq!(map.remove(&"key1"), Some("value2"));
        assert!(map.get(&"key1").is_none());
    }

    #[test]
    fn test_upsert() {
        let map: ConcurrentMap<&str, i32> = ConcurrentMap::new();

        map.upsert("counter", |old| old.map_or(1, |v| v + 1));
        map.upsert("counter", |old| old.map_or(1, |v| v + 1));
        assert_eq!(map.get(&"counter"), Some(2));
    }

    #[test]
    fn test_stats() {
        let map = ConcurrentMap::new();
        map.set("key1", "value1");
        map.set("key2", "value2");

        let stats = map.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.shard_sizes.len(), DEFAULT_SHARD_COUNT);
    }

    #[test]
    fn test_builder() {
        let map = ConcurrentMapBuilder::new()
            .shard_count(8)
            .unwrap()
            .build::<String, i32>()
            .unwrap();

        map.set("test".to_string(), 42);
        assert_eq!(map.get(&"test".to_string()), Some(42));
    }

    #[test]
    fn test_shard_update_through_map() {
        let map: ConcurrentMap<&str, Vec<u32>> = ConcurrentMap::new();
        let shard = map.get_shard(&"list");

        shard.update(|entries| {
            entries.entry("list").or_default().extend([1, 2, 3]);
        });
        assert_eq!(map.get(&"list"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_keys_inserted_through_owning_shard_are_found() {
        let map: ConcurrentMap<u32, u32> = ConcurrentMap::with_shard_count(7).unwrap();
        for key in 0..100 {
            map.get_shard(&key).update(|entries| entries.insert(key, key * 3));
        }

        for key in 0..100 {
            assert_eq!(map.get(&key), Some(key * 3));
        }
        assert_eq!(map.count(), 100);
    }
}
