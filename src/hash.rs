use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// FNV-1a 32-bit offset basis.
pub const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
/// FNV-1a 32-bit prime.
pub const FNV_PRIME: u32 = 16_777_619;

/// Hash a byte slice with 32-bit FNV-1a.
///
/// ```rust
/// assert_eq!(cmap::hash::fnv1a_32(b""), 0x811c_9dc5);
/// assert_eq!(cmap::hash::fnv1a_32(b"a"), 0xe40c_292c);
/// ```
#[inline]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hasher = Fnv1aHasher::new();
    hasher.write(bytes);
    hasher.finish_u32()
}

/// Incremental 32-bit FNV-1a hasher.
///
/// Implements both [`Hasher`] and [`fmt::Write`], so a key can be hashed from
/// its raw bytes or from its `Display` rendering without allocating a string.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1aHasher {
    state: u32,
}

impl Fnv1aHasher {
    /// Create a hasher seeded with the FNV offset basis.
    pub fn new() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }

    /// The current hash as a 32-bit value.
    #[inline]
    pub fn finish_u32(&self) -> u32 {
        self.state
    }
}

impl Default for Fnv1aHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for Fnv1aHasher {
    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u32::from(byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    #[inline]
    fn finish(&self) -> u64 {
        u64::from(self.state)
    }
}

impl fmt::Write for Fnv1aHasher {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Hasher::write(self, s.as_bytes());
        Ok(())
    }
}

/// Key types that can produce a stable shard hash.
///
/// The hash must depend only on the key's value, never on process state, so a
/// key always lands in the same shard. The built-in implementations hash the
/// key's bytes with FNV-1a.
pub trait ShardKey {
    /// Stable 32-bit hash of this key.
    fn shard_hash(&self) -> u32;
}

impl ShardKey for str {
    #[inline]
    fn shard_hash(&self) -> u32 {
        fnv1a_32(self.as_bytes())
    }
}

impl ShardKey for String {
    #[inline]
    fn shard_hash(&self) -> u32 {
        self.as_str().shard_hash()
    }
}

impl ShardKey for Box<str> {
    #[inline]
    fn shard_hash(&self) -> u32 {
        (**self).shard_hash()
    }
}

impl ShardKey for Arc<str> {
    #[inline]
    fn shard_hash(&self) -> u32 {
        (**self).shard_hash()
    }
}

impl ShardKey for Cow<'_, str> {
    #[inline]
    fn shard_hash(&self) -> u32 {
        self.as_ref().shard_hash()
    }
}

impl ShardKey for [u8] {
    #[inline]
    fn shard_hash(&self) -> u32 {
        fnv1a_32(self)
    }
}

impl ShardKey for Vec<u8> {
    #[inline]
    fn shard_hash(&self) -> u32 {
        fnv1a_32(self)
    }
}

impl ShardKey for char {
    #[inline]
    fn shard_hash(&self) -> u32 {
        let mut buf = [0u8; 4];
        fnv1a_32(self.encode_utf8(&mut buf).as_bytes())
    }
}

impl<T: ShardKey + ?Sized> ShardKey for &T {
    #[inline]
    fn shard_hash(&self) -> u32 {
        (**self).shard_hash()
    }
}

macro_rules! impl_shard_key_int {
    ($($t:ty),*) => {
        $(
            impl ShardKey for $t {
                #[inline]
                fn shard_hash(&self) -> u32 {
                    fnv1a_32(&self.to_le_bytes())
                }
            }
        )*
    };
}

impl_shard_key_int!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

/// Shard hash of a `ShardKey` key.
fn hash_shard_key<K: ShardKey>(key: &K) -> u32 {
    key.shard_hash()
}

/// Shard hash of a key's `Display` rendering.
fn hash_display<K: fmt::Display>(key: &K) -> u32 {
    let mut hasher = Fnv1aHasher::new();
    // Writing into the hasher itself never fails.
    let _ = fmt::Write::write_fmt(&mut hasher, format_args!("{}", key));
    hasher.finish_u32()
}

/// Shard hash of a `Hash` key through ahash, folded to 32 bits.
fn hash_ahash<K: Hash>(key: &K) -> u32 {
    let mut hasher = ahash::AHasher::default();
    key.hash(&mut hasher);
    let hash = hasher.finish();
    (hash ^ (hash >> 32)) as u32
}

/// Sharding function implementation.
/// Built-in strategies are plain function pointers; custom ones are shared closures.
enum Strategy<K> {
    Builtin(fn(&K) -> u32),
    Custom(Arc<dyn Fn(&K) -> u32 + Send + Sync>),
}

/// Maps a key to the shard that owns it.
///
/// The function is fixed when a map is built and never changes afterwards, so
/// a key always routes to the same shard of a given map.
///
/// # Example
///
/// ```rust
/// use cmap::Sharding;
///
/// let by_text = Sharding::<u64>::display();
/// assert_eq!(by_text.hash(&42), cmap::hash::fnv1a_32(b"42"));
///
/// let constant = Sharding::<String>::custom(|_| 5);
/// assert_eq!(constant.shard_index(&"anything".to_string(), 4), 1);
/// ```
pub struct Sharding<K> {
    strategy: Strategy<K>,
}

impl<K> Sharding<K> {
    /// Route with a caller-supplied function.
    ///
    /// The function must be deterministic; a function that is not, or that
    /// never produces some residues, breaks lookups and is not detected.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&K) -> u32 + Send + Sync + 'static,
    {
        Self {
            strategy: Strategy::Custom(Arc::new(f)),
        }
    }

    /// Hash a key.
    #[inline]
    pub fn hash(&self, key: &K) -> u32 {
        match &self.strategy {
            Strategy::Builtin(f) => f(key),
            Strategy::Custom(f) => f(key),
        }
    }

    /// Index of the shard owning `key` among `shard_count` shards.
    #[inline]
    pub fn shard_index(&self, key: &K, shard_count: usize) -> usize {
        self.hash(key) as usize % shard_count
    }
}

impl<K: ShardKey> Sharding<K> {
    /// FNV-1a over the key's own bytes (the default).
    pub fn fnv1a() -> Self {
        Self {
            strategy: Strategy::Builtin(hash_shard_key::<K>),
        }
    }
}

impl<K: fmt::Display> Sharding<K> {
    /// FNV-1a over the key's `Display` rendering.
    pub fn display() -> Self {
        Self {
            strategy: Strategy::Builtin(hash_display::<K>),
        }
    }
}

impl<K: Hash> Sharding<K> {
    /// ahash over the key's `Hash` implementation.
    pub fn ahash() -> Self {
        Self {
            strategy: Strategy::Builtin(hash_ahash::<K>),
        }
    }
}

impl<K: ShardKey> Default for Sharding<K> {
    fn default() -> Self {
        Self::fnv1a()
    }
}

impl<K> Clone for Sharding<K> {
    fn clone(&self) -> Self {
        let strategy = match &self.strategy {
            Strategy::Builtin(f) => Strategy::Builtin(*f),
            Strategy::Custom(f) => Strategy::Custom(Arc::clone(f)),
        };
        Self { strategy }
    }
}

impl<K> fmt::Debug for Sharding<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.strategy {
            Strategy::Builtin(_) => write!(f, "Sharding::Builtin"),
            Strategy::Custom(_) => write!(f, "Sharding::Custom(...)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_reference_vectors() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_string_types_agree() {
        let expected = fnv1a_32(b"elephant");
        assert_eq!("elephant".shard_hash(), expected);
        assert_eq!("elephant".to_string().shard_hash(), expected);
        assert_eq!(Arc::<str>::from("elephant").shard_hash(), expected);
        assert_eq!(Cow::Borrowed("elephant").shard_hash(), expected);
        assert_eq!(b"elephant".to_vec().shard_hash(), expected);
    }

    #[test]
    fn test_display_matches_rendered_text() {
        struct Animal(&'static str);

        impl fmt::Display for Animal {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        let sharding = Sharding::<Animal>::display();
        assert_eq!(sharding.hash(&Animal("elephant")), fnv1a_32(b"elephant"));
    }

    #[test]
    fn test_shard_index_in_range() {
        let sharding = Sharding::<u32>::fnv1a();
        for key in 0..1000u32 {
            assert!(sharding.shard_index(&key, 7) < 7);
        }
    }

    #[test]
    fn test_ahash_deterministic() {
        let sharding = Sharding::<(u8, &str)>::ahash();
        assert_eq!(sharding.hash(&(1, "x")), sharding.hash(&(1, "x")));
    }

    #[test]
    fn test_clone_keeps_custom_function() {
        let sharding = Sharding::<String>::custom(|key| key.len() as u32);
        let cloned = sharding.clone();
        assert_eq!(cloned.hash(&"abc".to_string()), 3);
    }
}
