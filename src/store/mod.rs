//! Position-indexed sequential block cache.
//!
//! Values of type `T` live in fixed-width blocks keyed by clamped position
//! (the largest multiple of the block width at or below the position).
//! Blocks are created lazily, loaded through a pluggable provider and
//! persisted explicitly or on drop. Provider failures are soft: the block
//! simply stays (or becomes) empty.

pub mod file_provider;

pub use file_provider::FileCacheProvider;

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Largest multiple of `block_width` at or below `position` (floor
/// semantics, also for negative positions).
pub fn clamped_position(position: i32, block_width: i32) -> i32 {
    assert!(block_width > 0, "cache block width must be positive");
    block_width * position.div_euclid(block_width)
}

/// Offset of `position` within its block.
pub fn clamped_position_offset(position: i32, block_width: i32) -> i32 {
    position - clamped_position(position, block_width)
}

/// Entry index when a block is subdivided into `num_block_entries` slots.
pub fn index_from_position(position: i32, block_width: i32, num_block_entries: i32) -> i32 {
    assert!(num_block_entries > 0, "block entry count must be positive");
    let entry_width = (block_width / num_block_entries).max(1);
    clamped_position_offset(position, block_width) / entry_width
}

/// Storage name of a block: `{prefix}_{width}_{clamped_position}`.
pub fn cache_block_name(prefix: &str, block_width: i32, clamped_pos: i32) -> String {
    format!("{prefix}_{block_width}_{clamped_pos}")
}

/// Cache keys become filename stems, so the separators are reserved.
pub fn is_valid_cache_key(cache_key: &str) -> bool {
    !cache_key.is_empty() && !cache_key.contains(['_', '.'])
}

/// Persistence backend for serialized blocks.
pub trait CacheProvider: Send + Sync {
    /// Store `bytes` under `path`. Returns false on failure.
    fn persist(&self, path: &str, bytes: &[u8]) -> bool;

    /// Fetch the bytes stored under `path`, or `None`.
    fn provide(&self, path: &str) -> Option<Vec<u8>>;
}

/// Provider that never has anything and never stores anything.
#[derive(Default)]
pub struct NullCacheProvider;

impl CacheProvider for NullCacheProvider {
    fn persist(&self, _path: &str, _bytes: &[u8]) -> bool {
        false
    }

    fn provide(&self, _path: &str) -> Option<Vec<u8>> {
        None
    }
}

/// Lock-scoped mutable view of a block's data. Allocates a default value on
/// first access.
pub struct Guarded<'a, T: Default> {
    guard: MutexGuard<'a, Option<T>>,
}

impl<T: Default> Deref for Guarded<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.as_ref().expect("block data allocated on guard")
    }
}

impl<T: Default> DerefMut for Guarded<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().expect("block data allocated on guard")
    }
}

/// One lazily constructed block of serialized data.
pub struct CacheBlock<T: Serialize + DeserializeOwned + Default + Send> {
    path: String,
    data: Mutex<Option<T>>,
    provider: Arc<dyn CacheProvider>,
}

impl<T> CacheBlock<T>
where
    T: Serialize + DeserializeOwned + Default + Send,
{
    pub fn new(path: impl Into<String>, provider: Arc<dyn CacheProvider>) -> Self {
        Self {
            path: path.into(),
            data: Mutex::new(None),
            provider,
        }
    }

    /// Create and immediately try to load from the provider.
    pub fn provisioned(path: impl Into<String>, provider: Arc<dyn CacheProvider>) -> Self {
        let block = Self::new(path, provider);
        block.provide();
        block
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn has_data(&self) -> bool {
        self.data.lock().map(|data| data.is_some()).unwrap_or(false)
    }

    /// Allocate default data if none is present.
    pub fn allocate(&self) {
        if let Ok(mut data) = self.data.lock() {
            if data.is_none() {
                *data = Some(T::default());
            }
        }
    }

    /// Mutable access to the data, allocating a default value if absent.
    /// Holds the block's mutex for the guard's lifetime.
    pub fn get(&self) -> Guarded<'_, T> {
        let mut guard = self.data.lock().unwrap_or_else(|poison| poison.into_inner());
        if guard.is_none() {
            *guard = Some(T::default());
        }
        Guarded { guard }
    }

    /// Serialize and hand the bytes to the provider. False when there is no
    /// data or the provider refuses.
    pub fn persist(&self) -> bool {
        let bytes = {
            let Ok(data) = self.data.lock() else {
                return false;
            };
            let Some(value) = data.as_ref() else {
                return false;
            };
            match bincode::serialize(value) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(path = %self.path, error = %err, "cache block serialize failed");
                    return false;
                }
            }
        };
        self.provider.persist(&self.path, &bytes)
    }

    /// Ask the provider for bytes and deserialize them. On any failure the
    /// block keeps its previous state; bytes are never applied partially.
    pub fn provide(&self) -> bool {
        let Some(bytes) = self.provider.provide(&self.path) else {
            return false;
        };
        if bytes.is_empty() {
            return false;
        }
        match bincode::deserialize::<T>(&bytes) {
            Ok(value) => {
                if let Ok(mut data) = self.data.lock() {
                    *data = Some(value);
                    true
                } else {
                    false
                }
            }
            Err(err) => {
                warn!(path = %self.path, error = %err, "cache block deserialize failed");
                false
            }
        }
    }
}

impl<T: Serialize + DeserializeOwned + Default + Send> Drop for CacheBlock<T> {
    fn drop(&mut self) {
        // Best-effort persist of whatever the block holds.
        let data = match self.data.get_mut() {
            Ok(data) => data,
            Err(poison) => poison.into_inner(),
        };
        if let Some(value) = data.as_ref() {
            if let Ok(bytes) = bincode::serialize(value) {
                self.provider.persist(&self.path, &bytes);
            }
        }
    }
}

/// Blocks of one cache key, all of the same width.
pub struct SequentialCache<T: Serialize + DeserializeOwned + Default + Send> {
    cache_key: String,
    block_width: i32,
    blocks: Mutex<BTreeMap<i32, Arc<CacheBlock<T>>>>,
    provider: Arc<dyn CacheProvider>,
}

impl<T> SequentialCache<T>
where
    T: Serialize + DeserializeOwned + Default + Send,
{
    pub fn new(cache_key: impl Into<String>, block_width: i32, provider: Arc<dyn CacheProvider>) -> Self {
        assert!(block_width > 0, "cache block width cannot be zero");
        Self {
            cache_key: cache_key.into(),
            block_width,
            blocks: Mutex::new(BTreeMap::new()),
            provider,
        }
    }

    pub fn block_width(&self) -> i32 {
        self.block_width
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn has(&self, position: i32) -> bool {
        let clamped = clamped_position(position, self.block_width);
        self.blocks
            .lock()
            .map(|blocks| blocks.contains_key(&clamped))
            .unwrap_or(false)
    }

    /// Look up or create the block covering `position`. Unless
    /// `no_provisioning` is set, a newly created block immediately asks the
    /// provider for data. The map lock is released before provider calls.
    pub fn get(&self, position: i32, no_provisioning: bool) -> Arc<CacheBlock<T>> {
        let clamped = clamped_position(position, self.block_width);
        let (block, created) = {
            let mut blocks = self
                .blocks
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            match blocks.get(&clamped) {
                Some(block) => (Arc::clone(block), false),
                None => {
                    let name = cache_block_name(&self.cache_key, self.block_width, clamped);
                    let block = Arc::new(CacheBlock::new(name, Arc::clone(&self.provider)));
                    blocks.insert(clamped, Arc::clone(&block));
                    (block, true)
                }
            }
        };
        if created && !no_provisioning {
            block.provide();
        }
        block
    }
}

/// Many sequential caches sharing one provider, keyed by cache key.
pub struct SequentialCacheStore<T: Serialize + DeserializeOwned + Default + Send> {
    caches: Mutex<BTreeMap<String, Arc<SequentialCache<T>>>>,
    provider: Arc<dyn CacheProvider>,
}

impl<T> SequentialCacheStore<T>
where
    T: Serialize + DeserializeOwned + Default + Send,
{
    pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
        Self {
            caches: Mutex::new(BTreeMap::new()),
            provider,
        }
    }

    pub fn has(&self, cache_key: &str, position: i32) -> bool {
        let cache = {
            let Ok(caches) = self.caches.lock() else {
                return false;
            };
            caches.get(cache_key).cloned()
        };
        cache.map(|cache| cache.has(position)).unwrap_or(false)
    }

    pub fn block_width(&self, cache_key: &str) -> i32 {
        self.caches
            .lock()
            .ok()
            .and_then(|caches| caches.get(cache_key).map(|cache| cache.block_width()))
            .unwrap_or(0)
    }

    /// The cache for `cache_key` if it exists.
    pub fn cache(&self, cache_key: &str) -> Option<Arc<SequentialCache<T>>> {
        self.caches.lock().ok()?.get(cache_key).cloned()
    }

    fn cache_or_create(&self, cache_key: &str, block_width: i32) -> Arc<SequentialCache<T>> {
        debug_assert!(is_valid_cache_key(cache_key), "cache key {cache_key:?}");
        if !is_valid_cache_key(cache_key) {
            warn!(cache_key, "cache key contains reserved characters");
        }
        let mut caches = self
            .caches
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        Arc::clone(caches.entry(cache_key.to_string()).or_insert_with(|| {
            Arc::new(SequentialCache::new(
                cache_key,
                block_width,
                Arc::clone(&self.provider),
            ))
        }))
    }

    /// Look up or create the block covering `position` in the cache for
    /// `cache_key`, creating the cache with `block_width` on first use.
    pub fn get(
        &self,
        cache_key: &str,
        position: i32,
        block_width: i32,
        no_provisioning: bool,
    ) -> Arc<CacheBlock<T>> {
        self.cache_or_create(cache_key, block_width)
            .get(position, no_provisioning)
    }

    /// Visit the blocks from `begin` toward `end` (either direction, one
    /// block width per step) until the callback returns false.
    pub fn for_each(
        &self,
        cache_key: &str,
        begin_position: i32,
        end_position: i32,
        block_width: i32,
        mut callback: impl FnMut(&CacheBlock<T>) -> bool,
    ) -> bool {
        let cache = self.cache_or_create(cache_key, block_width);
        let width = cache.block_width();
        let end = clamped_position(end_position, width);
        let mut position = clamped_position(begin_position, width);
        let mut visited = false;
        if begin_position <= end_position {
            while position <= end {
                let block = cache.get(position, false);
                visited = true;
                if !callback(&block) {
                    break;
                }
                position += width;
            }
        } else {
            while position >= end {
                let block = cache.get(position, false);
                visited = true;
                if !callback(&block) {
                    break;
                }
                position -= width;
            }
        }
        visited
    }

    /// Joint iteration over two aligned caches. Both must use the same block
    /// width.
    pub fn for_each2(
        &self,
        cache_key1: &str,
        cache_key2: &str,
        begin_position: i32,
        end_position: i32,
        block_width: i32,
        mut callback: impl FnMut(&CacheBlock<T>, &CacheBlock<T>) -> bool,
    ) -> bool {
        let cache1 = self.cache_or_create(cache_key1, block_width);
        let cache2 = self.cache_or_create(cache_key2, block_width);
        assert_eq!(
            cache1.block_width(),
            cache2.block_width(),
            "joint iteration requires equal block widths"
        );
        let width = cache1.block_width();
        let end = clamped_position(end_position, width);
        let mut position = clamped_position(begin_position, width);
        let mut visited = false;
        if begin_position <= end_position {
            while position <= end {
                let block1 = cache1.get(position, false);
                let block2 = cache2.get(position, false);
                visited = true;
                if !callback(&block1, &block2) {
                    break;
                }
                position += width;
            }
        } else {
            while position >= end {
                let block1 = cache1.get(position, false);
                let block2 = cache2.get(position, false);
                visited = true;
                if !callback(&block1, &block2) {
                    break;
                }
                position -= width;
            }
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped_position_math() {
        assert_eq!(clamped_position(25, 10), 20);
        assert_eq!(clamped_position(20, 10), 20);
        assert_eq!(clamped_position(0, 10), 0);
        assert_eq!(clamped_position(-5, 10), -10);
        // Idempotence.
        for p in [-37, -10, 0, 3, 10, 999] {
            let c = clamped_position(p, 7);
            assert_eq!(clamped_position(c, 7), c);
        }
        assert_eq!(clamped_position_offset(25, 10), 5);
        assert_eq!(index_from_position(25, 10, 5), 2);
        assert_eq!(cache_block_name("Key", 10, 20), "Key_10_20");
    }

    #[test]
    fn test_cache_key_validation() {
        assert!(is_valid_cache_key("EURUSD"));
        assert!(!is_valid_cache_key("EUR_USD"));
        assert!(!is_valid_cache_key("eur.usd"));
        assert!(!is_valid_cache_key(""));
    }

    #[test]
    fn test_block_is_lazy_and_allocates_default() {
        let provider: Arc<dyn CacheProvider> = Arc::new(NullCacheProvider);
        let block: CacheBlock<Vec<i32>> = CacheBlock::new("K_4_0", provider);
        assert!(!block.has_data());
        assert!(!block.persist());
        {
            let mut data = block.get();
            assert!(data.is_empty());
            data.push(7);
        }
        assert!(block.has_data());
        assert_eq!(block.get()[0], 7);
    }

    #[test]
    fn test_store_reuses_blocks_within_width() {
        let provider: Arc<dyn CacheProvider> = Arc::new(NullCacheProvider);
        let store: SequentialCacheStore<Vec<f32>> = SequentialCacheStore::new(provider);
        let a = store.get("Key", 25, 10, true);
        let b = store.get("Key", 21, 10, true);
        let c = store.get("Key", 31, 10, true);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.path(), "Key_10_20");
        assert!(store.has("Key", 25));
        assert!(!store.has("Key", 45));
        assert_eq!(store.block_width("Key"), 10);
        assert_eq!(store.block_width("Other"), 0);
    }

    #[test]
    fn test_for_each_visits_both_directions() {
        let provider: Arc<dyn CacheProvider> = Arc::new(NullCacheProvider);
        let store: SequentialCacheStore<Vec<f32>> = SequentialCacheStore::new(provider);
        let mut forward = Vec::new();
        store.for_each("Key", 0, 25, 10, |block| {
            forward.push(block.path().to_string());
            true
        });
        assert_eq!(forward, vec!["Key_10_0", "Key_10_10", "Key_10_20"]);

        let mut backward = Vec::new();
        store.for_each("Key", 20, 0, 10, |block| {
            backward.push(block.path().to_string());
            true
        });
        assert_eq!(backward, vec!["Key_10_20", "Key_10_10", "Key_10_0"]);
    }

    #[test]
    fn test_for_each_stops_when_callback_returns_false() {
        let provider: Arc<dyn CacheProvider> = Arc::new(NullCacheProvider);
        let store: SequentialCacheStore<Vec<f32>> = SequentialCacheStore::new(provider);
        let mut count = 0;
        store.for_each("Key", 0, 100, 10, |_| {
            count += 1;
            count < 3
        });
        assert_eq!(count, 3);
    }

    #[test]
    fn test_for_each2_pairs_blocks() {
        let provider: Arc<dyn CacheProvider> = Arc::new(NullCacheProvider);
        let store: SequentialCacheStore<Vec<f32>> = SequentialCacheStore::new(provider);
        let mut pairs = Vec::new();
        store.for_each2("AAA", "BBB", 0, 15, 10, |a, b| {
            pairs.push((a.path().to_string(), b.path().to_string()));
            true
        });
        assert_eq!(
            pairs,
            vec![
                ("AAA_10_0".to_string(), "BBB_10_0".to_string()),
                ("AAA_10_10".to_string(), "BBB_10_10".to_string()),
            ]
        );
    }
}
