//! Sequential block cache: file persistence round-trips, provisioning and
//! scanning existing storage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use phasor::store::{
    cache_block_name, clamped_position, CacheProvider, FileCacheProvider, SequentialCacheStore,
};

#[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
struct Data {
    value: i32,
}

#[test]
fn test_store_roundtrip_through_file_provider() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn CacheProvider> = Arc::new(FileCacheProvider::new(dir.path(), ".test"));
    {
        let store: SequentialCacheStore<Data> = SequentialCacheStore::new(Arc::clone(&provider));
        let block = store.get("Key", 25, 10, false);
        block.allocate();
        block.get().value = 1;
        assert!(block.persist());
    }
    {
        let store: SequentialCacheStore<Data> = SequentialCacheStore::new(Arc::clone(&provider));
        let block = store.get("Key", 25, 10, true);
        assert!(!block.has_data());
        assert!(block.provide());
        assert!(block.has_data());
        assert_eq!(block.get().value, 1);
    }
}

#[test]
fn test_blocks_persist_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn CacheProvider> = Arc::new(FileCacheProvider::new(dir.path(), ".test"));
    {
        let store: SequentialCacheStore<Data> = SequentialCacheStore::new(Arc::clone(&provider));
        store.get("Key", 5, 10, false).get().value = 42;
        // No explicit persist: dropping the store flushes the block.
    }
    let store: SequentialCacheStore<Data> = SequentialCacheStore::new(provider);
    let block = store.get("Key", 5, 10, false);
    assert_eq!(block.get().value, 42);
}

#[test]
fn test_get_provisions_from_existing_storage() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FileCacheProvider::new(dir.path(), ".test");
    let bytes = bincode::serialize(&Data { value: 7 }).unwrap();
    assert!(provider.persist(&cache_block_name("Key", 10, 20), &bytes));

    let shared: Arc<dyn CacheProvider> = Arc::new(provider);
    let store: SequentialCacheStore<Data> = SequentialCacheStore::new(shared);
    // Position 25 clamps into the block at 20 and loads it eagerly.
    let block = store.get("Key", 25, 10, false);
    assert!(block.has_data());
    assert_eq!(block.get().value, 7);

    // With provisioning disabled the block stays empty until asked.
    let lazy = store.get("Key", 35, 10, true);
    assert!(!lazy.has_data());
}

#[test]
fn test_corrupt_bytes_leave_block_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FileCacheProvider::new(dir.path(), ".test");
    assert!(provider.persist(&cache_block_name("Key", 10, 0), &[0xff; 3]));

    let shared: Arc<dyn CacheProvider> = Arc::new(provider);
    let store: SequentialCacheStore<Data> = SequentialCacheStore::new(shared);
    let block = store.get("Key", 0, 10, true);
    assert!(!block.provide());
    assert!(!block.has_data());
    // First access still yields a default value.
    assert_eq!(block.get().value, 0);
}

#[test]
fn test_scan_recovers_block_positions() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FileCacheProvider::new(dir.path(), ".test");
    let bytes = bincode::serialize(&Data { value: 1 }).unwrap();
    for position in [0, 10, 30] {
        provider.persist(&cache_block_name("Key", 10, position), &bytes);
    }
    provider.persist(&cache_block_name("Unrelated", 10, 0), &bytes);

    let mut positions = Vec::new();
    FileCacheProvider::scan(dir.path(), ".test", "Key", &mut |pos, width| {
        assert_eq!(width, 10);
        positions.push(pos);
    });
    positions.sort();
    assert_eq!(positions, vec![0, 10, 30]);
}

#[test]
fn test_for_each_walks_persisted_range() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn CacheProvider> = Arc::new(FileCacheProvider::new(dir.path(), ".test"));
    {
        let store: SequentialCacheStore<Data> = SequentialCacheStore::new(Arc::clone(&provider));
        for position in [0, 10, 20] {
            store.get("Key", position, 10, false).get().value = position;
        }
    }
    let store: SequentialCacheStore<Data> = SequentialCacheStore::new(provider);
    let mut seen = Vec::new();
    store.for_each("Key", 0, 25, 10, |block| {
        seen.push(block.get().value);
        true
    });
    assert_eq!(seen, vec![0, 10, 20]);
}

#[test]
fn test_clamping_invariants() {
    for (position, width, expected) in [(25, 10, 20), (9, 10, 0), (10, 10, 10), (-1, 10, -10)] {
        assert_eq!(clamped_position(position, width), expected);
    }
}
