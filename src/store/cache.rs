// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.


use dashmap::DashMap;
use tokio::sync::Mutex;

use super::raw_store::block_row_key;
use crate::prelude::*;

/// Entries born from point reads live just long enough to absorb a burst of
/// identical lookups; range-populated entries stick around for a paging
/// client walking the same window.
pub const POINT_READ_TTL: Duration = Duration::from_secs(1);
pub const RANGE_READ_TTL: Duration = Duration::from_secs(30);

struct CacheEntry {
    bundle: BlockBundle,
    inserted: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn fresh(&self) -> bool {
        self.inserted.elapsed() < self.ttl
    }
}

/// Read-through cache over [`RawBlockStore`]. A per-key async lock map keeps
/// population single-flight and gives read-your-writes: a write invalidates
/// under the same lock a concurrent reader must take.
#[derive(Clone)]
pub struct CachedRawStore<Store = KVStoreErased> {
    pub store: RawBlockStore<Store>,
    entries: Arc<DashMap<String, CacheEntry>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    /// hash -> (chain, number), populated only for blocks carrying uncles.
    hash_index: Arc<DashMap<B256, (u64, i64)>>,
}

impl<Store: KVStore> CachedRawStore<Store> {
    pub fn new(store: RawBlockStore<Store>) -> Self {
        Self {
            store,
            entries: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            hash_index: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_owned())
            .or_default()
            .value()
            .clone()
    }

    fn release(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(key, |_, v| Arc::strong_count(v) <= 1);
    }

    /// Entries are deleted on first read to bound memory; a stale entry is
    /// dropped the same way.
    fn take_fresh(&self, key: &str) -> Option<BlockBundle> {
        let (_, entry) = self.entries.remove(key)?;
        entry.fresh().then_some(entry.bundle)
    }

    fn insert(&self, key: String, bundle: BlockBundle, ttl: Duration) {
        if bundle.uncles_count > 0 {
            self.hash_index
                .insert(bundle.hash, (bundle.chain_id, bundle.number));
        }
        self.entries.insert(
            key,
            CacheEntry {
                bundle,
                inserted: Instant::now(),
                ttl,
            },
        );
    }

    pub async fn get_block(&self, chain_id: u64, number: i64) -> Result<Option<BlockBundle>> {
        let key = block_row_key(chain_id, number);
        let lock = self.lock_for(&key);
        let guard = lock.clone().lock_owned().await;

        if let Some(bundle) = self.take_fresh(&key) {
            drop(guard);
            self.release(&key, lock);
            return Ok(Some(bundle));
        }

        let result = self.store.read_bundle(chain_id, number).await;
        if let Ok(Some(bundle)) = &result {
            self.insert(key.clone(), bundle.clone(), POINT_READ_TTL);
        }
        drop(guard);
        self.release(&key, lock);
        result
    }

    /// Block-by-hash is only served through the side index the cache builds
    /// for blocks with uncles; anything else is an explicit gap, not a miss.
    pub async fn get_block_by_hash(&self, hash: &B256) -> Result<Option<BlockBundle>> {
        let Some(entry) = self.hash_index.get(hash) else {
            bail!(
                "block-by-hash lookup is unimplemented except for cached blocks with uncles (hash {hash})"
            );
        };
        let (chain_id, number) = *entry;
        drop(entry);
        self.get_block(chain_id, number).await
    }

    pub async fn get_range(&self, chain_id: u64, range: BlockRange) -> Result<Vec<BlockBundle>> {
        let bundles = self.store.read_range(chain_id, range).await?;
        for bundle in &bundles {
            let key = block_row_key(chain_id, bundle.number);
            self.insert(key, bundle.clone(), RANGE_READ_TTL);
        }
        Ok(bundles)
    }

    /// Write passthrough that invalidates under the per-key locks, so a
    /// reader blocked on the same key observes the new bytes.
    pub async fn write_bundles(&self, bundles: &[BlockBundle]) -> Result<()> {
        self.store.write_bundles(bundles).await?;
        for bundle in bundles {
            let key = block_row_key(bundle.chain_id, bundle.number);
            let lock = self.lock_for(&key);
            let guard = lock.clone().lock_owned().await;
            self.entries.remove(&key);
            drop(guard);
            self.release(&key, lock);
        }
        Ok(())
    }
}
