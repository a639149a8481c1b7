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


use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// One `raw_block_status` row: persisted alongside the raw payloads so the
/// downstream indexer can find blocks that still need (re-)indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStatus {
    pub chain_id: u64,
    pub block_id: i64,
    pub block_hash: B256,
    pub indexed_bt: bool,
}

impl BlockStatus {
    pub fn new(chain_id: u64, block_id: i64, block_hash: B256) -> Self {
        Self {
            chain_id,
            block_id,
            block_hash,
            indexed_bt: false,
        }
    }
}

pub trait StatusStore: Clone {
    /// Upsert rows keyed by (chain, block). The stored hash is overwritten
    /// only when it differs, and that overwrite flips `indexed_bt` back to
    /// false to signal re-indexing. A matching hash leaves the row untouched.
    async fn upsert(&self, rows: &[BlockStatus]) -> Result<()>;
    async fn get(&self, chain_id: u64, block_id: i64) -> Result<Option<BlockStatus>>;
    /// All persisted block ids for a chain, ascending. Drives gap detection.
    async fn present_ids(&self, chain_id: u64) -> Result<Vec<i64>>;
}

/// Status rows layered over the KV backend under an `s:` prefix, zero-padded
/// so `present_ids` is a single ordered prefix scan.
#[derive(Clone)]
pub struct KvStatusStore<Store = KVStoreErased> {
    pub store: Store,
}

const STATUS_PAD: usize = 10;

fn status_key(chain_id: u64, block_id: i64) -> String {
    format!("s:{}:{:0width$}", chain_id, block_id, width = STATUS_PAD)
}

impl<Store: KVStore> KvStatusStore<Store> {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl<Store: KVStore> StatusStore for KvStatusStore<Store> {
    async fn upsert(&self, rows: &[BlockStatus]) -> Result<()> {
        let mut writes = Vec::with_capacity(rows.len());
        for row in rows {
            let key = status_key(row.chain_id, row.block_id);
            let next = match self.store.get(&key).await? {
                Some(bytes) => {
                    let existing: BlockStatus =
                        serde_json::from_slice(&bytes).wrap_err("corrupt status row")?;
                    if existing.block_hash == row.block_hash {
                        continue;
                    }
                    BlockStatus {
                        block_hash: row.block_hash,
                        indexed_bt: false,
                        ..existing
                    }
                }
                None => BlockStatus::new(row.chain_id, row.block_id, row.block_hash),
            };
            writes.push((key, serde_json::to_vec(&next)?));
        }
        if writes.is_empty() {
            return Ok(());
        }
        self.store.bulk_put(writes).await
    }

    async fn get(&self, chain_id: u64, block_id: i64) -> Result<Option<BlockStatus>> {
        match self.store.get(&status_key(chain_id, block_id)).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).wrap_err("corrupt status row")?,
            )),
            None => Ok(None),
        }
    }

    async fn present_ids(&self, chain_id: u64) -> Result<Vec<i64>> {
        let prefix = format!("s:{}:", chain_id);
        let rows = self.store.scan_prefix(&prefix, usize::MAX).await?;
        rows.iter()
            .map(|(key, _)| {
                key[prefix.len()..]
                    .parse::<i64>()
                    .wrap_err_with(|| format!("malformed status key: {key}"))
            })
            .collect()
    }
}
