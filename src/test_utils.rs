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


//! Deterministic fixtures shared by the unit tests: canned block bundles
//! whose JSON payloads stay consistent with the struct fields, and a
//! scripted [`BlockFetcher`] with failure injection.

use std::sync::Mutex;

use serde_json::json;

use crate::prelude::*;

/// Stable per-block hash: the block number in the low 8 bytes.
pub fn test_hash(n: i64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    B256::new(bytes)
}

fn block_payload(number: i64, hash: B256, parent: B256, txs: &[B256], uncles: &[B256]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "number": format!("0x{number:x}"),
        "hash": hash,
        "parentHash": parent,
        "transactions": txs,
        "uncles": uncles,
    }))
    .unwrap()
}

fn build_bundle(chain_id: u64, number: i64, hash: B256, ntx: usize, nuncles: usize) -> BlockBundle {
    let parent_hash = test_hash(number - 1);
    let tx_hashes: Vec<B256> = (0..ntx as i64)
        .map(|i| test_hash(number * 1_000 + i + 1))
        .collect();
    let uncle_hashes: Vec<B256> = (0..nuncles as i64)
        .map(|i| test_hash(number * 1_000 + 900 + i))
        .collect();
    let uncles: Vec<String> = uncle_hashes
        .iter()
        .map(|h| format!(r#"{{"hash":"{h}"}}"#))
        .collect();
    let receipts = if ntx > 0 {
        serde_json::to_vec(&tx_hashes
            .iter()
            .map(|h| json!({"transactionHash": h, "status": "0x1"}))
            .collect::<Vec<_>>())
        .unwrap()
    } else {
        b"[]".to_vec()
    };
    let traces = if ntx > 0 {
        serde_json::to_vec(&tx_hashes
            .iter()
            .map(|h| json!({"txHash": h, "result": {"type": "CALL"}}))
            .collect::<Vec<_>>())
        .unwrap()
    } else {
        b"[]".to_vec()
    };
    BlockBundle {
        chain_id,
        number,
        hash,
        parent_hash,
        uncles_count: nuncles,
        tx_hashes: tx_hashes.clone(),
        block: block_payload(number, hash, parent_hash, &tx_hashes, &uncle_hashes),
        receipts,
        traces,
        uncles,
    }
}

pub fn mock_bundle(chain_id: u64, number: i64) -> BlockBundle {
    build_bundle(chain_id, number, test_hash(number), 0, 0)
}

pub fn mock_bundle_with_txs(chain_id: u64, number: i64, ntx: usize) -> BlockBundle {
    build_bundle(chain_id, number, test_hash(number), ntx, 0)
}

pub fn mock_bundle_with_uncles(chain_id: u64, number: i64, nuncles: usize) -> BlockBundle {
    build_bundle(chain_id, number, test_hash(number), 1, nuncles)
}

/// Scripted fetcher. Hashes default to [`test_hash`]; `hash_overrides`
/// simulates a reorged segment, `fail_blocks`/`fail_multi` drive the retry
/// and bisection paths. Every `fetch_bundles` call is logged in `attempts`.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pub chain: u64,
    pub latest: Arc<AtomicI64>,
    pub attempts: Arc<Mutex<Vec<Vec<i64>>>>,
    pub fail_blocks: Arc<Mutex<HashSet<i64>>>,
    pub fail_multi: Arc<AtomicBool>,
    pub hash_overrides: Arc<Mutex<HashMap<i64, B256>>>,
    pub delays: Arc<Mutex<HashMap<i64, Duration>>>,
}

impl MockFetcher {
    pub fn new(chain: u64, latest: i64) -> Self {
        Self {
            chain,
            latest: Arc::new(AtomicI64::new(latest)),
            ..Default::default()
        }
    }

    pub fn hash_for(&self, number: i64) -> B256 {
        self.hash_overrides
            .lock()
            .unwrap()
            .get(&number)
            .copied()
            .unwrap_or_else(|| test_hash(number))
    }

    pub fn override_hash(&self, number: i64, hash: B256) {
        self.hash_overrides.lock().unwrap().insert(number, hash);
    }

    pub fn delay_block(&self, number: i64, delay: Duration) {
        self.delays.lock().unwrap().insert(number, delay);
    }

    pub fn fail_block(&self, number: i64) {
        self.fail_blocks.lock().unwrap().insert(number);
    }

    pub fn clear_failures(&self) {
        self.fail_blocks.lock().unwrap().clear();
        self.fail_multi.store(false, Ordering::SeqCst);
    }

    pub fn attempt_log(&self) -> Vec<Vec<i64>> {
        self.attempts.lock().unwrap().clone()
    }
}

impl BlockFetcher for MockFetcher {
    fn chain_id(&self) -> u64 {
        self.chain
    }

    async fn latest_block(&self) -> Result<i64> {
        Ok(self.latest.load(Ordering::SeqCst))
    }

    async fn fetch_bundles(&self, numbers: &[i64]) -> Result<Vec<BlockBundle>> {
        self.attempts.lock().unwrap().push(numbers.to_vec());
        let delay = {
            let delays = self.delays.lock().unwrap();
            numbers.iter().filter_map(|n| delays.get(n)).max().copied()
        };
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        if self.fail_multi.load(Ordering::SeqCst) && numbers.len() > 1 {
            bail!("scripted failure for multi-block request {numbers:?}");
        }
        {
            let failing = self.fail_blocks.lock().unwrap();
            if let Some(n) = numbers.iter().find(|n| failing.contains(n)) {
                bail!("scripted failure for block {n}");
            }
        }
        Ok(numbers
            .iter()
            .map(|&n| build_bundle(self.chain, n, self.hash_for(n), 1, 0))
            .collect())
    }

    async fn fetch_hashes(&self, range: BlockRange) -> Result<Vec<(i64, B256)>> {
        Ok(range.blocks().map(|n| (n, self.hash_for(n))).collect())
    }
}
