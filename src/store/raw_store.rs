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


use serde_json::value::RawValue;

use crate::{kvstore, prelude::*};

/// Upper bound on block numbers the key scheme can represent. Keys encode
/// `MAX_BLOCK_NUMBER - number` so ascending key order is descending block
/// order, which makes "latest first" a plain forward scan.
pub const MAX_BLOCK_NUMBER: i64 = 1_000_000_000;
const PAD_WIDTH: usize = 10;

pub const FAMILY_BLOCK: &str = "b";
pub const FAMILY_RECEIPTS: &str = "r";
pub const FAMILY_TRACES: &str = "t";
pub const FAMILY_UNCLES: &str = "u";
const META_PREFIX: &str = "m";

/// `{chain}:{zero-padded(MAX_BLOCK_NUMBER - number)}`
pub fn block_row_key(chain_id: u64, number: i64) -> String {
    format!(
        "{}:{:0width$}",
        chain_id,
        MAX_BLOCK_NUMBER - number,
        width = PAD_WIDTH
    )
}

pub fn family_key(family: &str, chain_id: u64, number: i64) -> String {
    format!("{}:{}", family, block_row_key(chain_id, number))
}

/// Inverse of [`block_row_key`] applied to a family-prefixed key.
pub fn number_from_key(key: &str) -> Result<(u64, i64)> {
    let mut parts = key.splitn(3, ':');
    let _family = parts.next();
    let chain = parts
        .next()
        .and_then(|c| c.parse::<u64>().ok())
        .ok_or_else(|| eyre!("malformed raw store key: {key}"))?;
    let reversed = parts
        .next()
        .and_then(|n| n.parse::<i64>().ok())
        .ok_or_else(|| eyre!("malformed raw store key: {key}"))?;
    Ok((chain, MAX_BLOCK_NUMBER - reversed))
}

/// Scan-optimized store for raw block payloads. One row per block, four
/// independently compressed column groups (block, receipts, traces, uncles).
#[derive(Clone)]
pub struct RawBlockStore<Store = KVStoreErased> {
    pub store: Store,
}

impl<Store: KVStore> RawBlockStore<Store> {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn validate(bundle: &BlockBundle) -> Result<()> {
        ensure!(
            bundle.number >= 0 && bundle.number < MAX_BLOCK_NUMBER,
            "block number {} outside representable range",
            bundle.number
        );
        ensure!(
            !bundle.block.is_empty(),
            "refusing to write block {} with empty block payload",
            bundle.number
        );
        ensure!(
            !bundle.has_txs() || !bundle.traces.is_empty(),
            "refusing to write block {} with {} txs but empty traces",
            bundle.number,
            bundle.tx_hashes.len()
        );
        ensure!(
            bundle.uncles.len() == bundle.uncles_count,
            "block {} carries {} uncle payloads but reports {}",
            bundle.number,
            bundle.uncles.len(),
            bundle.uncles_count
        );
        Ok(())
    }

    fn encode_rows(bundle: &BlockBundle) -> Result<Vec<(String, Vec<u8>)>> {
        Self::validate(bundle)?;
        let mut rows = vec![
            (
                family_key(FAMILY_BLOCK, bundle.chain_id, bundle.number),
                compress(&bundle.block)?,
            ),
            (
                family_key(FAMILY_RECEIPTS, bundle.chain_id, bundle.number),
                compress(&bundle.receipts)?,
            ),
            (
                family_key(FAMILY_TRACES, bundle.chain_id, bundle.number),
                compress(&bundle.traces)?,
            ),
        ];
        if bundle.uncles_count > 0 {
            let array = format!("[{}]", bundle.uncles.join(","));
            rows.push((
                family_key(FAMILY_UNCLES, bundle.chain_id, bundle.number),
                compress(array.as_bytes())?,
            ));
        }
        Ok(rows)
    }

    pub async fn write_bundle(&self, bundle: &BlockBundle) -> Result<()> {
        self.write_bundles(std::slice::from_ref(bundle)).await
    }

    /// Idempotent bulk upsert keyed by (chain, number): re-writing a bundle
    /// produces byte-identical rows.
    pub async fn write_bundles(&self, bundles: &[BlockBundle]) -> Result<()> {
        let mut rows = Vec::with_capacity(bundles.len() * 4);
        for bundle in bundles {
            rows.extend(Self::encode_rows(bundle)?);
        }
        self.store.bulk_put(rows).await
    }

    pub async fn read_bundle(&self, chain_id: u64, number: i64) -> Result<Option<BlockBundle>> {
        let block_key = family_key(FAMILY_BLOCK, chain_id, number);
        let Some(block_bytes) = kvstore::retry(|| self.store.get(&block_key)).await? else {
            return Ok(None);
        };

        let keys = vec![
            family_key(FAMILY_RECEIPTS, chain_id, number),
            family_key(FAMILY_TRACES, chain_id, number),
            family_key(FAMILY_UNCLES, chain_id, number),
        ];
        let mut rest = self.store.bulk_get(&keys).await?;

        let receipts = match rest.remove(&keys[0]) {
            Some(bytes) => decompress(&bytes)?,
            None => Vec::new(),
        };
        let traces = match rest.remove(&keys[1]) {
            Some(bytes) => decompress(&bytes)?,
            None => Vec::new(),
        };
        let uncles = match rest.remove(&keys[2]) {
            Some(bytes) => decode_uncles(&decompress(&bytes)?)?,
            None => Vec::new(),
        };

        Some(assemble_bundle(
            chain_id,
            number,
            &decompress(&block_bytes)?,
            receipts,
            traces,
            uncles,
        ))
        .transpose()
    }

    /// Read a contiguous range. Rows come back in key order, i.e. descending
    /// block number.
    pub async fn read_range(&self, chain_id: u64, range: BlockRange) -> Result<Vec<BlockBundle>> {
        let start = family_key(FAMILY_BLOCK, chain_id, range.end);
        let end = family_key(FAMILY_BLOCK, chain_id, range.start);
        let rows = self
            .store
            .scan_range(&start, &end, range.count() as usize)
            .await?;

        let mut sidecar_keys = Vec::with_capacity(rows.len() * 3);
        let mut numbers = Vec::with_capacity(rows.len());
        for (key, _) in &rows {
            let (_, number) = number_from_key(key)?;
            numbers.push(number);
            sidecar_keys.push(family_key(FAMILY_RECEIPTS, chain_id, number));
            sidecar_keys.push(family_key(FAMILY_TRACES, chain_id, number));
            sidecar_keys.push(family_key(FAMILY_UNCLES, chain_id, number));
        }
        let mut sidecars = self.store.bulk_get(&sidecar_keys).await?;

        let mut bundles = Vec::with_capacity(rows.len());
        for ((_, block_bytes), number) in rows.iter().zip(numbers) {
            let take = |family: &str, sidecars: &mut HashMap<String, Bytes>| {
                sidecars.remove(&family_key(family, chain_id, number))
            };
            let receipts = match take(FAMILY_RECEIPTS, &mut sidecars) {
                Some(bytes) => decompress(&bytes)?,
                None => Vec::new(),
            };
            let traces = match take(FAMILY_TRACES, &mut sidecars) {
                Some(bytes) => decompress(&bytes)?,
                None => Vec::new(),
            };
            let uncles = match take(FAMILY_UNCLES, &mut sidecars) {
                Some(bytes) => decode_uncles(&decompress(&bytes)?)?,
                None => Vec::new(),
            };
            bundles.push(assemble_bundle(
                chain_id,
                number,
                &decompress(block_bytes)?,
                receipts,
                traces,
                uncles,
            )?);
        }
        Ok(bundles)
    }

    /// Hashes of persisted blocks in the range, ascending by block number.
    /// Feeds the reorg diff without materializing sidecar payloads.
    pub async fn read_hashes(&self, chain_id: u64, range: BlockRange) -> Result<Vec<(i64, B256)>> {
        let start = family_key(FAMILY_BLOCK, chain_id, range.end);
        let end = family_key(FAMILY_BLOCK, chain_id, range.start);
        let rows = self
            .store
            .scan_range(&start, &end, range.count() as usize)
            .await?;

        let mut hashes = Vec::with_capacity(rows.len());
        for (key, bytes) in rows {
            let (_, number) = number_from_key(&key)?;
            let block: BlockJson = serde_json::from_slice(&decompress(&bytes)?)
                .wrap_err_with(|| format!("corrupt block payload at {key}"))?;
            hashes.push((number, block.hash));
        }
        hashes.reverse();
        Ok(hashes)
    }

    pub async fn update_latest(&self, chain_id: u64, number: i64) -> Result<()> {
        let key = format!("{META_PREFIX}:{chain_id}:latest");
        self.store.put(&key, number.to_string().into_bytes()).await
    }

    pub async fn get_latest(&self, chain_id: u64) -> Result<Option<i64>> {
        let key = format!("{META_PREFIX}:{chain_id}:latest");
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes.to_vec()).wrap_err("Invalid UTF-8 sequence")?;
        text.parse::<i64>()
            .map(Some)
            .wrap_err_with(|| format!("Unable to parse latest block checkpoint, value: {text}"))
    }
}

fn assemble_bundle(
    chain_id: u64,
    number: i64,
    block: &[u8],
    receipts: Vec<u8>,
    traces: Vec<u8>,
    uncles: Vec<String>,
) -> Result<BlockBundle> {
    let parsed: BlockJson = serde_json::from_slice(block)
        .wrap_err_with(|| format!("corrupt block payload for block {number}"))?;
    Ok(BlockBundle {
        chain_id,
        number,
        hash: parsed.hash,
        parent_hash: parsed.parent_hash,
        uncles_count: parsed.uncles.len(),
        tx_hashes: parsed.transactions.iter().map(|t| t.hash()).collect(),
        block: block.to_vec(),
        receipts,
        traces,
        uncles,
    })
}

fn decode_uncles(bytes: &[u8]) -> Result<Vec<String>> {
    let raw: Vec<Box<RawValue>> =
        serde_json::from_slice(bytes).wrap_err("corrupt uncles payload")?;
    Ok(raw.into_iter().map(|v| v.get().to_owned()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn key_order_is_reverse_block_order() {
        // a < b must encode to a lexicographically greater key
        let a = block_row_key(1, 100);
        let b = block_row_key(1, 101);
        assert!(a > b);

        let keys: Vec<String> = (0..20).map(|n| block_row_key(1, n)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        let reversed: Vec<String> = keys.iter().rev().cloned().collect();
        assert_eq!(sorted, reversed);
    }

    #[test]
    fn key_round_trip() {
        let key = family_key(FAMILY_BLOCK, 5, 1234);
        assert_eq!(number_from_key(&key).unwrap(), (5, 1234));
        assert!(number_from_key("garbage").is_err());
    }

    #[tokio::test]
    async fn write_validation() {
        let store = RawBlockStore::new(MemoryStorage::new("raw"));

        let mut empty_block = mock_bundle(1, 5);
        empty_block.block.clear();
        assert!(store.write_bundle(&empty_block).await.is_err());

        let mut missing_traces = mock_bundle_with_txs(1, 5, 2);
        missing_traces.traces.clear();
        assert!(store.write_bundle(&missing_traces).await.is_err());

        let mut missing_uncle = mock_bundle(1, 5);
        missing_uncle.uncles_count = 1;
        assert!(store.write_bundle(&missing_uncle).await.is_err());
    }

    #[tokio::test]
    async fn point_read_round_trip() {
        let store = RawBlockStore::new(MemoryStorage::new("raw"));
        let bundle = mock_bundle_with_txs(1, 42, 3);
        store.write_bundle(&bundle).await.unwrap();

        let read = store.read_bundle(1, 42).await.unwrap().unwrap();
        assert_eq!(read, bundle);
        assert_eq!(store.read_bundle(1, 43).await.unwrap(), None);
    }

    #[tokio::test]
    async fn range_read_is_descending() {
        let store = RawBlockStore::new(MemoryStorage::new("raw"));
        for n in 10..=15 {
            store.write_bundle(&mock_bundle(1, n)).await.unwrap();
        }
        // different chain must not leak into the scan
        store.write_bundle(&mock_bundle(2, 12)).await.unwrap();

        let bundles = store
            .read_range(1, BlockRange::new(11, 14).unwrap())
            .await
            .unwrap();
        let numbers: Vec<i64> = bundles.iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![14, 13, 12, 11]);
    }

    #[tokio::test]
    async fn hash_read_ascending() {
        let store = RawBlockStore::new(MemoryStorage::new("raw"));
        for n in 3..=6 {
            store.write_bundle(&mock_bundle(1, n)).await.unwrap();
        }
        let hashes = store
            .read_hashes(1, BlockRange::new(3, 6).unwrap())
            .await
            .unwrap();
        assert_eq!(
            hashes,
            (3..=6).map(|n| (n, test_hash(n))).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn latest_checkpoint() {
        let store = RawBlockStore::new(MemoryStorage::new("raw"));
        assert_eq!(store.get_latest(1).await.unwrap(), None);
        store.update_latest(1, 77).await.unwrap();
        assert_eq!(store.get_latest(1).await.unwrap(), Some(77));
    }

    #[tokio::test]
    async fn idempotent_rewrite() {
        let storage = MemoryStorage::new("raw");
        let store = RawBlockStore::new(storage.clone());
        let bundles: Vec<BlockBundle> = (0..5).map(|n| mock_bundle_with_txs(1, n, 1)).collect();

        store.write_bundles(&bundles).await.unwrap();
        let first = storage.dump().await;
        store.write_bundles(&bundles).await.unwrap();
        let second = storage.dump().await;
        assert_eq!(first, second);
    }
}
