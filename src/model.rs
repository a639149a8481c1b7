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


use std::future::Future;

use serde::Deserialize;

use crate::prelude::*;

/// Inclusive range of block numbers, caller-constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: i64,
    pub end: i64,
}

impl BlockRange {
    pub fn new(start: i64, end: i64) -> Result<Self> {
        ensure!(start >= 0, "block range start must be non-negative, got {start}");
        ensure!(
            start <= end,
            "invalid block range: start {start} > end {end}"
        );
        Ok(Self { start, end })
    }

    pub fn count(&self) -> u64 {
        (self.end - self.start + 1) as u64
    }

    pub fn blocks(&self) -> RangeInclusive<i64> {
        self.start..=self.end
    }

    pub fn contains(&self, n: i64) -> bool {
        self.start <= n && n <= self.end
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.start, self.end)
    }
}

/// In-memory unit holding one block's raw payloads for a single fetch cycle.
/// Payloads are the node's JSON responses verbatim; compression happens at the
/// store boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBundle {
    pub chain_id: u64,
    pub number: i64,
    pub hash: B256,
    pub parent_hash: B256,
    pub uncles_count: usize,
    pub tx_hashes: Vec<B256>,
    /// Raw JSON block object from eth_getBlockByNumber
    pub block: Vec<u8>,
    /// Raw JSON receipts array
    pub receipts: Vec<u8>,
    /// Raw JSON traces array
    pub traces: Vec<u8>,
    /// Raw JSON uncle objects, exactly `uncles_count` once fetched
    pub uncles: Vec<String>,
}

impl BlockBundle {
    pub fn has_txs(&self) -> bool {
        !self.tx_hashes.is_empty()
    }
}

/// Minimal serde view of an RPC block object. Only the fields the exporter
/// needs to cross-check and key the payload; everything else stays opaque.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockJson {
    pub number: String,
    pub hash: B256,
    #[serde(rename = "parentHash")]
    pub parent_hash: B256,
    #[serde(default)]
    pub transactions: Vec<TxJson>,
    #[serde(default)]
    pub uncles: Vec<B256>,
}

/// `eth_getBlockByNumber` returns tx objects with the second param `true` and
/// bare hashes with `false`; both shapes appear on the fetch paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TxJson {
    Full { hash: B256 },
    HashOnly(B256),
}

impl TxJson {
    pub fn hash(&self) -> B256 {
        match self {
            TxJson::Full { hash } => *hash,
            TxJson::HashOnly(hash) => *hash,
        }
    }
}

/// Parse a JSON-RPC hex quantity ("0x1b4") into an i64.
pub fn parse_quantity(s: &str) -> Result<i64> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| eyre!("quantity missing 0x prefix: {s}"))?;
    i64::from_str_radix(digits, 16).wrap_err_with(|| format!("invalid hex quantity: {s}"))
}

/// Seam between the export engine and the node transport. The production
/// implementation batches JSON-RPC; tests substitute a scripted fetcher.
/// Futures carry a `Send` bound so engine work can cross task boundaries.
pub trait BlockFetcher: Clone + Send + Sync {
    fn chain_id(&self) -> u64;
    fn latest_block(&self) -> impl Future<Output = Result<i64>> + Send;
    /// Fetch full bundles (block, uncles, receipts, traces) for the numbers.
    fn fetch_bundles(&self, numbers: &[i64]) -> impl Future<Output = Result<Vec<BlockBundle>>> + Send;
    /// Hash-only fetch for the reorg path, ascending by block number.
    fn fetch_hashes(&self, range: BlockRange) -> impl Future<Output = Result<Vec<(i64, B256)>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_validation() {
        assert!(BlockRange::new(5, 4).is_err());
        assert!(BlockRange::new(-1, 4).is_err());
        let r = BlockRange::new(3, 7).unwrap();
        assert_eq!(r.count(), 5);
        assert!(r.contains(3) && r.contains(7) && !r.contains(8));
    }

    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert!(parse_quantity("1b4").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn block_json_accepts_both_tx_shapes() {
        let body = r#"{
            "number": "0x2",
            "hash": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "parentHash": "0x0202020202020202020202020202020202020202020202020202020202020202",
            "transactions": [
                {"hash": "0x0303030303030303030303030303030303030303030303030303030303030303", "gas": "0x5208"},
                "0x0404040404040404040404040404040404040404040404040404040404040404"
            ],
            "uncles": []
        }"#;
        let block: BlockJson = serde_json::from_str(body).unwrap();
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].hash(), B256::repeat_byte(3));
        assert_eq!(block.transactions[1].hash(), B256::repeat_byte(4));
    }
}
