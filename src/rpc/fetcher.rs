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


use futures::future::BoxFuture;
use serde_json::json;

use super::transport::{JsonRpcClient, RpcRequest};
use crate::prelude::*;

/// Chains without `eth_getBlockReceipts`; receipts come one
/// `eth_getTransactionReceipt` at a time instead.
const RECEIPTS_BY_TX_CHAINS: &[u64] = &[61];

/// Chains that migrated tracer backends mid-history: (chain id, first block
/// served by `debug_traceBlockByNumber`). Blocks below the activation height
/// still answer the legacy `trace_block`.
const TRACER_MIGRATIONS: &[(u64, i64)] = &[(10, 105_235_063)];

fn hex_num(n: i64) -> String {
    format!("0x{n:x}")
}

fn uses_receipt_fallback(chain: u64) -> bool {
    RECEIPTS_BY_TX_CHAINS.contains(&chain)
}

fn trace_request(chain: u64, number: i64) -> RpcRequest {
    let legacy = TRACER_MIGRATIONS
        .iter()
        .any(|&(c, activation)| c == chain && number < activation);
    if legacy {
        RpcRequest::new("trace_block", json!([hex_num(number)]))
    } else {
        RpcRequest::new(
            "debug_traceBlockByNumber",
            json!([hex_num(number), {"tracer": "callTracer"}]),
        )
    }
}

/// [`BlockFetcher`] over batched JSON-RPC. One instance per chain; the chain
/// id is read from the node at connect time and drives receipt/trace dispatch.
#[derive(Clone)]
pub struct RpcBlockFetcher {
    client: JsonRpcClient,
    chain: u64,
    max_bulk: usize,
}

impl RpcBlockFetcher {
    pub async fn connect(client: JsonRpcClient, max_bulk: usize) -> Result<Self> {
        ensure!(max_bulk > 0, "max bulk size must be positive");
        let resp = client.call("eth_chainId", json!([])).await?;
        let quantity: String = resp
            .parse_result()?
            .ok_or_else(|| eyre!("node returned no chain id"))?;
        let chain = parse_quantity(&quantity)? as u64;
        info!(chain, "connected to chain");
        Ok(Self {
            client,
            chain,
            max_bulk,
        })
    }

    async fn fetch_blocks(&self, numbers: &[i64]) -> Result<Vec<(String, BlockJson)>> {
        let requests: Vec<RpcRequest> = numbers
            .iter()
            .map(|n| RpcRequest::new("eth_getBlockByNumber", json!([hex_num(*n), true])))
            .collect();
        let responses = self.client.batch(&requests).await?;

        let mut blocks = Vec::with_capacity(numbers.len());
        for (i, resp) in responses.into_iter().enumerate() {
            let number = numbers[i];
            if resp.id != i as i64 {
                warn!(expected = i, got = resp.id, number, "rpc id mismatch on block fetch");
            }
            let raw = resp
                .raw_result()?
                .ok_or_else(|| eyre!("block {number} not found on chain {}", self.chain))?;
            let parsed: BlockJson = serde_json::from_str(&raw)
                .wrap_err_with(|| format!("undecodable block {number}"))?;
            match parse_quantity(&parsed.number) {
                Ok(decoded) if decoded != number => {
                    warn!(requested = number, decoded, "block number mismatch in response")
                }
                Err(err) => warn!(number, %err, "unparseable block number in response"),
                _ => {}
            }
            blocks.push((raw, parsed));
        }
        Ok(blocks)
    }

    /// Uncle payloads for every bundle that reports them. A count outside
    /// {0,1,2} cannot come from a valid header and is fatal.
    async fn fetch_uncles(&self, bundles: &mut [BlockBundle]) -> Result<()> {
        let mut requests = Vec::new();
        let mut owners = Vec::new();
        for (slot, bundle) in bundles.iter().enumerate() {
            ensure!(
                bundle.uncles_count <= 2,
                "block {} reports {} uncles",
                bundle.number,
                bundle.uncles_count
            );
            for index in 0..bundle.uncles_count {
                requests.push(RpcRequest::new(
                    "eth_getUncleByBlockNumberAndIndex",
                    json!([hex_num(bundle.number), hex_num(index as i64)]),
                ));
                owners.push(slot);
            }
        }
        if requests.is_empty() {
            return Ok(());
        }

        let responses = self.client.batch(&requests).await?;
        for (resp, slot) in responses.into_iter().zip(owners) {
            let raw = resp.raw_result()?.ok_or_else(|| {
                eyre!("missing uncle payload for block {}", bundles[slot].number)
            })?;
            bundles[slot].uncles.push(raw);
        }
        Ok(())
    }

    async fn fetch_receipts(&self, bundles: &mut [BlockBundle]) -> Result<()> {
        if uses_receipt_fallback(self.chain) {
            return self.fetch_receipts_by_tx(bundles).await;
        }
        let requests: Vec<RpcRequest> = bundles
            .iter()
            .map(|b| RpcRequest::new("eth_getBlockReceipts", json!([hex_num(b.number)])))
            .collect();
        let responses = self.client.batch(&requests).await?;
        for (resp, bundle) in responses.into_iter().zip(bundles.iter_mut()) {
            let raw = resp
                .raw_result()?
                .ok_or_else(|| eyre!("missing receipts for block {}", bundle.number))?;
            bundle.receipts = raw.into_bytes();
        }
        Ok(())
    }

    /// Per-transaction fallback: batch tx hashes across blocks up to the bulk
    /// size, then demultiplex responses back to the owning block. Zero-tx
    /// blocks keep an empty receipts array without a round trip.
    async fn fetch_receipts_by_tx(&self, bundles: &mut [BlockBundle]) -> Result<()> {
        let mut owners = Vec::new();
        for (slot, bundle) in bundles.iter_mut().enumerate() {
            if !bundle.has_txs() {
                bundle.receipts = b"[]".to_vec();
                continue;
            }
            for hash in &bundle.tx_hashes {
                owners.push((slot, *hash));
            }
        }

        let mut per_block: HashMap<usize, Vec<String>> = HashMap::new();
        for chunk in owners.chunks(self.max_bulk) {
            let requests: Vec<RpcRequest> = chunk
                .iter()
                .map(|(_, hash)| RpcRequest::new("eth_getTransactionReceipt", json!([hash])))
                .collect();
            let responses = self.client.batch(&requests).await?;
            for (resp, (slot, hash)) in responses.into_iter().zip(chunk) {
                let raw = resp
                    .raw_result()?
                    .ok_or_else(|| eyre!("missing receipt for tx {hash}"))?;
                per_block.entry(*slot).or_default().push(raw);
            }
        }

        for (slot, receipts) in per_block {
            bundles[slot].receipts = format!("[{}]", receipts.join(",")).into_bytes();
        }
        Ok(())
    }

    async fn fetch_traces(&self, bundles: &mut [BlockBundle]) -> Result<()> {
        let requests: Vec<RpcRequest> = bundles
            .iter()
            .map(|b| trace_request(self.chain, b.number))
            .collect();
        let responses = self.client.batch(&requests).await?;
        for (resp, bundle) in responses.into_iter().zip(bundles.iter_mut()) {
            let raw = resp
                .raw_result()?
                .ok_or_else(|| eyre!("missing traces for block {}", bundle.number))?;
            bundle.traces = raw.into_bytes();
        }
        Ok(())
    }

    fn hashes_recursive(&self, range: BlockRange) -> BoxFuture<'_, Result<Vec<(i64, B256)>>> {
        Box::pin(async move {
            if range.count() as usize > self.max_bulk {
                let mid = range.start + (range.end - range.start) / 2;
                let mut left = self
                    .hashes_recursive(BlockRange::new(range.start, mid)?)
                    .await?;
                let right = self
                    .hashes_recursive(BlockRange::new(mid + 1, range.end)?)
                    .await?;
                left.extend(right);
                return Ok(left);
            }

            let numbers: Vec<i64> = range.blocks().collect();
            let requests: Vec<RpcRequest> = numbers
                .iter()
                .map(|n| RpcRequest::new("eth_getBlockByNumber", json!([hex_num(*n), false])))
                .collect();
            let responses = self.client.batch(&requests).await?;
            numbers
                .iter()
                .zip(responses)
                .map(|(n, resp)| {
                    let block: BlockJson = resp
                        .parse_result()?
                        .ok_or_else(|| eyre!("block {n} not found during hash fetch"))?;
                    Ok((*n, block.hash))
                })
                .collect()
        })
    }
}

fn into_bundle(chain: u64, number: i64, raw: String, parsed: &BlockJson) -> BlockBundle {
    BlockBundle {
        chain_id: chain,
        number,
        hash: parsed.hash,
        parent_hash: parsed.parent_hash,
        uncles_count: parsed.uncles.len(),
        tx_hashes: parsed.transactions.iter().map(|t| t.hash()).collect(),
        block: raw.into_bytes(),
        receipts: Vec::new(),
        traces: Vec::new(),
        uncles: Vec::new(),
    }
}

impl BlockFetcher for RpcBlockFetcher {
    fn chain_id(&self) -> u64 {
        self.chain
    }

    async fn latest_block(&self) -> Result<i64> {
        let resp = self.client.call("eth_blockNumber", json!([])).await?;
        let quantity: String = resp
            .parse_result()?
            .ok_or_else(|| eyre!("node returned no head block number"))?;
        parse_quantity(&quantity)
    }

    async fn fetch_bundles(&self, numbers: &[i64]) -> Result<Vec<BlockBundle>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let blocks = self.fetch_blocks(numbers).await?;
        let mut bundles: Vec<BlockBundle> = blocks
            .into_iter()
            .zip(numbers)
            .map(|((raw, parsed), number)| into_bundle(self.chain, *number, raw, &parsed))
            .collect();
        self.fetch_uncles(&mut bundles).await?;
        self.fetch_receipts(&mut bundles).await?;
        self.fetch_traces(&mut bundles).await?;
        Ok(bundles)
    }

    async fn fetch_hashes(&self, range: BlockRange) -> Result<Vec<(i64, B256)>> {
        self.hashes_recursive(range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracer_dispatch_honors_activation_height() {
        assert_eq!(trace_request(10, 105_235_062).method, "trace_block");
        assert_eq!(
            trace_request(10, 105_235_063).method,
            "debug_traceBlockByNumber"
        );
        assert_eq!(trace_request(1, 0).method, "debug_traceBlockByNumber");
    }

    #[test]
    fn receipt_fallback_is_chain_scoped() {
        assert!(uses_receipt_fallback(61));
        assert!(!uses_receipt_fallback(1));
    }

    #[test]
    fn quantities_render_as_hex() {
        assert_eq!(hex_num(0), "0x0");
        assert_eq!(hex_num(436), "0x1b4");
    }
}
