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


use chain_archive::{
    export::ExportEngine,
    head::HeadTracker,
    prelude::*,
    reorg::ReorgMonitor,
    rpc::{JsonRpcClient, RpcBlockFetcher},
};
use clap::Parser;
use tracing::Level;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let args = cli::Cli::parse();
    let metrics = Metrics::new(
        args.otel_endpoint.clone(),
        "chain-exporter",
        Duration::from_secs(15),
    )?;
    let alert = Alert::new(args.alert_webhook.clone())?;

    let client = JsonRpcClient::new(
        args.rpc_url.clone(),
        Duration::from_secs(args.rpc_timeout_seconds),
    )?;
    let fetcher = RpcBlockFetcher::connect(client, args.bulk_size).await?;

    let storage: KVStoreErased = RocksDbStorage::new(&args.db_path)?.into();
    let raw_store = RawBlockStore::new(storage.clone());
    let status_store = KvStatusStore::new(storage);

    let engine = ExportEngine::new(
        fetcher.clone(),
        raw_store.clone(),
        status_store.clone(),
        metrics.clone(),
        alert.clone(),
        args.concurrency,
        args.bulk_size,
        args.notify_threshold,
    )?;

    // one-shot re-export of a fixed range
    if let (Some(start), Some(end)) = (args.start_block, args.end_block) {
        let head = fetcher.latest_block().await?;
        let range = BlockRange::new(start, end)?;
        info!(%range, head, "one-shot export");
        return engine.export_ranges(&[range], head).await;
    }

    let monitor = Arc::new(ReorgMonitor::new(
        fetcher.clone(),
        engine.clone(),
        raw_store.clone(),
        status_store,
        args.reorg_depth,
    )?);

    let slot = Duration::from_secs(args.slot_seconds);
    let stall_threshold = Duration::from_secs(args.stall_threshold_seconds);
    let (tracker, mut head_rx) = HeadTracker::new(alert.clone());
    let head_task = {
        let tracker = tracker.clone();
        let fetcher = fetcher.clone();
        tokio::spawn(async move { tracker.run_poll(fetcher, slot, stall_threshold).await })
    };

    head_rx
        .changed()
        .await
        .wrap_err("head tracker stopped before the first head")?;
    let head = *head_rx.borrow_and_update();
    info!(head, "chain head established");

    if !args.skip_hole_check {
        let gaps = monitor.fill_gaps(head).await?;
        info!(filled = gaps.len(), "hole check complete");
        if args.only_hole_check {
            return Ok(());
        }
    }

    let reorg_task = {
        let monitor = monitor.clone();
        let interval = slot;
        let budget = args.max_consecutive_errors;
        tokio::spawn(async move { monitor.run(interval, budget).await })
    };

    tokio::select! {
        res = head_task => res.wrap_err("head tracker panicked")?,
        res = reorg_task => res.wrap_err("reorg monitor panicked")?,
        res = follow_head(fetcher, engine, raw_store, head_rx) => res,
    }
}

/// Steady state: export every block between the last checkpoint and the
/// current head, then wait for the head to move.
async fn follow_head(
    fetcher: RpcBlockFetcher,
    engine: ExportEngine<RpcBlockFetcher>,
    raw_store: RawBlockStore,
    mut head_rx: tokio::sync::watch::Receiver<i64>,
) -> Result<()> {
    let chain = fetcher.chain_id();
    loop {
        let head = *head_rx.borrow_and_update();
        let exported = raw_store.get_latest(chain).await?.unwrap_or(-1);
        if head > exported {
            let range = BlockRange::new(exported + 1, head)?;
            debug!(%range, "exporting new blocks");
            engine.export_ranges(&[range], head).await?;
        }
        head_rx.changed().await.wrap_err("head channel closed")?;
    }
}
