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


use std::path::PathBuf;

use clap::Parser;
use url::Url;

#[derive(Debug, Parser)]
#[command(name = "chain-exporter", about, long_about = None)]
pub struct Cli {
    /// JSON-RPC endpoint of the execution node
    #[arg(long)]
    pub rpc_url: Url,

    /// RocksDB data directory
    #[arg(long)]
    pub db_path: PathBuf,

    /// One-shot re-export: first block (requires --end-block)
    #[arg(long, requires = "end_block")]
    pub start_block: Option<i64>,

    /// One-shot re-export: last block, inclusive
    #[arg(long, requires = "start_block")]
    pub end_block: Option<i64>,

    /// Lookback depth for reorg detection; never decrease once deployed
    #[arg(long, default_value_t = 32)]
    pub reorg_depth: i64,

    /// Concurrent export workers
    #[arg(long, default_value_t = 10)]
    pub concurrency: usize,

    /// Blocks per JSON-RPC batch
    #[arg(long, default_value_t = 25)]
    pub bulk_size: usize,

    /// Send a webhook notification once this many blocks are exported
    #[arg(long)]
    pub notify_threshold: Option<u64>,

    /// Skip the startup scan for holes in already-exported data
    #[arg(long, default_value_t = false)]
    pub skip_hole_check: bool,

    /// Run the hole check, then exit
    #[arg(long, default_value_t = false, conflicts_with = "skip_hole_check")]
    pub only_hole_check: bool,

    /// Expected seconds between blocks on this chain
    #[arg(long, default_value_t = 12)]
    pub slot_seconds: u64,

    /// Seconds without a new head before the exporter gives up
    #[arg(long, default_value_t = 600)]
    pub stall_threshold_seconds: u64,

    /// Consecutive reorg-check failures tolerated before exiting
    #[arg(long, default_value_t = 0)]
    pub max_consecutive_errors: u32,

    /// HTTP timeout for RPC calls in seconds
    #[arg(long, default_value_t = 30)]
    pub rpc_timeout_seconds: u64,

    #[arg(long)]
    pub alert_webhook: Option<Url>,

    #[arg(long)]
    pub otel_endpoint: Option<String>,
}
