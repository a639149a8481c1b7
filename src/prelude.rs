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


pub use std::{
    collections::{HashMap, HashSet},
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

pub use alloy_primitives::{Address, B256, U256};
pub use bytes::Bytes;
pub use eyre::{bail, ensure, eyre, Context, ContextCompat, Result};
pub use futures::{StreamExt, TryStreamExt};
pub use tokio::time::sleep;
pub use tracing::{debug, error, info, trace, warn};

pub use crate::{
    alert::Alert,
    compress::{compress, decompress},
    index::{Interaction, InteractionIndex, InteractionKind, InteractionQuery},
    kvstore::{
        memory::MemoryStorage, rocksdb_storage::RocksDbStorage, KVReader, KVReaderErased, KVStore,
        KVStoreErased,
    },
    metrics::Metrics,
    model::{parse_quantity, BlockBundle, BlockFetcher, BlockJson, BlockRange},
    store::{
        cache::CachedRawStore,
        raw_store::RawBlockStore,
        status::{BlockStatus, KvStatusStore, StatusStore},
    },
};
