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


pub mod memory;
pub mod rocksdb_storage;

use enum_dispatch::enum_dispatch;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};

use self::{memory::MemoryStorage, rocksdb_storage::RocksDbStorage};
use crate::prelude::*;

#[enum_dispatch(KVStore, KVReader)]
#[derive(Clone)]
pub enum KVStoreErased {
    MemoryStorage,
    RocksDbStorage,
}

#[enum_dispatch(KVReader)]
#[derive(Clone)]
pub enum KVReaderErased {
    MemoryStorage,
    RocksDbStorage,
}

impl From<KVStoreErased> for KVReaderErased {
    fn from(value: KVStoreErased) -> Self {
        match value {
            KVStoreErased::MemoryStorage(x) => KVReaderErased::MemoryStorage(x),
            KVStoreErased::RocksDbStorage(x) => KVReaderErased::RocksDbStorage(x),
        }
    }
}

#[enum_dispatch]
pub trait KVStore: KVReader {
    async fn put(&self, key: impl AsRef<str>, data: Vec<u8>) -> Result<()>;

    /// Bulk multi-row mutation. Backends with a native batch API override
    /// this; the default fans out individual puts.
    async fn bulk_put(&self, kvs: impl IntoIterator<Item = (String, Vec<u8>)>) -> Result<()> {
        futures::stream::iter(kvs)
            .map(|(k, v)| self.put(k, v))
            .buffer_unordered(16)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    async fn delete(&self, key: impl AsRef<str>) -> Result<()>;

    fn name(&self) -> &str;
}

#[enum_dispatch]
pub trait KVReader: Clone {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Ascending lexicographic scan over [start, end], at most `limit` rows.
    async fn scan_range(&self, start: &str, end: &str, limit: usize)
        -> Result<Vec<(String, Bytes)>>;

    async fn scan_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<(String, Bytes)>> {
        self.scan_range(prefix, &prefix_upper_bound(prefix), limit)
            .await
    }

    async fn bulk_get(&self, keys: &[String]) -> Result<HashMap<String, Bytes>> {
        let mut futs = Vec::with_capacity(keys.len());
        for key in keys {
            let reader = self.clone();
            futs.push(async move { reader.get(key).await });
        }
        let responses = futures::future::try_join_all(futs).await?;

        let mut out = HashMap::with_capacity(responses.len());
        for (resp, key) in responses.into_iter().zip(keys) {
            if let Some(bytes) = resp {
                out.insert(key.clone(), bytes);
            }
        }
        Ok(out)
    }
}

/// Smallest string strictly greater than every key sharing `prefix`. Row keys
/// only use printable ASCII below 0x7f, so appending DEL is a safe bound.
pub fn prefix_upper_bound(prefix: &str) -> String {
    let mut bound = prefix.to_owned();
    bound.push('\u{7f}');
    bound
}

pub fn retry_strategy() -> std::iter::Map<ExponentialBackoff, fn(Duration) -> Duration> {
    ExponentialBackoff::from_millis(10)
        .max_delay(Duration::from_secs(1))
        .map(jitter)
}

pub fn retry<A: tokio_retry::Action>(
    a: A,
) -> RetryIf<std::iter::Map<ExponentialBackoff, fn(Duration) -> Duration>, A, RetryTimeout>
where
    A::Error: std::fmt::Debug,
{
    RetryIf::spawn(retry_strategy(), a, RetryTimeout::ms(5_000))
}

pub struct RetryTimeout {
    cutoff: Instant,
}

impl<E: std::fmt::Debug> tokio_retry::Condition<E> for RetryTimeout {
    fn should_retry(&mut self, e: &E) -> bool {
        warn!("Encountered error: {e:?}, retrying...");
        Instant::now() < self.cutoff
    }
}

impl RetryTimeout {
    fn ms(ms: u64) -> Self {
        Self {
            cutoff: Instant::now() + Duration::from_millis(ms),
        }
    }
}
