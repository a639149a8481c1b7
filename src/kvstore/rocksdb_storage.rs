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


use std::path::Path;

use rocksdb::{Direction, IteratorMode, WriteBatch, DB};

use crate::prelude::*;

#[derive(Clone)]
pub struct RocksDbStorage {
    pub db: Arc<DB>,
    pub name: String,
}

impl RocksDbStorage {
    pub fn new(path: impl AsRef<Path>) -> Result<RocksDbStorage> {
        Ok(RocksDbStorage {
            db: Arc::new(DB::open_default(path.as_ref())?),
            name: format!(
                "rocksdb://{}",
                path.as_ref()
                    .to_str()
                    .wrap_err_with(|| format!("Path not valid utf-8. {:?}", path.as_ref()))?
            ),
        })
    }
}

impl KVReader for RocksDbStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.db
            .get(key)
            .wrap_err_with(|| format!("Failed to read key from rocksdb: {key}"))
            .map(|opt| opt.map(Into::into))
    }

    async fn scan_range(
        &self,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<Vec<(String, Bytes)>> {
        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(start.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if key.as_ref() > end.as_bytes() || rows.len() >= limit {
                break;
            }
            let key = String::from_utf8(key.to_vec()).wrap_err("Non-utf8 key in rocksdb")?;
            rows.push((key, Bytes::from(value.to_vec())));
        }
        Ok(rows)
    }
}

impl KVStore for RocksDbStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: impl AsRef<str>, data: Vec<u8>) -> Result<()> {
        self.db.put(key.as_ref(), data).map_err(Into::into)
    }

    async fn bulk_put(&self, kvs: impl IntoIterator<Item = (String, Vec<u8>)>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for (k, v) in kvs {
            batch.put(k, v);
        }
        self.db.write(batch).map_err(Into::into)
    }

    async fn delete(&self, key: impl AsRef<str>) -> Result<()> {
        self.db.delete(key.as_ref()).map_err(Into::into)
    }
}
