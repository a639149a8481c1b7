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


use std::collections::BTreeMap;
use std::ops::Bound;

use tokio::sync::Mutex;

use crate::prelude::*;

/// Ordered in-memory backend. A BTreeMap rather than a hash map because the
/// reversed-key scheme depends on lexicographic range scans.
#[derive(Clone)]
pub struct MemoryStorage {
    pub db: Arc<Mutex<BTreeMap<String, Bytes>>>,
    pub should_fail: Arc<AtomicBool>,
    pub name: String,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>) -> MemoryStorage {
        MemoryStorage {
            db: Arc::new(Mutex::new(BTreeMap::default())),
            should_fail: Arc::new(AtomicBool::new(false)),
            name: name.into(),
        }
    }

    fn check_failure(&self) -> Result<()> {
        if self.should_fail.load(Ordering::SeqCst) {
            bail!("MemoryStorage simulated failure");
        }
        Ok(())
    }

    /// Snapshot of every row, for byte-level comparisons in tests.
    pub async fn dump(&self) -> BTreeMap<String, Bytes> {
        self.db.lock().await.clone()
    }
}

impl KVReader for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check_failure()?;
        Ok(self.db.lock().await.get(key).map(ToOwned::to_owned))
    }

    async fn scan_range(
        &self,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<Vec<(String, Bytes)>> {
        self.check_failure()?;
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .db
            .lock()
            .await
            .range::<str, _>((Bound::Included(start), Bound::Included(end)))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

impl KVStore for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: impl AsRef<str>, data: Vec<u8>) -> Result<()> {
        self.check_failure()?;
        self.db
            .lock()
            .await
            .insert(key.as_ref().to_owned(), data.into());
        Ok(())
    }

    async fn bulk_put(&self, kvs: impl IntoIterator<Item = (String, Vec<u8>)>) -> Result<()> {
        self.check_failure()?;
        let mut db = self.db.lock().await;
        for (k, v) in kvs {
            db.insert(k, v.into());
        }
        Ok(())
    }

    async fn delete(&self, key: impl AsRef<str>) -> Result<()> {
        self.db.lock().await.remove(key.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_operations() -> Result<()> {
        let storage = MemoryStorage::new("test-store");

        let key = "test-key";
        let data = b"hello world".to_vec();
        storage.put(key, data.clone()).await?;

        let result = storage.get(key).await?.unwrap();
        assert_eq!(result, Bytes::from(data));

        assert_eq!(storage.get("non-existent").await?, None);

        storage.delete(key).await?;
        assert_eq!(storage.get(key).await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn range_scan_is_ordered() -> Result<()> {
        let storage = MemoryStorage::new("test-store");

        storage.put("b:03", b"3".to_vec()).await?;
        storage.put("b:01", b"1".to_vec()).await?;
        storage.put("b:02", b"2".to_vec()).await?;
        storage.put("c:01", b"x".to_vec()).await?;

        let rows = storage.scan_range("b:01", "b:02", usize::MAX).await?;
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b:01", "b:02"]);

        let rows = storage.scan_prefix("b:", usize::MAX).await?;
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b:01", "b:02", "b:03"]);

        let rows = storage.scan_prefix("b:", 2).await?;
        assert_eq!(rows.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn inverted_bounds_scan_empty() -> Result<()> {
        let storage = MemoryStorage::new("test-store");
        storage.put("b:01", b"1".to_vec()).await?;

        let rows = storage.scan_range("b:05", "b:02", usize::MAX).await?;
        assert!(rows.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn failure_injection() {
        let storage = MemoryStorage::new("test-store");
        storage.should_fail.store(true, Ordering::SeqCst);
        assert!(storage.get("k").await.is_err());
        assert!(storage.put("k", vec![1]).await.is_err());
        storage.should_fail.store(false, Ordering::SeqCst);
        assert!(storage.get("k").await.is_ok());
    }
}
