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

use crate::prelude::*;

pub const MAX_BULK_SIZE: usize = 100;
pub const MAX_RETRY_DEPTH: u32 = 10;

const REPORT_INTERVAL: Duration = Duration::from_secs(10);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

fn backoff(depth: u32) -> Duration {
    let ms = 500u64.saturating_mul(1 << depth.min(10));
    Duration::from_millis(ms).min(MAX_BACKOFF)
}

/// Flatten ranges into dispatch chunks of at most `bulk_size` blocks,
/// clipped at the chain head. Numbers past the head are not an error, the
/// caller simply asked for blocks that don't exist yet.
pub fn plan_chunks(ranges: &[BlockRange], head: i64, bulk_size: usize) -> Vec<Vec<i64>> {
    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(bulk_size);
    let mut skipped = 0u64;
    for range in ranges {
        for number in range.blocks() {
            if number > head {
                skipped += 1;
                continue;
            }
            current.push(number);
            if current.len() == bulk_size {
                chunks.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    if skipped > 0 {
        warn!(skipped, head, "requested blocks beyond chain head, skipping");
    }
    chunks
}

/// Concurrency-bounded bulk exporter: fetch, persist, upsert status, with
/// adaptive bisection retry on failure. Clones share the abort flag and
/// progress counter.
#[derive(Clone)]
pub struct ExportEngine<F> {
    fetcher: F,
    raw_store: RawBlockStore<KVStoreErased>,
    status_store: KvStatusStore<KVStoreErased>,
    metrics: Metrics,
    alert: Alert,
    abort: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    notified: Arc<AtomicBool>,
    concurrency: usize,
    bulk_size: usize,
    notify_threshold: Option<u64>,
}

impl<F: BlockFetcher> ExportEngine<F> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: F,
        raw_store: RawBlockStore<KVStoreErased>,
        status_store: KvStatusStore<KVStoreErased>,
        metrics: Metrics,
        alert: Alert,
        concurrency: usize,
        bulk_size: usize,
        notify_threshold: Option<u64>,
    ) -> Result<Self> {
        ensure!(concurrency > 0, "export concurrency must be positive");
        ensure!(
            bulk_size > 0 && bulk_size <= MAX_BULK_SIZE,
            "bulk size must be in 1..={MAX_BULK_SIZE}, got {bulk_size}"
        );
        Ok(Self {
            fetcher,
            raw_store,
            status_store,
            metrics,
            alert,
            abort: Arc::new(AtomicBool::new(false)),
            processed: Arc::new(AtomicU64::new(0)),
            notified: Arc::new(AtomicBool::new(false)),
            concurrency,
            bulk_size,
            notify_threshold,
        })
    }

    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Export every block in `ranges` up to `head`. Chunks complete out of
    /// order across workers; writes are idempotent upserts so that is safe.
    pub async fn export_ranges(&self, ranges: &[BlockRange], head: i64) -> Result<()> {
        let chunks = plan_chunks(ranges, head, self.bulk_size);
        if chunks.is_empty() {
            return Ok(());
        }
        let target = self.processed() + chunks.iter().map(|c| c.len() as u64).sum::<u64>();
        let reporter = self.spawn_reporter(target);

        // already-dispatched chunks run to completion or exhaust their retry
        // depth, so drain the stream and surface the first failure afterwards
        let results: Vec<Result<()>> = futures::stream::iter(chunks)
            .map(|chunk| self.export_with_retry(chunk, 0))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        reporter.abort();
        results.into_iter().collect::<Result<Vec<()>>>()?;

        // checkpoint only advances; a reorg re-export of old blocks must not
        // pull it backwards
        let chain = self.fetcher.chain_id();
        let exported_to = head.min(ranges.iter().map(|r| r.end).max().unwrap_or(head));
        if self.raw_store.get_latest(chain).await?.unwrap_or(-1) < exported_to {
            self.raw_store.update_latest(chain, exported_to).await?;
        }
        Ok(())
    }

    fn export_with_retry(&self, chunk: Vec<i64>, depth: u32) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if depth == 0 && self.aborted() {
                bail!("export aborted, not dispatching blocks {:?}", span(&chunk));
            }
            let Err(err) = self.export_chunk(&chunk).await else {
                return Ok(());
            };
            if depth >= MAX_RETRY_DEPTH {
                self.abort.store(true, Ordering::SeqCst);
                let msg = format!("retry depth exhausted for blocks {:?}", span(&chunk));
                self.alert.send("export failed", &msg).await;
                return Err(err.wrap_err(msg));
            }
            warn!(depth, blocks = ?span(&chunk), %err, "chunk failed, backing off");
            self.metrics.inc_counter("export_chunk_retries");
            sleep(backoff(depth)).await;

            if chunk.len() > 1 {
                let (left, right) = chunk.split_at(chunk.len() / 2);
                self.export_with_retry(left.to_vec(), depth + 1).await?;
                self.export_with_retry(right.to_vec(), depth + 1).await
            } else {
                self.export_with_retry(chunk, depth + 1).await
            }
        })
    }

    async fn export_chunk(&self, numbers: &[i64]) -> Result<()> {
        let bundles = self.fetcher.fetch_bundles(numbers).await?;
        self.raw_store.write_bundles(&bundles).await?;
        let rows: Vec<BlockStatus> = bundles
            .iter()
            .map(|b| BlockStatus::new(b.chain_id, b.number, b.hash))
            .collect();
        self.status_store.upsert(&rows).await?;
        self.processed
            .fetch_add(bundles.len() as u64, Ordering::SeqCst);
        self.metrics.counter("blocks_exported", bundles.len() as u64);
        Ok(())
    }

    fn spawn_reporter(&self, target: u64) -> tokio::task::JoinHandle<()> {
        let processed = self.processed.clone();
        let abort = self.abort.clone();
        let notified = self.notified.clone();
        let metrics = self.metrics.clone();
        let alert = self.alert.clone();
        let notify_threshold = self.notify_threshold;
        tokio::spawn(async move {
            let started = Instant::now();
            let mut last = processed.load(Ordering::SeqCst);
            let mut ticker = tokio::time::interval(REPORT_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if abort.load(Ordering::SeqCst) {
                    break;
                }
                let total = processed.load(Ordering::SeqCst);
                let interval_rate = (total - last) as f64 / REPORT_INTERVAL.as_secs_f64();
                let overall_rate = total as f64 / started.elapsed().as_secs_f64().max(1.0);
                let eta_secs = if interval_rate > 0.0 {
                    (target.saturating_sub(total)) as f64 / interval_rate
                } else {
                    f64::INFINITY
                };
                info!(
                    total,
                    target,
                    blocks_per_sec = format!("{interval_rate:.1}"),
                    cumulative_per_sec = format!("{overall_rate:.1}"),
                    eta_secs = format!("{eta_secs:.0}"),
                    "export progress"
                );
                metrics.gauge("export_blocks_processed", total);
                if let Some(threshold) = notify_threshold {
                    if total >= threshold && !notified.swap(true, Ordering::SeqCst) {
                        alert
                            .send(
                                "export milestone",
                                &format!("processed {total} blocks (threshold {threshold})"),
                            )
                            .await;
                    }
                }
                last = total;
            }
        })
    }
}

fn span(chunk: &[i64]) -> (i64, i64) {
    (
        chunk.first().copied().unwrap_or(-1),
        chunk.last().copied().unwrap_or(-1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn engine(
        fetcher: MockFetcher,
        storage: MemoryStorage,
        bulk_size: usize,
    ) -> ExportEngine<MockFetcher> {
        ExportEngine::new(
            fetcher,
            RawBlockStore::new(KVStoreErased::from(storage.clone())),
            KvStatusStore::new(KVStoreErased::from(storage)),
            Metrics::none(),
            Alert::disabled(),
            4,
            bulk_size,
            None,
        )
        .unwrap()
    }

    #[test]
    fn chunks_fill_across_ranges_and_clip_at_head() {
        let ranges = [
            BlockRange::new(0, 9).unwrap(),
            BlockRange::new(20, 24).unwrap(),
        ];
        let chunks = plan_chunks(&ranges, 22, 4);
        assert_eq!(
            chunks,
            vec![
                vec![0, 1, 2, 3],
                vec![4, 5, 6, 7],
                vec![8, 9, 20, 21],
                vec![22],
            ]
        );
        assert!(plan_chunks(&ranges, -1, 4).is_empty());
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert!(backoff(0) < backoff(1));
        assert_eq!(backoff(12), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn export_writes_blocks_and_status() {
        let storage = MemoryStorage::new("db");
        let engine = engine(MockFetcher::new(1, 100), storage.clone(), 5);
        engine
            .export_ranges(&[BlockRange::new(0, 9).unwrap()], 100)
            .await
            .unwrap();

        assert_eq!(engine.processed(), 10);
        let raw = RawBlockStore::new(storage.clone());
        assert!(raw.read_bundle(1, 7).await.unwrap().is_some());
        assert_eq!(raw.get_latest(1).await.unwrap(), Some(9));
        let status = KvStatusStore::new(storage);
        assert_eq!(status.present_ids(1).await.unwrap(), (0..=9).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn engine_work_crosses_task_boundaries() {
        let storage = MemoryStorage::new("db");
        let engine = engine(MockFetcher::new(1, 100), storage.clone(), 5);

        let handle = tokio::spawn(async move {
            engine
                .export_ranges(&[BlockRange::new(0, 3).unwrap()], 100)
                .await
        });
        handle.await.unwrap().unwrap();

        let raw = RawBlockStore::new(storage);
        assert!(raw.read_bundle(1, 3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn export_is_idempotent() {
        let storage = MemoryStorage::new("db");
        let engine = engine(MockFetcher::new(1, 100), storage.clone(), 3);
        let ranges = [BlockRange::new(0, 7).unwrap()];

        engine.export_ranges(&ranges, 100).await.unwrap();
        let first = storage.dump().await;
        engine.export_ranges(&ranges, 100).await.unwrap();
        assert_eq!(first, storage.dump().await);
    }

    #[tokio::test(start_paused = true)]
    async fn bisection_reaches_every_singleton() {
        let fetcher = MockFetcher::new(1, 100);
        fetcher.fail_multi.store(true, Ordering::SeqCst);
        let engine = engine(fetcher.clone(), MemoryStorage::new("db"), 8);

        engine
            .export_ranges(&[BlockRange::new(0, 7).unwrap()], 100)
            .await
            .unwrap();

        let attempts = fetcher.attempt_log();
        for n in 0..=7 {
            assert!(
                attempts.contains(&vec![n]),
                "block {n} never attempted alone: {attempts:?}"
            );
        }
        assert_eq!(engine.processed(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatched_chunks_survive_a_sibling_failure() {
        let fetcher = MockFetcher::new(1, 100);
        fetcher.fail_block(3);
        fetcher.delay_block(4, Duration::from_secs(1200));
        let storage = MemoryStorage::new("db");
        let engine = engine(fetcher.clone(), storage.clone(), 1);

        let result = engine
            .export_ranges(&[BlockRange::new(3, 4).unwrap()], 100)
            .await;
        assert!(result.is_err());
        assert!(engine.aborted());

        // chunk [4] was in flight when [3] exhausted its retries; it still
        // ran to completion instead of being cancelled
        let raw = RawBlockStore::new(storage);
        assert!(raw.read_bundle(1, 4).await.unwrap().is_some());
        assert_eq!(engine.processed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_depth_is_bounded_and_trips_abort() {
        let fetcher = MockFetcher::new(1, 100);
        fetcher.fail_block(3);
        let engine = engine(fetcher.clone(), MemoryStorage::new("db"), 1);

        let result = engine
            .export_ranges(&[BlockRange::new(3, 3).unwrap()], 100)
            .await;
        assert!(result.is_err());
        assert!(engine.aborted());
        assert_eq!(fetcher.attempt_log().len(), MAX_RETRY_DEPTH as usize + 1);

        // once tripped, the engine refuses new dispatch
        let before = fetcher.attempt_log().len();
        assert!(engine
            .export_ranges(&[BlockRange::new(4, 4).unwrap()], 100)
            .await
            .is_err());
        assert_eq!(fetcher.attempt_log().len(), before);
    }
}
