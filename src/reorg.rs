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


use crate::{export::ExportEngine, prelude::*};

/// Hard ceiling on the lookback window. The depth also must never shrink
/// between runs: blocks older than the deepest window ever checked are
/// treated as final.
pub const MAX_REORG_DEPTH: i64 = 100;

/// A broken internal invariant, as opposed to a transient fetch failure.
/// The steady-state loop must never retry these.
#[derive(Debug)]
pub struct InvariantViolation(pub String);

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invariant violation: {}", self.0)
    }
}

impl std::error::Error for InvariantViolation {}

pub fn is_invariant_violation(err: &eyre::Report) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<InvariantViolation>().is_some())
}

fn invariant(condition: bool, msg: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(eyre::Report::new(InvariantViolation(msg())))
    }
}

/// Group sorted block ids into contiguous inclusive ranges.
fn group_contiguous(ids: &[i64]) -> Vec<BlockRange> {
    let mut ranges: Vec<BlockRange> = Vec::new();
    for &id in ids {
        match ranges.last_mut() {
            Some(last) if last.end + 1 == id => last.end = id,
            _ => ranges.push(BlockRange { start: id, end: id }),
        }
    }
    ranges
}

/// Diff freshly fetched hashes against persisted ones over `range`. Every
/// block without a confirmed match lands in a mismatch range, including an
/// unmatched leading block.
pub fn mismatch_ranges(
    range: BlockRange,
    persisted: &[(i64, B256)],
    fresh: &[(i64, B256)],
) -> Result<Vec<BlockRange>> {
    let persisted_map: HashMap<i64, B256> = persisted.iter().copied().collect();
    let mut matched: Vec<i64> = fresh
        .iter()
        .filter(|(n, hash)| persisted_map.get(n) == Some(hash))
        .map(|(n, _)| *n)
        .collect();
    matched.sort_unstable();

    let requested = range.count() as usize;
    invariant(matched.len() <= requested, || {
        format!("{} matched hashes for {} requested blocks", matched.len(), requested)
    })?;

    let matched_set: HashSet<i64> = matched.iter().copied().collect();
    let missing: Vec<i64> = range.blocks().filter(|n| !matched_set.contains(n)).collect();
    invariant(missing.len() == requested - matched.len(), || {
        format!(
            "{} mismatches reconstructed from {} requested minus {} matched",
            missing.len(),
            requested,
            matched.len()
        )
    })?;

    Ok(group_contiguous(&missing))
}

/// Missing-id ranges over `0..=max_id` given the sorted ids actually
/// persisted. A hole at the very start is a gap like any other.
pub fn find_gaps(present: &[i64], max_id: i64) -> Vec<BlockRange> {
    let present: HashSet<i64> = present.iter().copied().collect();
    let missing: Vec<i64> = (0..=max_id).filter(|n| !present.contains(n)).collect();
    group_contiguous(&missing)
}

/// Cross-checks the tail of persisted chain state against the node and
/// re-exports exactly the blocks whose hashes no longer match.
pub struct ReorgMonitor<F> {
    fetcher: F,
    engine: ExportEngine<F>,
    raw_store: RawBlockStore<KVStoreErased>,
    status_store: KvStatusStore<KVStoreErased>,
    depth: i64,
}

impl<F: BlockFetcher> ReorgMonitor<F> {
    pub fn new(
        fetcher: F,
        engine: ExportEngine<F>,
        raw_store: RawBlockStore<KVStoreErased>,
        status_store: KvStatusStore<KVStoreErased>,
        depth: i64,
    ) -> Result<Self> {
        ensure!(
            depth > 0 && depth <= MAX_REORG_DEPTH,
            "reorg depth must be in 1..={MAX_REORG_DEPTH}, got {depth}"
        );
        Ok(Self {
            fetcher,
            engine,
            raw_store,
            status_store,
            depth,
        })
    }

    /// One detection cycle. Returns the ranges that were re-exported.
    pub async fn check_once(&self) -> Result<Vec<BlockRange>> {
        let chain = self.fetcher.chain_id();
        let Some(latest) = self.raw_store.get_latest(chain).await? else {
            debug!(chain, "no exported blocks yet, skipping reorg check");
            return Ok(Vec::new());
        };
        let range = BlockRange::new((latest - self.depth + 1).max(0), latest)?;

        let persisted = self.raw_store.read_hashes(chain, range).await?;
        let fresh = self.fetcher.fetch_hashes(range).await?;
        let ranges = mismatch_ranges(range, &persisted, &fresh)?;
        if ranges.is_empty() {
            return Ok(ranges);
        }

        info!(chain, ?range, mismatched = ?ranges, "reorg detected, re-exporting");
        self.engine.export_ranges(&ranges, latest).await?;
        Ok(ranges)
    }

    /// Re-export every hole in the status rows up to `head`. Drives restart
    /// resume: partial exports leave gaps, not corruption.
    pub async fn fill_gaps(&self, head: i64) -> Result<Vec<BlockRange>> {
        let chain = self.fetcher.chain_id();
        let present = self.status_store.present_ids(chain).await?;
        let gaps = find_gaps(&present, head);
        if gaps.is_empty() {
            return Ok(gaps);
        }
        info!(chain, holes = gaps.len(), "filling gaps in exported range");
        self.engine.export_ranges(&gaps, head).await?;
        Ok(gaps)
    }

    /// Steady-state loop. Transient errors are tolerated up to
    /// `max_consecutive_errors` in a row (default 0: fail immediately and
    /// let the supervisor restart); invariant violations are always fatal.
    pub async fn run(&self, interval: Duration, max_consecutive_errors: u32) -> Result<()> {
        let mut consecutive = 0u32;
        loop {
            match self.check_once().await {
                Ok(_) => consecutive = 0,
                Err(err) if is_invariant_violation(&err) => return Err(err),
                Err(err) if consecutive < max_consecutive_errors => {
                    consecutive += 1;
                    warn!(consecutive, max_consecutive_errors, %err, "reorg check failed");
                }
                Err(err) => return Err(err.wrap_err("reorg check error budget exhausted")),
            }
            sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metrics::Metrics, test_utils::*};

    fn monitor(
        fetcher: MockFetcher,
        storage: MemoryStorage,
        depth: i64,
    ) -> ReorgMonitor<MockFetcher> {
        let raw = RawBlockStore::new(KVStoreErased::from(storage.clone()));
        let status = KvStatusStore::new(KVStoreErased::from(storage));
        let engine = ExportEngine::new(
            fetcher.clone(),
            raw.clone(),
            status.clone(),
            Metrics::none(),
            Alert::disabled(),
            2,
            10,
            None,
        )
        .unwrap();
        ReorgMonitor::new(fetcher, engine, raw, status, depth).unwrap()
    }

    #[test]
    fn gaps_include_leading_hole() {
        let present = vec![5, 10, 11, 12];
        let gaps = find_gaps(&present, 20);
        assert_eq!(
            gaps,
            vec![
                BlockRange::new(0, 4).unwrap(),
                BlockRange::new(6, 9).unwrap(),
                BlockRange::new(13, 20).unwrap(),
            ]
        );
        assert!(find_gaps(&(0..=20).collect::<Vec<_>>(), 20).is_empty());
    }

    #[test]
    fn mismatches_group_into_ranges() {
        let range = BlockRange::new(6, 10).unwrap();
        let persisted: Vec<(i64, B256)> = range.blocks().map(|n| (n, test_hash(n))).collect();
        let mut fresh = persisted.clone();
        fresh[1].1 = test_hash(999); // block 7
        fresh[3].1 = test_hash(998); // block 9

        let ranges = mismatch_ranges(range, &persisted, &fresh).unwrap();
        assert_eq!(
            ranges,
            vec![BlockRange::new(7, 7).unwrap(), BlockRange::new(9, 9).unwrap()]
        );

        // an unmatched leading block is a mismatch too
        let ranges = mismatch_ranges(range, &persisted[1..], &fresh).unwrap();
        assert_eq!(ranges[0], BlockRange::new(6, 7).unwrap());
    }

    #[test]
    fn duplicate_fresh_entries_break_the_invariant() {
        let range = BlockRange::new(0, 1).unwrap();
        let persisted = vec![(0, test_hash(0)), (1, test_hash(1))];
        let fresh = vec![(0, test_hash(0)), (0, test_hash(0)), (1, test_hash(1))];
        let err = mismatch_ranges(range, &persisted, &fresh).unwrap_err();
        assert!(is_invariant_violation(&err));
    }

    #[tokio::test]
    async fn reconciler_reexports_only_mismatched_blocks() {
        let fetcher = MockFetcher::new(1, 100);
        let storage = MemoryStorage::new("db");
        let mon = monitor(fetcher.clone(), storage.clone(), 5);

        // persist blocks 6..=10 with the original hashes
        mon.engine
            .export_ranges(&[BlockRange::new(6, 10).unwrap()], 100)
            .await
            .unwrap();
        fetcher.attempts.lock().unwrap().clear();

        // the node now disagrees about blocks 7 and 9
        fetcher.override_hash(7, test_hash(777));
        fetcher.override_hash(9, test_hash(999));

        let ranges = mon.check_once().await.unwrap();
        assert_eq!(
            ranges,
            vec![BlockRange::new(7, 7).unwrap(), BlockRange::new(9, 9).unwrap()]
        );

        let attempted: HashSet<i64> = fetcher.attempt_log().into_iter().flatten().collect();
        assert_eq!(attempted, HashSet::from([7, 9]));

        let raw = RawBlockStore::new(storage);
        let hashes = raw
            .read_hashes(1, BlockRange::new(6, 10).unwrap())
            .await
            .unwrap();
        assert_eq!(hashes[1], (7, test_hash(777)));
        assert_eq!(hashes[3], (9, test_hash(999)));

        // a clean follow-up cycle reports nothing
        assert!(mon.check_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn gap_fill_reexports_holes() {
        let fetcher = MockFetcher::new(1, 100);
        let storage = MemoryStorage::new("db");
        let mon = monitor(fetcher.clone(), storage, 5);

        mon.engine
            .export_ranges(
                &[BlockRange::new(5, 5).unwrap(), BlockRange::new(10, 12).unwrap()],
                100,
            )
            .await
            .unwrap();

        let gaps = mon.fill_gaps(20).await.unwrap();
        assert_eq!(
            gaps,
            vec![
                BlockRange::new(0, 4).unwrap(),
                BlockRange::new(6, 9).unwrap(),
                BlockRange::new(13, 20).unwrap(),
            ]
        );
        assert_eq!(mon.status_store.present_ids(1).await.unwrap().len(), 21);
    }
}
