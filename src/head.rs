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


use tokio::sync::watch;

use crate::prelude::*;

/// Sentinel for "no head observed yet".
const NO_HEAD: i64 = -1;

/// How far into the stall threshold the head has drifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    Warn,
    Error,
    Fatal,
}

pub fn staleness_band(elapsed: Duration, threshold: Duration) -> Staleness {
    if elapsed >= threshold {
        Staleness::Fatal
    } else if elapsed >= threshold * 2 / 3 {
        Staleness::Error
    } else if elapsed >= threshold / 3 {
        Staleness::Warn
    } else {
        Staleness::Fresh
    }
}

/// Streaming source of new-head block numbers (`eth_subscribe("newHeads")`
/// in production). [`HeadTracker::run_push`] owns the reconnect policy.
pub trait HeadSubscription {
    async fn next_header(&mut self) -> Result<i64>;
    async fn resubscribe(&mut self) -> Result<()>;
}

/// Owns the current chain head behind an atomic snapshot and a watch channel.
/// Consumers read [`latest`](Self::latest) or await the channel; only the
/// tracker's run loop writes.
#[derive(Clone)]
pub struct HeadTracker {
    head: Arc<AtomicI64>,
    sender: Arc<watch::Sender<i64>>,
    alert: Alert,
}

impl HeadTracker {
    pub fn new(alert: Alert) -> (Self, watch::Receiver<i64>) {
        let (sender, receiver) = watch::channel(NO_HEAD);
        (
            Self {
                head: Arc::new(AtomicI64::new(NO_HEAD)),
                sender: Arc::new(sender),
                alert,
            },
            receiver,
        )
    }

    pub fn latest(&self) -> Option<i64> {
        match self.head.load(Ordering::SeqCst) {
            NO_HEAD => None,
            n => Some(n),
        }
    }

    /// A head below the previous one is a chain rewind the exporter cannot
    /// repair (the reorg path covers persisted data, not the head pointer)
    /// and is fatal.
    fn observe(&self, number: i64) -> Result<()> {
        let previous = self.head.swap(number, Ordering::SeqCst);
        if number < previous {
            self.head.store(previous, Ordering::SeqCst);
            bail!("chain head moved backwards: {previous} -> {number}");
        }
        if number > previous {
            debug!(head = number, "new chain head");
            let _ = self.sender.send(number);
        }
        Ok(())
    }

    async fn escalate(&self, elapsed: Duration, threshold: Duration) -> Result<()> {
        match staleness_band(elapsed, threshold) {
            Staleness::Fresh => {}
            Staleness::Warn => warn!(?elapsed, "chain head getting stale"),
            Staleness::Error => error!(?elapsed, "chain head stale"),
            Staleness::Fatal => {
                let msg = format!(
                    "no new chain head for {}s (threshold {}s)",
                    elapsed.as_secs(),
                    threshold.as_secs()
                );
                self.alert.send("chain head stalled", &msg).await;
                bail!(msg);
            }
        }
        Ok(())
    }

    /// Poll mode: `eth_blockNumber` at half the slot interval. Failed polls
    /// only advance the staleness clock; the bands do the escalation.
    pub async fn run_poll<F: BlockFetcher>(
        &self,
        fetcher: F,
        slot: Duration,
        stall_threshold: Duration,
    ) -> Result<()> {
        let mut last_update = Instant::now();
        loop {
            match fetcher.latest_block().await {
                Ok(number) => {
                    self.observe(number)?;
                    last_update = Instant::now();
                }
                Err(err) => warn!(%err, "head poll failed"),
            }
            self.escalate(last_update.elapsed(), stall_threshold).await?;
            sleep(slot / 2).await;
        }
    }

    /// Push mode: consume a header subscription, resubscribing after one
    /// slot on stream errors. Waiting is chunked so staleness bands fire
    /// even when the stream yields nothing at all.
    pub async fn run_push<S: HeadSubscription>(
        &self,
        mut subscription: S,
        slot: Duration,
        stall_threshold: Duration,
    ) -> Result<()> {
        let mut last_header = Instant::now();
        loop {
            match tokio::time::timeout(stall_threshold / 3, subscription.next_header()).await {
                Ok(Ok(number)) => {
                    self.observe(number)?;
                    last_header = Instant::now();
                }
                Ok(Err(err)) => {
                    warn!(%err, "head subscription errored, resubscribing");
                    sleep(slot).await;
                    if let Err(err) = subscription.resubscribe().await {
                        warn!(%err, "resubscribe failed");
                    }
                }
                Err(_) => {}
            }
            self.escalate(last_header.elapsed(), stall_threshold).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use super::*;
    use crate::test_utils::MockFetcher;

    /// Replays a fixed event script, then goes silent.
    #[derive(Clone)]
    struct ScriptedSubscription {
        script: Arc<Mutex<VecDeque<Result<i64>>>>,
        resubscribes: Arc<AtomicU64>,
    }

    impl ScriptedSubscription {
        fn new(events: Vec<Result<i64>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(events.into())),
                resubscribes: Arc::new(AtomicU64::new(0)),
            }
        }
    }

    impl HeadSubscription for ScriptedSubscription {
        async fn next_header(&mut self) -> Result<i64> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(event) => event,
                None => std::future::pending::<Result<i64>>().await,
            }
        }

        async fn resubscribe(&mut self) -> Result<()> {
            self.resubscribes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn bands_cover_the_threshold() {
        let t = Duration::from_secs(600);
        assert_eq!(staleness_band(Duration::from_secs(0), t), Staleness::Fresh);
        assert_eq!(staleness_band(Duration::from_secs(199), t), Staleness::Fresh);
        assert_eq!(staleness_band(Duration::from_secs(200), t), Staleness::Warn);
        assert_eq!(staleness_band(Duration::from_secs(400), t), Staleness::Error);
        assert_eq!(staleness_band(Duration::from_secs(600), t), Staleness::Fatal);
    }

    #[test]
    fn observe_tracks_monotonic_heads() {
        let (tracker, mut rx) = HeadTracker::new(Alert::disabled());
        assert_eq!(tracker.latest(), None);

        tracker.observe(10).unwrap();
        assert_eq!(tracker.latest(), Some(10));
        assert_eq!(*rx.borrow_and_update(), 10);

        // repeat head is fine but publishes nothing new
        tracker.observe(10).unwrap();
        assert!(!rx.has_changed().unwrap());

        tracker.observe(11).unwrap();
        assert_eq!(tracker.latest(), Some(11));
    }

    #[test]
    fn head_regression_is_fatal_and_preserves_state() {
        let (tracker, _rx) = HeadTracker::new(Alert::disabled());
        tracker.observe(10).unwrap();
        assert!(tracker.observe(9).is_err());
        assert_eq!(tracker.latest(), Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_mode_follows_the_fetcher() {
        let (tracker, _rx) = HeadTracker::new(Alert::disabled());
        let fetcher = MockFetcher::new(1, 100);

        let loop_tracker = tracker.clone();
        let loop_fetcher = fetcher.clone();
        let handle = tokio::spawn(async move {
            loop_tracker
                .run_poll(
                    loop_fetcher,
                    Duration::from_secs(12),
                    Duration::from_secs(600),
                )
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tracker.latest(), Some(100));

        fetcher.latest.store(101, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(tracker.latest(), Some(101));

        // rewind the mock: the loop must exit with an error
        fetcher.latest.store(50, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn push_mode_resubscribes_and_goes_fatal_on_silence() {
        let (tracker, _rx) = HeadTracker::new(Alert::disabled());
        let subscription = ScriptedSubscription::new(vec![
            Ok(5),
            Err(eyre!("stream reset")),
            Ok(6),
        ]);

        let loop_tracker = tracker.clone();
        let loop_subscription = subscription.clone();
        let handle = tokio::spawn(async move {
            loop_tracker
                .run_push(
                    loop_subscription,
                    Duration::from_secs(12),
                    Duration::from_secs(600),
                )
                .await
        });

        // header, one slot of backoff around the stream error, then the
        // post-resubscribe header
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(tracker.latest(), Some(6));
        assert_eq!(subscription.resubscribes.load(Ordering::SeqCst), 1);

        // the script is exhausted; silence must escalate to fatal
        tokio::time::sleep(Duration::from_secs(600)).await;
        let result = handle.await.unwrap();
        assert!(result.is_err());
        assert_eq!(tracker.latest(), Some(6));
    }
}
