//! Time-windowed single-flight cache in front of the [`Aggregator`].
//!
//! The slot holds the most recent aggregation as a shared future. While it is
//! pending, every forced caller awaits that same future. Once it has resolved,
//! the result is served until it is older than the TTL; the first forced caller
//! after that starts the next aggregation, which everyone else then joins.
//! Unforced callers never wait on a refresh once any cycle has completed.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::debug;

use crate::aggregator::Aggregator;
use crate::precision::precision4;
use crate::summary::{Snapshot, Summary};

type PendingSnapshot = Shared<BoxFuture<'static, Arc<Snapshot>>>;

#[derive(Default)]
struct Slot {
    /// Latest aggregation, finished or not.
    pending: Option<PendingSnapshot>,
    /// Result of the aggregation `pending` replaced.
    last_completed: Option<Arc<Snapshot>>,
}

pub struct RefreshCache {
    aggregator: Arc<Aggregator>,
    ttl: Duration,
    slot: Mutex<Slot>,
}

impl RefreshCache {
    pub fn new(aggregator: Arc<Aggregator>, ttl: Duration) -> Self {
        Self {
            aggregator,
            ttl,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Latest snapshot.
    ///
    /// With `force_refresh`, a snapshot older than the TTL is replaced by a new
    /// aggregation. Without it, whatever completed last is returned as is, even
    /// while a refresh is in flight, so the caller only ever waits for the very
    /// first cycle.
    pub async fn get(&self, force_refresh: bool) -> Arc<Snapshot> {
        let pending = {
            let mut slot = self.slot.lock().await;
            let Some(current) = slot.pending.clone() else {
                debug!("no summary yet; starting aggregation");
                let first = self.start(None);
                slot.pending = Some(first.clone());
                drop(slot);
                return first.await;
            };

            match current.peek().cloned() {
                Some(last) if !force_refresh || self.is_fresh(&last) => return last,
                Some(last) => {
                    debug!(ttl_secs = self.ttl.as_secs(), "summary is stale; refreshing");
                    let next = self.start(Some(Arc::clone(&last)));
                    slot.pending = Some(next.clone());
                    slot.last_completed = Some(last);
                    next
                }
                None => match (&slot.last_completed, force_refresh) {
                    (Some(last), false) => {
                        debug!("refresh in flight; serving last completed summary");
                        return Arc::clone(last);
                    }
                    _ => {
                        debug!("joining in-flight aggregation");
                        current
                    }
                },
            }
        };
        pending.await
    }

    fn is_fresh(&self, snapshot: &Snapshot) -> bool {
        let age_ms = self
            .aggregator
            .clock()
            .now_ms()
            .saturating_sub(snapshot.server_time());
        u128::from(age_ms) <= self.ttl.as_millis()
    }

    fn start(&self, prior: Option<Arc<Snapshot>>) -> PendingSnapshot {
        let aggregator = Arc::clone(&self.aggregator);
        async move {
            let snapshot = aggregator.aggregate().await;
            Arc::new(link_previous(snapshot, prior.as_deref()))
        }
        .boxed()
        .shared()
    }
}

/// Point a fresh summary at the prior one and derive the mempool throughput.
/// Nothing is linked when either side is an error.
fn link_previous(snapshot: Snapshot, prior: Option<&Snapshot>) -> Snapshot {
    match (snapshot, prior) {
        (Snapshot::Ready(mut summary), Some(Snapshot::Ready(prior))) => {
            let current = Arc::make_mut(&mut summary);
            current.mempool.ntx_per_second = throughput(prior, current);
            current.previous = Some(Arc::new(Summary {
                previous: None,
                ..Summary::clone(prior)
            }));
            Snapshot::Ready(summary)
        }
        (snapshot, _) => snapshot,
    }
}

/// Transactions added to mempool or chain per second between two summaries.
fn throughput(prior: &Summary, current: &Summary) -> Option<f64> {
    let elapsed_ms = current.server_time.checked_sub(prior.server_time)?;
    if elapsed_ms == 0 {
        return None;
    }
    let added = (current.mempool.ntx + current.ntx) as f64 - (prior.mempool.ntx + prior.ntx) as f64;
    Some(precision4(added / (elapsed_ms as f64 / 1000.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorConfig;
    use crate::clock::ManualClock;
    use crate::rpc::methods;
    use crate::rpc::mock::MockRpc;

    const TTL: Duration = Duration::from_secs(5);

    fn setup(rpc: MockRpc) -> (Arc<MockRpc>, Arc<ManualClock>, RefreshCache) {
        let rpc = Arc::new(rpc);
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let aggregator = Arc::new(Aggregator::new(
            rpc.clone(),
            clock.clone(),
            AggregatorConfig::default(),
        ));
        (rpc, clock, RefreshCache::new(aggregator, TTL))
    }

    fn summary(snapshot: &Snapshot) -> &Arc<Summary> {
        snapshot.summary().expect("snapshot must be a summary")
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_cycle() {
        let (rpc, _clock, cache) = setup(
            MockRpc::builder()
                .with_latency(Duration::from_millis(20))
                .build(),
        );

        let (a, b) = tokio::join!(cache.get(true), cache.get(true));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(rpc.calls(methods::UPTIME), 1);
    }

    #[tokio::test]
    async fn fresh_result_is_reused_until_ttl_expires() {
        let (rpc, clock, cache) = setup(MockRpc::builder().build());

        let first = cache.get(true).await;
        clock.advance(TTL);
        let second = cache.get(true).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(rpc.calls(methods::UPTIME), 1);

        clock.advance(Duration::from_millis(1));
        let third = cache.get(true).await;
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(rpc.calls(methods::UPTIME), 2);

        let fourth = cache.get(true).await;
        assert!(Arc::ptr_eq(&third, &fourth));
        assert_eq!(rpc.calls(methods::UPTIME), 2);
    }

    #[tokio::test]
    async fn unforced_get_serves_stale_result() {
        let (rpc, clock, cache) = setup(MockRpc::builder().build());

        let first = cache.get(false).await;
        clock.advance(TTL * 10);
        let second = cache.get(false).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(rpc.calls(methods::UPTIME), 1);
    }

    #[tokio::test]
    async fn unforced_get_does_not_wait_for_in_flight_refresh() {
        let (rpc, clock, cache) = setup(
            MockRpc::builder()
                .with_latency(Duration::from_millis(300))
                .build(),
        );
        let cache = Arc::new(cache);

        let first = cache.get(true).await;
        clock.advance(TTL * 2);
        let refresh = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.get(true).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let unforced = tokio::time::timeout(Duration::from_millis(100), cache.get(false))
            .await
            .expect("unforced get must not wait for the in-flight refresh");
        assert!(Arc::ptr_eq(&first, &unforced));

        let refreshed = refresh.await.expect("refresh task must not panic");
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(rpc.calls(methods::UPTIME), 2);

        let latest = cache.get(false).await;
        assert!(Arc::ptr_eq(&refreshed, &latest));
    }

    #[tokio::test]
    async fn unforced_get_waits_for_the_first_cycle() {
        let (rpc, _clock, cache) = setup(
            MockRpc::builder()
                .with_latency(Duration::from_millis(20))
                .build(),
        );

        let (forced, unforced) = tokio::join!(cache.get(true), cache.get(false));

        assert!(Arc::ptr_eq(&forced, &unforced));
        assert_eq!(rpc.calls(methods::UPTIME), 1);
    }

    #[tokio::test]
    async fn throughput_is_derived_from_consecutive_summaries() {
        let (rpc, clock, cache) = setup(MockRpc::builder().build());

        let first = cache.get(true).await;
        assert_eq!(summary(&first).mempool.ntx_per_second, None);
        assert!(summary(&first).previous.is_none());

        rpc.set_mempool_size(130);
        rpc.set_tx_count(900_020);
        clock.advance(Duration::from_secs(10));
        let second = cache.get(true).await;

        let second = summary(&second);
        assert_eq!(second.mempool.ntx_per_second, Some(5.0));
        let previous = second.previous.as_ref().expect("previous must be linked");
        assert_eq!(previous.mempool.ntx, 100);
        assert_eq!(previous.ntx, 900_000);
    }

    #[tokio::test]
    async fn history_is_one_snapshot_deep() {
        let (_rpc, clock, cache) = setup(MockRpc::builder().build());

        cache.get(true).await;
        for _ in 0..2 {
            clock.advance(TTL * 2);
            cache.get(true).await;
        }
        let latest = cache.get(true).await;

        let previous = summary(&latest)
            .previous
            .as_ref()
            .expect("previous must be linked");
        assert!(previous.previous.is_none());
    }

    #[tokio::test]
    async fn error_snapshots_are_never_linked() {
        let (rpc, clock, cache) =
            setup(MockRpc::builder().with_failure(methods::GET_PEER_INFO).build());

        let failed = cache.get(true).await;
        let err = failed.error().expect("first cycle must fail");
        assert_eq!(err.method, methods::GET_PEER_INFO);

        // A failed snapshot is cached for the TTL like any other.
        rpc.set_failure(methods::GET_PEER_INFO, false);
        assert!(cache.get(true).await.is_err());

        clock.advance(TTL * 2);
        let recovered = cache.get(true).await;
        let recovered = summary(&recovered);
        assert!(recovered.previous.is_none());
        assert_eq!(recovered.mempool.ntx_per_second, None);

        rpc.set_failure(methods::GET_PEER_INFO, true);
        clock.advance(TTL * 2);
        assert!(cache.get(true).await.is_err());

        rpc.set_failure(methods::GET_PEER_INFO, false);
        clock.advance(TTL * 2);
        let after_error = cache.get(true).await;
        assert!(summary(&after_error).previous.is_none());
    }
}
