use crate::collector::groups::ConsumerGroupScanner;
use crate::collector::rate::ConsumptionState;
use crate::collector::snapshot::OffsetSnapshotBuilder;
use crate::error::{ExporterError, Result};
use crate::kafka::gateway::ClusterGateway;
use crate::metrics::definitions::BROKERS;
use crate::metrics::types::{emit, Sample};
use regex::Regex;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, instrument};

/// Entry point of the collection engine. Serializes scrape requests: while a
/// cycle is in flight, further requests wait for it and receive the same
/// sample set instead of triggering their own collection.
pub struct ScrapeCoordinator {
    runner: Arc<CycleRunner>,
    allow_concurrent: bool,
}

impl ScrapeCoordinator {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        topic_filter: Regex,
        group_filter: Regex,
        topic_workers: usize,
        offset_show_all: bool,
        allow_concurrent: bool,
        metadata_refresh_interval: Duration,
    ) -> Self {
        let state = Arc::new(ConsumptionState::new());
        Self {
            runner: Arc::new(CycleRunner {
                builder: OffsetSnapshotBuilder::new(
                    Arc::clone(&gateway),
                    topic_filter,
                    topic_workers,
                    metadata_refresh_interval,
                ),
                scanner: ConsumerGroupScanner::new(
                    Arc::clone(&gateway),
                    group_filter,
                    offset_show_all,
                    Arc::clone(&state),
                ),
                gateway,
                state,
                waiters: Mutex::new(Vec::new()),
            }),
            allow_concurrent,
        }
    }

    /// Run or join a collection cycle and return its samples. The first
    /// requester to register spawns the cycle as a detached task; everyone
    /// registered before it finishes gets the identical sample set. The task
    /// outlives its initiator, so an abandoned request (scraper disconnect)
    /// still completes the cycle and drains the registry.
    pub async fn request_scrape(&self) -> Result<Arc<Vec<Sample>>> {
        if self.allow_concurrent {
            return Ok(Arc::new(self.runner.run_cycle().await));
        }

        let (tx, rx) = oneshot::channel();
        let starts_cycle = {
            let mut waiters = self.runner.waiters.lock().expect("waiter registry lock poisoned");
            waiters.push(tx);
            waiters.len() == 1
        };

        if starts_cycle {
            let runner = Arc::clone(&self.runner);
            tokio::spawn(runner.drive());
        }

        rx.await
            .map_err(|_| ExporterError::Task("collection cycle aborted".to_string()))
    }
}

/// Owns one collection cycle end to end. `Arc`'d so the in-flight cycle is
/// independent of the request that started it.
struct CycleRunner {
    gateway: Arc<dyn ClusterGateway>,
    builder: OffsetSnapshotBuilder,
    scanner: ConsumerGroupScanner,
    state: Arc<ConsumptionState>,
    waiters: Mutex<Vec<oneshot::Sender<Arc<Vec<Sample>>>>>,
}

impl CycleRunner {
    /// Run one cycle, then fan the buffered sample set out to every waiter
    /// registered so far, under the registry lock.
    async fn drive(self: Arc<Self>) {
        let samples = Arc::new(self.run_cycle().await);

        let mut waiters = self.waiters.lock().expect("waiter registry lock poisoned");
        debug!(waiters = waiters.len(), "Collection cycle complete");
        for waiter in waiters.drain(..) {
            // A waiter that gave up just drops its receiver.
            let _ = waiter.send(Arc::clone(&samples));
        }
    }

    async fn run_cycle(&self) -> Vec<Sample> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.collect(&tx).await;
        drop(tx);

        let mut samples = Vec::new();
        while let Some(sample) = rx.recv().await {
            samples.push(sample);
        }
        samples
    }

    #[instrument(skip_all)]
    async fn collect(&self, sink: &mpsc::UnboundedSender<Sample>) {
        let brokers = match self.gateway.brokers().await {
            Ok(brokers) => {
                emit(sink, Sample::gauge(&BROKERS, brokers.len() as f64, vec![]));
                brokers
            }
            Err(e) => {
                error!(error = %e, "Cannot get broker list");
                Vec::new()
            }
        };

        let snapshot = self.builder.build(sink).await;

        if brokers.is_empty() {
            error!("No valid broker, cannot get consumer group metrics");
        } else {
            self.scanner
                .scan(&brokers, &snapshot, sink, unix_now())
                .await;
        }

        self.state.finish_cycle(unix_now());
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeGateway, FakePartition};
    use std::sync::atomic::Ordering;
    use tokio::time::timeout;

    fn coordinator(gateway: Arc<FakeGateway>, allow_concurrent: bool, refresh: Duration) -> ScrapeCoordinator {
        ScrapeCoordinator::new(
            gateway as Arc<dyn ClusterGateway>,
            Regex::new(".*").expect("filter"),
            Regex::new(".*").expect("filter"),
            4,
            true,
            allow_concurrent,
            refresh,
        )
    }

    fn delayed_gateway() -> Arc<FakeGateway> {
        Arc::new(
            FakeGateway::new(vec![1])
                .with_topic("orders", vec![FakePartition::new(0, 10)])
                .with_topic("payments", vec![FakePartition::new(0, 10)])
                .with_topics_delay(Duration::from_millis(50)),
        )
    }

    #[tokio::test]
    async fn concurrent_scrapes_coalesce_into_one_cycle() {
        let gateway = delayed_gateway();
        let coordinator = Arc::new(coordinator(Arc::clone(&gateway), false, Duration::from_secs(3600)));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move { coordinator.request_scrape().await }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.expect("scrape task").expect("scrape"));
        }

        assert_eq!(gateway.topics_calls.load(Ordering::SeqCst), 1);
        assert!(!results[0].is_empty());
        for other in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], other));
        }
    }

    #[tokio::test]
    async fn cancelled_requester_does_not_wedge_later_scrapes() {
        let gateway = delayed_gateway();
        let coordinator = Arc::new(coordinator(Arc::clone(&gateway), false, Duration::from_secs(3600)));

        // First scraper disconnects while its cycle is still in flight.
        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.request_scrape().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        first.abort();

        // The cycle must complete and drain the registry on its own; the
        // next scrape joins it instead of hanging.
        let samples = timeout(Duration::from_secs(5), coordinator.request_scrape())
            .await
            .expect("scrape must not hang")
            .expect("scrape");

        assert!(!samples.is_empty());
        assert_eq!(gateway.topics_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_scrapes_each_run_a_cycle() {
        let gateway = Arc::new(
            FakeGateway::new(vec![1])
                .with_topic("orders", vec![FakePartition::new(0, 10)])
                .with_topic("payments", vec![FakePartition::new(0, 10)]),
        );
        let coordinator = coordinator(Arc::clone(&gateway), false, Duration::from_secs(3600));

        coordinator.request_scrape().await.expect("scrape");
        coordinator.request_scrape().await.expect("scrape");

        assert_eq!(gateway.topics_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn allow_concurrent_bypasses_coalescing() {
        let gateway = delayed_gateway();
        let coordinator = Arc::new(coordinator(Arc::clone(&gateway), true, Duration::from_secs(3600)));

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.request_scrape().await })
        };
        let second = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.request_scrape().await })
        };
        first.await.expect("first scrape task").expect("first scrape");
        second.await.expect("second scrape task").expect("second scrape");

        assert_eq!(gateway.topics_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn broker_failure_skips_group_scan_but_walks_topics() {
        let gateway = Arc::new(
            FakeGateway::new(vec![1])
                .with_topic("orders", vec![FakePartition::new(0, 10)])
                .with_topic("payments", vec![FakePartition::new(0, 10)])
                .fail_brokers(),
        );
        let coordinator = coordinator(Arc::clone(&gateway), false, Duration::from_secs(3600));

        let samples = coordinator.request_scrape().await.expect("scrape");

        assert!(!samples.iter().any(|s| s.descriptor.name == "kafka_brokers"));
        assert!(!samples
            .iter()
            .any(|s| s.descriptor.name.starts_with("kafka_consumergroup")));
        assert!(samples
            .iter()
            .any(|s| s.descriptor.name == "kafka_topic_partitions"));
    }

    #[tokio::test]
    async fn metadata_refresh_honors_interval() {
        let gateway = Arc::new(
            FakeGateway::new(vec![1])
                .with_topic("orders", vec![FakePartition::new(0, 10)])
                .with_topic("payments", vec![FakePartition::new(0, 10)]),
        );

        let lazy = coordinator(Arc::clone(&gateway), false, Duration::from_secs(3600));
        lazy.request_scrape().await.expect("scrape");
        assert_eq!(gateway.refresh_calls.load(Ordering::SeqCst), 0);

        let eager = coordinator(Arc::clone(&gateway), false, Duration::ZERO);
        eager.request_scrape().await.expect("scrape");
        eager.request_scrape().await.expect("scrape");
        assert_eq!(gateway.refresh_calls.load(Ordering::SeqCst), 2);
    }
}
