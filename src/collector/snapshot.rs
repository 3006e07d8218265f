use crate::kafka::gateway::{ClusterGateway, OffsetSpec, TopicPartition};
use crate::metrics::definitions::{
    TOPIC_CURRENT_OFFSET, TOPIC_OLDEST_OFFSET, TOPIC_PARTITIONS, TOPIC_PARTITION_IN_SYNC_REPLICAS,
    TOPIC_PARTITION_LEADER, TOPIC_PARTITION_REPLICAS, TOPIC_PARTITION_USES_PREFERRED_REPLICA,
    TOPIC_UNDER_REPLICATED_PARTITION,
};
use crate::metrics::types::{emit, MetricSink, Sample};
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Latest-produced offsets observed during one cycle's topic walk, plus the
/// partition directory of every walked topic. Fully populated before group
/// lag computation starts, read-only afterwards.
#[derive(Debug, Default)]
pub struct PartitionOffsetSnapshot {
    latest: HashMap<TopicPartition, i64>,
    topic_partitions: HashMap<String, Vec<i32>>,
}

impl PartitionOffsetSnapshot {
    /// Latest produced offset for a partition. `None` when the fetch failed
    /// during the walk; lag is then not computed for that partition, never
    /// treated as zero.
    pub fn latest_offset(&self, tp: &TopicPartition) -> Option<i64> {
        self.latest.get(tp).copied()
    }

    pub fn topic_partitions(&self) -> &HashMap<String, Vec<i32>> {
        &self.topic_partitions
    }
}

pub struct OffsetSnapshotBuilder {
    gateway: Arc<dyn ClusterGateway>,
    topic_filter: Regex,
    topic_workers: usize,
    metadata_refresh_interval: Duration,
    next_refresh: Mutex<Instant>,
}

impl OffsetSnapshotBuilder {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        topic_filter: Regex,
        topic_workers: usize,
        metadata_refresh_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            topic_filter,
            topic_workers,
            metadata_refresh_interval,
            next_refresh: Mutex::new(Instant::now() + metadata_refresh_interval),
        }
    }

    /// Walk all topics matching the filter with a bounded worker pool,
    /// emitting per-partition facts and recording latest offsets. Every fetch
    /// failure is local: it costs the affected sample (and, for the latest
    /// offset, the snapshot entry), nothing else.
    pub async fn build(&self, sink: &MetricSink) -> PartitionOffsetSnapshot {
        self.maybe_refresh_metadata().await;

        let topics = match self.gateway.topics().await {
            Ok(topics) => topics,
            Err(e) => {
                warn!(error = %e, "Cannot list topics, skipping topic walk");
                return PartitionOffsetSnapshot::default();
            }
        };

        // Pool size is floor(cluster topic count / 2) capped by
        // configuration, before filtering; zero workers means no topics are
        // processed this cycle.
        let worker_count = (topics.len() / 2).min(self.topic_workers);
        if worker_count == 0 {
            debug!(topics = topics.len(), "Not enough topics for a worker pool");
            return PartitionOffsetSnapshot::default();
        }

        let filtered: Vec<String> = topics
            .into_iter()
            .filter(|t| self.topic_filter.is_match(t))
            .collect();

        let queue = Arc::new(Mutex::new(VecDeque::from(filtered)));
        let state = Arc::new(Mutex::new(PartitionOffsetSnapshot::default()));

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let gateway = Arc::clone(&self.gateway);
            let queue = Arc::clone(&queue);
            let state = Arc::clone(&state);
            let sink = sink.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    let topic = queue.lock().expect("topic queue lock poisoned").pop_front();
                    let Some(topic) = topic else { break };
                    collect_topic(gateway.as_ref(), &topic, &sink, &state).await;
                }
            }));
        }

        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Topic worker panicked");
            }
        }

        let state = Arc::try_unwrap(state).expect("workers still hold snapshot state");
        state.into_inner().expect("snapshot lock poisoned")
    }

    /// Request a metadata refresh once the interval deadline has passed.
    /// Failure is non-fatal: the walk proceeds with cached metadata.
    async fn maybe_refresh_metadata(&self) {
        let due = {
            let deadline = self.next_refresh.lock().expect("refresh deadline lock poisoned");
            Instant::now() >= *deadline
        };
        if !due {
            return;
        }

        match self.gateway.refresh_metadata().await {
            Ok(()) => debug!("Refreshed cluster metadata"),
            Err(e) => error!(error = %e, "Cannot refresh metadata, using cached data"),
        }

        let mut deadline = self.next_refresh.lock().expect("refresh deadline lock poisoned");
        *deadline = Instant::now() + self.metadata_refresh_interval;
    }
}

async fn collect_topic(
    gateway: &dyn ClusterGateway,
    topic: &str,
    sink: &MetricSink,
    state: &Mutex<PartitionOffsetSnapshot>,
) {
    let partitions = match gateway.partitions(topic).await {
        Ok(partitions) => partitions,
        Err(e) => {
            warn!(topic, error = %e, "Cannot get partitions of topic");
            return;
        }
    };

    emit(
        sink,
        Sample::gauge(
            &TOPIC_PARTITIONS,
            partitions.len() as f64,
            vec![topic.to_string()],
        ),
    );

    {
        let mut state = state.lock().expect("snapshot lock poisoned");
        state
            .topic_partitions
            .insert(topic.to_string(), partitions.clone());
    }

    for partition in partitions {
        collect_partition(gateway, topic, partition, sink, state).await;
    }
}

async fn collect_partition(
    gateway: &dyn ClusterGateway,
    topic: &str,
    partition: i32,
    sink: &MetricSink,
    state: &Mutex<PartitionOffsetSnapshot>,
) {
    let labels = || vec![topic.to_string(), partition.to_string()];

    let leader = match gateway.leader(topic, partition).await {
        Ok(leader) => {
            emit(
                sink,
                Sample::gauge(&TOPIC_PARTITION_LEADER, f64::from(leader), labels()),
            );
            Some(leader)
        }
        Err(e) => {
            warn!(topic, partition, error = %e, "Cannot get leader");
            None
        }
    };

    match gateway.get_offset(topic, partition, OffsetSpec::Newest).await {
        Ok(offset) => {
            {
                let mut state = state.lock().expect("snapshot lock poisoned");
                state
                    .latest
                    .insert(TopicPartition::new(topic, partition), offset);
            }
            emit(
                sink,
                Sample::gauge(&TOPIC_CURRENT_OFFSET, offset as f64, labels()),
            );
        }
        Err(e) => {
            warn!(topic, partition, error = %e, "Cannot get current offset");
        }
    }

    match gateway.get_offset(topic, partition, OffsetSpec::Oldest).await {
        Ok(offset) => emit(
            sink,
            Sample::gauge(&TOPIC_OLDEST_OFFSET, offset as f64, labels()),
        ),
        Err(e) => {
            warn!(topic, partition, error = %e, "Cannot get oldest offset");
        }
    }

    let replicas = match gateway.replicas(topic, partition).await {
        Ok(replicas) => {
            emit(
                sink,
                Sample::gauge(
                    &TOPIC_PARTITION_REPLICAS,
                    replicas.len() as f64,
                    labels(),
                ),
            );
            Some(replicas)
        }
        Err(e) => {
            warn!(topic, partition, error = %e, "Cannot get replicas");
            None
        }
    };

    let in_sync = match gateway.in_sync_replicas(topic, partition).await {
        Ok(in_sync) => {
            emit(
                sink,
                Sample::gauge(
                    &TOPIC_PARTITION_IN_SYNC_REPLICAS,
                    in_sync.len() as f64,
                    labels(),
                ),
            );
            Some(in_sync)
        }
        Err(e) => {
            warn!(topic, partition, error = %e, "Cannot get in-sync replicas");
            None
        }
    };

    // Derived facts default to false whenever an input needed to decide is
    // unavailable.
    let uses_preferred = match (leader, &replicas) {
        (Some(leader), Some(replicas)) => replicas.first() == Some(&leader),
        _ => false,
    };
    emit(
        sink,
        Sample::gauge(
            &TOPIC_PARTITION_USES_PREFERRED_REPLICA,
            f64::from(u8::from(uses_preferred)),
            labels(),
        ),
    );

    let under_replicated = match (&replicas, &in_sync) {
        (Some(replicas), Some(in_sync)) => in_sync.len() < replicas.len(),
        _ => false,
    };
    emit(
        sink,
        Sample::gauge(
            &TOPIC_UNDER_REPLICATED_PARTITION,
            f64::from(u8::from(under_replicated)),
            labels(),
        ),
    );
}
