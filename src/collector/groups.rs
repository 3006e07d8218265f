use crate::collector::rate::ConsumptionState;
use crate::collector::snapshot::PartitionOffsetSnapshot;
use crate::kafka::gateway::{
    BrokerId, ClusterGateway, FetchedOffset, GroupDescription, TopicPartition, UNCOMMITTED_OFFSET,
};
use crate::metrics::definitions::{
    CONSUMERGROUP_CURRENT_OFFSET, CONSUMERGROUP_CURRENT_OFFSET_SUM, CONSUMERGROUP_LAG,
    CONSUMERGROUP_LAG_SUM_RATE, CONSUMERGROUP_MEMBERS,
};
use crate::metrics::types::{emit, MetricSink, Sample};
use futures::future::join_all;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct ConsumerGroupScanner {
    gateway: Arc<dyn ClusterGateway>,
    group_filter: Regex,
    offset_show_all: bool,
    state: Arc<ConsumptionState>,
}

impl ConsumerGroupScanner {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        group_filter: Regex,
        offset_show_all: bool,
        state: Arc<ConsumptionState>,
    ) -> Self {
        Self {
            gateway,
            group_filter,
            offset_show_all,
            state,
        }
    }

    /// Evaluate the consumer groups of every broker, one concurrent unit per
    /// broker. A broker whose discovery fails logs and contributes nothing.
    pub async fn scan(
        &self,
        brokers: &[BrokerId],
        snapshot: &PartitionOffsetSnapshot,
        sink: &MetricSink,
        now_secs: i64,
    ) {
        join_all(
            brokers
                .iter()
                .map(|&broker| self.scan_broker(broker, snapshot, sink, now_secs)),
        )
        .await;
    }

    async fn scan_broker(
        &self,
        broker: BrokerId,
        snapshot: &PartitionOffsetSnapshot,
        sink: &MetricSink,
        now_secs: i64,
    ) {
        let group_ids = match self.gateway.list_groups(broker).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(broker, error = %e, "Cannot list consumer groups");
                return;
            }
        };

        let matching: Vec<String> = group_ids
            .into_iter()
            .filter(|id| self.group_filter.is_match(id))
            .collect();
        if matching.is_empty() {
            return;
        }

        let groups = match self.gateway.describe_groups(broker, &matching).await {
            Ok(groups) => groups,
            Err(e) => {
                warn!(broker, error = %e, "Cannot describe consumer groups");
                return;
            }
        };

        for group in &groups {
            self.evaluate_group(broker, group, snapshot, sink, now_secs)
                .await;
        }
    }

    async fn evaluate_group(
        &self,
        broker: BrokerId,
        group: &GroupDescription,
        snapshot: &PartitionOffsetSnapshot,
        sink: &MetricSink,
        now_secs: i64,
    ) {
        emit(
            sink,
            Sample::gauge(
                &CONSUMERGROUP_MEMBERS,
                group.members.len() as f64,
                vec![group.group_id.clone()],
            ),
        );
        for member in &group.members {
            trace!(
                group = %group.group_id,
                member = %member.member_id,
                client = %member.client_id,
                host = %member.client_host,
                partitions = member.assignment.len(),
                "Group member"
            );
        }

        let evaluation_set = self.evaluation_set(group, snapshot);
        if evaluation_set.is_empty() {
            debug!(group = %group.group_id, "No partitions to evaluate");
            return;
        }

        let committed = match self
            .gateway
            .fetch_committed_offsets(broker, &group.group_id, &evaluation_set)
            .await
        {
            Ok(committed) => committed,
            Err(e) => {
                warn!(group = %group.group_id, error = %e, "Cannot fetch committed offsets");
                return;
            }
        };

        let mut by_topic: BTreeMap<&str, Vec<(i32, &FetchedOffset)>> = BTreeMap::new();
        for (tp, fetched) in &committed {
            by_topic
                .entry(tp.topic.as_str())
                .or_default()
                .push((tp.partition, fetched));
        }

        for (topic, mut partitions) in by_topic {
            // Topics where every partition is uncommitted are noise, not lag.
            let consumed = partitions
                .iter()
                .any(|(_, f)| f.error.is_none() && f.offset != UNCOMMITTED_OFFSET);
            if !consumed {
                continue;
            }
            partitions.sort_by_key(|(partition, _)| *partition);
            self.report_topic(&group.group_id, topic, &partitions, snapshot, sink, now_secs);
        }
    }

    /// Which partitions to fetch commits for: every partition of every known
    /// topic in show-all mode, otherwise the union of the live members'
    /// reported assignments.
    fn evaluation_set(
        &self,
        group: &GroupDescription,
        snapshot: &PartitionOffsetSnapshot,
    ) -> Vec<TopicPartition> {
        if self.offset_show_all {
            let mut set: Vec<TopicPartition> = snapshot
                .topic_partitions()
                .iter()
                .flat_map(|(topic, partitions)| {
                    partitions
                        .iter()
                        .map(|&partition| TopicPartition::new(topic.clone(), partition))
                })
                .collect();
            set.sort();
            set
        } else {
            let set: BTreeSet<TopicPartition> = group
                .members
                .iter()
                .flat_map(|member| member.assignment.iter().cloned())
                .collect();
            set.into_iter().collect()
        }
    }

    fn report_topic(
        &self,
        group_id: &str,
        topic: &str,
        partitions: &[(i32, &FetchedOffset)],
        snapshot: &PartitionOffsetSnapshot,
        sink: &MetricSink,
        now_secs: i64,
    ) {
        let mut offset_sum: i64 = 0;
        let mut lag_sum: i64 = 0;

        for &(partition, fetched) in partitions {
            if let Some(error) = &fetched.error {
                warn!(group = group_id, topic, partition, error = %error, "Committed offset fetch failed");
                continue;
            }

            let labels = vec![group_id.to_string(), topic.to_string(), partition.to_string()];
            emit(
                sink,
                Sample::gauge(&CONSUMERGROUP_CURRENT_OFFSET, fetched.offset as f64, labels.clone()),
            );

            if fetched.offset == UNCOMMITTED_OFFSET {
                // Sentinel lag, distinguishable from zero, excluded from the sum.
                emit(sink, Sample::gauge(&CONSUMERGROUP_LAG, -1.0, labels));
                continue;
            }
            offset_sum += fetched.offset;

            match snapshot.latest_offset(&TopicPartition::new(topic, partition)) {
                Some(latest) => {
                    let lag = latest - fetched.offset;
                    lag_sum += lag;
                    emit(sink, Sample::gauge(&CONSUMERGROUP_LAG, lag as f64, labels));
                }
                None => {
                    warn!(group = group_id, topic, partition, "No latest offset in snapshot, cannot compute lag");
                }
            }
        }

        emit(
            sink,
            Sample::gauge(
                &CONSUMERGROUP_CURRENT_OFFSET_SUM,
                offset_sum as f64,
                vec![group_id.to_string(), topic.to_string()],
            ),
        );

        let estimate = self.state.update(group_id, topic, offset_sum, now_secs);
        emit(
            sink,
            Sample::gauge(
                &CONSUMERGROUP_LAG_SUM_RATE,
                lag_sum as f64,
                vec![
                    group_id.to_string(),
                    topic.to_string(),
                    estimate.rate_label(),
                    estimate.eta_label(),
                    estimate.elapsed_label(),
                ],
            ),
        );
    }
}
