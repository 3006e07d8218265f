use crate::error::{ExporterError, Result};
use crate::kafka::gateway::{
    BrokerId, ClusterGateway, FetchedOffset, GroupDescription, GroupMember, OffsetSpec,
    TopicPartition,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One partition of a fake topic, with everything the collection engine can
/// ask about it.
#[derive(Debug, Clone)]
pub struct FakePartition {
    pub id: i32,
    pub leader: BrokerId,
    pub replicas: Vec<BrokerId>,
    pub isr: Vec<BrokerId>,
    pub latest: i64,
    pub oldest: i64,
}

impl FakePartition {
    pub fn new(id: i32, latest: i64) -> Self {
        Self {
            id,
            leader: 1,
            replicas: vec![1],
            isr: vec![1],
            latest,
            oldest: 0,
        }
    }

    pub fn with_replication(mut self, leader: BrokerId, replicas: Vec<BrokerId>, isr: Vec<BrokerId>) -> Self {
        self.leader = leader;
        self.replicas = replicas;
        self.isr = isr;
        self
    }
}

/// In-memory `ClusterGateway` with per-call failure injection and call
/// counters.
#[derive(Default)]
pub struct FakeGateway {
    brokers: Vec<BrokerId>,
    topics: HashMap<String, Vec<FakePartition>>,
    groups: HashMap<BrokerId, Vec<GroupDescription>>,
    committed: HashMap<(String, TopicPartition), FetchedOffset>,
    fail_brokers: bool,
    fail_topics: bool,
    fail_partitions: HashSet<String>,
    fail_leader: HashSet<TopicPartition>,
    fail_replicas: HashSet<TopicPartition>,
    fail_isr: HashSet<TopicPartition>,
    fail_latest: HashSet<TopicPartition>,
    fail_oldest: HashSet<TopicPartition>,
    fail_committed: HashSet<String>,
    topics_delay: Option<Duration>,
    pub topics_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new(brokers: Vec<BrokerId>) -> Self {
        Self {
            brokers,
            ..Self::default()
        }
    }

    pub fn with_topic(mut self, name: &str, partitions: Vec<FakePartition>) -> Self {
        self.topics.insert(name.to_string(), partitions);
        self
    }

    pub fn with_group(mut self, broker: BrokerId, group: GroupDescription) -> Self {
        self.groups.entry(broker).or_default().push(group);
        self
    }

    pub fn with_committed(mut self, group: &str, tp: TopicPartition, fetched: FetchedOffset) -> Self {
        self.committed.insert((group.to_string(), tp), fetched);
        self
    }

    pub fn fail_brokers(mut self) -> Self {
        self.fail_brokers = true;
        self
    }

    pub fn fail_topics(mut self) -> Self {
        self.fail_topics = true;
        self
    }

    pub fn fail_partitions(mut self, topic: &str) -> Self {
        self.fail_partitions.insert(topic.to_string());
        self
    }

    pub fn fail_leader(mut self, tp: TopicPartition) -> Self {
        self.fail_leader.insert(tp);
        self
    }

    pub fn fail_replicas(mut self, tp: TopicPartition) -> Self {
        self.fail_replicas.insert(tp);
        self
    }

    pub fn fail_isr(mut self, tp: TopicPartition) -> Self {
        self.fail_isr.insert(tp);
        self
    }

    pub fn fail_latest(mut self, tp: TopicPartition) -> Self {
        self.fail_latest.insert(tp);
        self
    }

    pub fn fail_oldest(mut self, tp: TopicPartition) -> Self {
        self.fail_oldest.insert(tp);
        self
    }

    pub fn fail_committed(mut self, group: &str) -> Self {
        self.fail_committed.insert(group.to_string());
        self
    }

    /// Delay every `topics()` call, to hold a collection cycle open while
    /// concurrent scrape requests pile up.
    pub fn with_topics_delay(mut self, delay: Duration) -> Self {
        self.topics_delay = Some(delay);
        self
    }

    fn partition(&self, topic: &str, partition: i32) -> Result<&FakePartition> {
        self.topics
            .get(topic)
            .and_then(|parts| parts.iter().find(|p| p.id == partition))
            .ok_or_else(|| ExporterError::Metadata(format!("unknown partition {topic}/{partition}")))
    }
}

pub fn member(id: &str, assignment: Vec<TopicPartition>) -> GroupMember {
    GroupMember {
        member_id: id.to_string(),
        client_id: format!("client-{id}"),
        client_host: "/10.0.0.1".to_string(),
        assignment,
    }
}

pub fn group(id: &str, members: Vec<GroupMember>) -> GroupDescription {
    GroupDescription {
        group_id: id.to_string(),
        members,
    }
}

#[async_trait]
impl ClusterGateway for FakeGateway {
    async fn brokers(&self) -> Result<Vec<BrokerId>> {
        if self.fail_brokers {
            return Err(ExporterError::Metadata("broker list unavailable".into()));
        }
        Ok(self.brokers.clone())
    }

    async fn topics(&self) -> Result<Vec<String>> {
        self.topics_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.topics_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_topics {
            return Err(ExporterError::Metadata("topic list unavailable".into()));
        }
        let mut topics: Vec<String> = self.topics.keys().cloned().collect();
        topics.sort();
        Ok(topics)
    }

    async fn refresh_metadata(&self) -> Result<()> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        if self.fail_partitions.contains(topic) {
            return Err(ExporterError::Metadata(format!("partitions of {topic} unavailable")));
        }
        let parts = self
            .topics
            .get(topic)
            .ok_or_else(|| ExporterError::Metadata(format!("unknown topic {topic}")))?;
        Ok(parts.iter().map(|p| p.id).collect())
    }

    async fn leader(&self, topic: &str, partition: i32) -> Result<BrokerId> {
        if self.fail_leader.contains(&TopicPartition::new(topic, partition)) {
            return Err(ExporterError::Metadata("leader unavailable".into()));
        }
        Ok(self.partition(topic, partition)?.leader)
    }

    async fn replicas(&self, topic: &str, partition: i32) -> Result<Vec<BrokerId>> {
        if self.fail_replicas.contains(&TopicPartition::new(topic, partition)) {
            return Err(ExporterError::Metadata("replicas unavailable".into()));
        }
        Ok(self.partition(topic, partition)?.replicas.clone())
    }

    async fn in_sync_replicas(&self, topic: &str, partition: i32) -> Result<Vec<BrokerId>> {
        if self.fail_isr.contains(&TopicPartition::new(topic, partition)) {
            return Err(ExporterError::Metadata("in-sync replicas unavailable".into()));
        }
        Ok(self.partition(topic, partition)?.isr.clone())
    }

    async fn get_offset(&self, topic: &str, partition: i32, spec: OffsetSpec) -> Result<i64> {
        let tp = TopicPartition::new(topic, partition);
        let failed = match spec {
            OffsetSpec::Newest => self.fail_latest.contains(&tp),
            OffsetSpec::Oldest => self.fail_oldest.contains(&tp),
        };
        if failed {
            return Err(ExporterError::Metadata("offset unavailable".into()));
        }
        let part = self.partition(topic, partition)?;
        Ok(match spec {
            OffsetSpec::Newest => part.latest,
            OffsetSpec::Oldest => part.oldest,
        })
    }

    async fn list_groups(&self, broker: BrokerId) -> Result<Vec<String>> {
        Ok(self
            .groups
            .get(&broker)
            .map(|groups| groups.iter().map(|g| g.group_id.clone()).collect())
            .unwrap_or_default())
    }

    async fn describe_groups(
        &self,
        broker: BrokerId,
        group_ids: &[String],
    ) -> Result<Vec<GroupDescription>> {
        Ok(self
            .groups
            .get(&broker)
            .map(|groups| {
                groups
                    .iter()
                    .filter(|g| group_ids.contains(&g.group_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_committed_offsets(
        &self,
        _broker: BrokerId,
        group: &str,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, FetchedOffset>> {
        if self.fail_committed.contains(group) {
            return Err(ExporterError::Metadata(format!(
                "committed offsets of {group} unavailable"
            )));
        }
        Ok(partitions
            .iter()
            .map(|tp| {
                let fetched = self
                    .committed
                    .get(&(group.to_string(), tp.clone()))
                    .cloned()
                    .unwrap_or_else(FetchedOffset::uncommitted);
                (tp.clone(), fetched)
            })
            .collect())
    }
}
