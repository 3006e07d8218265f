use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

pub type BrokerId = i32;

/// Committed-offset value meaning "no offset associated with this
/// topic/partition for the group".
pub const UNCOMMITTED_OFFSET: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSpec {
    /// Next offset to be written (high watermark).
    Newest,
    /// Earliest retained offset (low watermark).
    Oldest,
}

#[derive(Debug, Clone)]
pub struct GroupDescription {
    pub group_id: String,
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone)]
pub struct GroupMember {
    pub member_id: String,
    pub client_id: String,
    pub client_host: String,
    /// Partitions this member reports in its assignment. Empty for consumers
    /// using an assignment encoding we cannot decode.
    pub assignment: Vec<TopicPartition>,
}

/// One partition's entry in a committed-offset fetch response.
#[derive(Debug, Clone)]
pub struct FetchedOffset {
    /// Committed offset, or `UNCOMMITTED_OFFSET` when the group never
    /// committed for this partition.
    pub offset: i64,
    /// Request-level error for this partition, if any. An errored partition
    /// carries no usable offset.
    pub error: Option<String>,
}

impl FetchedOffset {
    pub fn committed(offset: i64) -> Self {
        Self {
            offset,
            error: None,
        }
    }

    pub fn uncommitted() -> Self {
        Self {
            offset: UNCOMMITTED_OFFSET,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            offset: UNCOMMITTED_OFFSET,
            error: Some(error.into()),
        }
    }
}

/// Access to the message-broker cluster. Every call may fail independently;
/// the collection engine treats each failure as local to the fact being
/// fetched. Metadata-derived answers (brokers, topics, partitions, leadership,
/// replica sets) come from a cache that `refresh_metadata` updates.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn brokers(&self) -> Result<Vec<BrokerId>>;

    async fn topics(&self) -> Result<Vec<String>>;

    async fn refresh_metadata(&self) -> Result<()>;

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>>;

    async fn leader(&self, topic: &str, partition: i32) -> Result<BrokerId>;

    async fn replicas(&self, topic: &str, partition: i32) -> Result<Vec<BrokerId>>;

    async fn in_sync_replicas(&self, topic: &str, partition: i32) -> Result<Vec<BrokerId>>;

    async fn get_offset(&self, topic: &str, partition: i32, spec: OffsetSpec) -> Result<i64>;

    /// Consumer groups coordinated by the given broker.
    async fn list_groups(&self, broker: BrokerId) -> Result<Vec<String>>;

    async fn describe_groups(
        &self,
        broker: BrokerId,
        group_ids: &[String],
    ) -> Result<Vec<GroupDescription>>;

    /// Batched committed-offset fetch for one group. Partitions the broker
    /// answered with a request-level error are reported via
    /// `FetchedOffset::error`, not by failing the whole call.
    async fn fetch_committed_offsets(
        &self,
        broker: BrokerId,
        group: &str,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, FetchedOffset>>;
}
