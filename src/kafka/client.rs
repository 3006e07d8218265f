use crate::config::{GssapiAuth, KafkaConfig, SaslConfig};
use crate::error::{ExporterError, Result};
use crate::kafka::gateway::{
    BrokerId, ClusterGateway, FetchedOffset, GroupDescription, GroupMember, OffsetSpec,
    TopicPartition,
};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Cluster metadata parsed into an owned, shareable form. Rebuilt on every
/// `refresh_metadata`; reads in between see the cached copy.
#[derive(Debug, Default)]
struct ClusterMetadata {
    brokers: Vec<BrokerId>,
    topics: HashMap<String, Vec<PartitionMetadata>>,
}

#[derive(Debug, Clone)]
struct PartitionMetadata {
    id: i32,
    leader: BrokerId,
    replicas: Vec<BrokerId>,
    isr: Vec<BrokerId>,
}

impl ClusterMetadata {
    fn partition(&self, topic: &str, partition: i32) -> Result<&PartitionMetadata> {
        self.topics
            .get(topic)
            .and_then(|partitions| partitions.iter().find(|p| p.id == partition))
            .ok_or_else(|| {
                ExporterError::Metadata(format!("unknown topic/partition {topic}/{partition}"))
            })
    }
}

/// `ClusterGateway` backed by librdkafka. One long-lived consumer handles
/// metadata, watermark and group-directory requests; committed-offset fetches
/// go through short-lived consumers created with the target group id.
pub struct RdGateway {
    consumer: Arc<BaseConsumer>,
    group_config: ClientConfig,
    metadata: Mutex<Arc<ClusterMetadata>>,
    timeout: Duration,
}

impl RdGateway {
    /// Connect to the cluster and load an initial metadata snapshot. Blocks
    /// the caller; invoke during startup, before serving scrapes.
    pub fn connect(config: &KafkaConfig) -> Result<Self> {
        let client_config = build_client_config(config)?;
        let consumer: BaseConsumer = client_config.create()?;

        let gateway = Self {
            consumer: Arc::new(consumer),
            group_config: client_config,
            metadata: Mutex::new(Arc::new(ClusterMetadata::default())),
            timeout: config.timeout,
        };
        gateway.reload_metadata()?;
        Ok(gateway)
    }

    fn cached_metadata(&self) -> Arc<ClusterMetadata> {
        Arc::clone(&self.metadata.lock().expect("metadata lock poisoned"))
    }

    fn reload_metadata(&self) -> Result<()> {
        let raw = self.consumer.fetch_metadata(None, self.timeout)?;
        self.store_metadata(parse_metadata(&raw));
        Ok(())
    }

    fn store_metadata(&self, parsed: ClusterMetadata) {
        debug!(
            brokers = parsed.brokers.len(),
            topics = parsed.topics.len(),
            "Reloaded cluster metadata"
        );
        let mut cache = self.metadata.lock().expect("metadata lock poisoned");
        *cache = Arc::new(parsed);
    }

    /// Group listing in librdkafka is cluster-wide, with no coordinator
    /// attribution. The full directory is reported against the lowest broker
    /// id so each group is evaluated exactly once per cycle.
    fn control_broker(&self) -> Option<BrokerId> {
        self.cached_metadata().brokers.iter().min().copied()
    }
}

#[async_trait]
impl ClusterGateway for RdGateway {
    async fn brokers(&self) -> Result<Vec<BrokerId>> {
        Ok(self.cached_metadata().brokers.clone())
    }

    async fn topics(&self) -> Result<Vec<String>> {
        Ok(self.cached_metadata().topics.keys().cloned().collect())
    }

    #[instrument(skip(self))]
    async fn refresh_metadata(&self) -> Result<()> {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.timeout;
        let parsed = tokio::task::spawn_blocking(move || {
            let raw = consumer.fetch_metadata(None, timeout)?;
            Ok::<_, ExporterError>(parse_metadata(&raw))
        })
        .await
        .map_err(|e| ExporterError::Task(e.to_string()))??;

        self.store_metadata(parsed);
        Ok(())
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let metadata = self.cached_metadata();
        let partitions = metadata
            .topics
            .get(topic)
            .ok_or_else(|| ExporterError::Metadata(format!("unknown topic {topic}")))?;
        Ok(partitions.iter().map(|p| p.id).collect())
    }

    async fn leader(&self, topic: &str, partition: i32) -> Result<BrokerId> {
        let metadata = self.cached_metadata();
        let meta = metadata.partition(topic, partition)?;
        if meta.leader < 0 {
            return Err(ExporterError::Metadata(format!(
                "no leader for {topic}/{partition}"
            )));
        }
        Ok(meta.leader)
    }

    async fn replicas(&self, topic: &str, partition: i32) -> Result<Vec<BrokerId>> {
        let metadata = self.cached_metadata();
        Ok(metadata.partition(topic, partition)?.replicas.clone())
    }

    async fn in_sync_replicas(&self, topic: &str, partition: i32) -> Result<Vec<BrokerId>> {
        let metadata = self.cached_metadata();
        Ok(metadata.partition(topic, partition)?.isr.clone())
    }

    async fn get_offset(&self, topic: &str, partition: i32, spec: OffsetSpec) -> Result<i64> {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.timeout;
        let topic = topic.to_string();

        let (low, high) = tokio::task::spawn_blocking(move || {
            consumer.fetch_watermarks(&topic, partition, timeout)
        })
        .await
        .map_err(|e| ExporterError::Task(e.to_string()))??;

        Ok(match spec {
            OffsetSpec::Newest => high,
            OffsetSpec::Oldest => low,
        })
    }

    #[instrument(skip(self))]
    async fn list_groups(&self, broker: BrokerId) -> Result<Vec<String>> {
        if self.control_broker() != Some(broker) {
            return Ok(Vec::new());
        }

        let consumer = Arc::clone(&self.consumer);
        let timeout = self.timeout;
        let groups = tokio::task::spawn_blocking(move || {
            let group_list = consumer.fetch_group_list(None, timeout)?;
            Ok::<_, ExporterError>(
                group_list
                    .groups()
                    .iter()
                    .map(|g| g.name().to_string())
                    .collect::<Vec<_>>(),
            )
        })
        .await
        .map_err(|e| ExporterError::Task(e.to_string()))??;

        debug!(count = groups.len(), "Listed consumer groups");
        Ok(groups)
    }

    #[instrument(skip(self, group_ids), fields(count = group_ids.len()))]
    async fn describe_groups(
        &self,
        _broker: BrokerId,
        group_ids: &[String],
    ) -> Result<Vec<GroupDescription>> {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.timeout;
        let ids = group_ids.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut descriptions = Vec::with_capacity(ids.len());
            for group_id in &ids {
                let group_list = consumer.fetch_group_list(Some(group_id), timeout)?;
                for group in group_list.groups() {
                    let members = group
                        .members()
                        .iter()
                        .map(|m| GroupMember {
                            member_id: m.id().to_string(),
                            client_id: m.client_id().to_string(),
                            client_host: m.client_host().to_string(),
                            assignment: m
                                .assignment()
                                .and_then(decode_member_assignment)
                                .unwrap_or_default(),
                        })
                        .collect();
                    descriptions.push(GroupDescription {
                        group_id: group.name().to_string(),
                        members,
                    });
                }
            }
            Ok(descriptions)
        })
        .await
        .map_err(|e| ExporterError::Task(e.to_string()))?
    }

    #[instrument(skip(self, partitions), fields(group = %group, count = partitions.len()))]
    async fn fetch_committed_offsets(
        &self,
        _broker: BrokerId,
        group: &str,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, FetchedOffset>> {
        let mut config = self.group_config.clone();
        config.set("group.id", group);
        config.set("enable.auto.commit", "false");

        let timeout = self.timeout;
        let group = group.to_string();
        let requested = partitions.to_vec();

        tokio::task::spawn_blocking(move || {
            let consumer: BaseConsumer = config.create()?;

            let mut tpl = TopicPartitionList::with_capacity(requested.len());
            for tp in &requested {
                tpl.add_partition(&tp.topic, tp.partition);
            }

            let response = consumer.committed_offsets(tpl, timeout)?;

            let mut fetched = HashMap::with_capacity(requested.len());
            for elem in response.elements() {
                let tp = TopicPartition::new(elem.topic(), elem.partition());
                let entry = match elem.error() {
                    Err(e) => {
                        warn!(
                            group = %group,
                            topic = %tp.topic,
                            partition = tp.partition,
                            error = %e,
                            "Partition error in committed-offset response"
                        );
                        FetchedOffset::failed(e.to_string())
                    }
                    Ok(()) => match elem.offset() {
                        Offset::Offset(offset) => FetchedOffset::committed(offset),
                        _ => FetchedOffset::uncommitted(),
                    },
                };
                fetched.insert(tp, entry);
            }
            Ok(fetched)
        })
        .await
        .map_err(|e| ExporterError::Task(e.to_string()))?
    }
}

fn parse_metadata(raw: &rdkafka::metadata::Metadata) -> ClusterMetadata {
    let brokers: Vec<BrokerId> = raw.brokers().iter().map(|b| b.id()).collect();
    let mut topics = HashMap::with_capacity(raw.topics().len());
    for topic in raw.topics() {
        let partitions = topic
            .partitions()
            .iter()
            .map(|p| PartitionMetadata {
                id: p.id(),
                leader: p.leader(),
                replicas: p.replicas().to_vec(),
                isr: p.isr().to_vec(),
            })
            .collect();
        topics.insert(topic.name().to_string(), partitions);
    }
    ClusterMetadata { brokers, topics }
}

/// Resolve the configuration into librdkafka properties. SASL and TLS are
/// settled here, once; the collection engine never sees them.
fn build_client_config(config: &KafkaConfig) -> Result<ClientConfig> {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &config.bootstrap_servers);
    client_config.set("client.id", &config.client_id);

    let protocol = match (&config.tls, &config.sasl) {
        (Some(_), Some(_)) => "sasl_ssl",
        (Some(_), None) => "ssl",
        (None, Some(_)) => "sasl_plaintext",
        (None, None) => "plaintext",
    };
    client_config.set("security.protocol", protocol);

    if let Some(tls) = &config.tls {
        if let Some(ca) = &tls.ca_file {
            client_config.set("ssl.ca.location", ca);
        }
        if let Some(cert) = &tls.cert_file {
            client_config.set("ssl.certificate.location", cert);
        }
        if let Some(key) = &tls.key_file {
            client_config.set("ssl.key.location", key);
        }
        if tls.insecure_skip_verify {
            client_config.set("enable.ssl.certificate.verification", "false");
        }
    }

    if let Some(sasl) = &config.sasl {
        match sasl {
            SaslConfig::Plain { username, password } => {
                client_config.set("sasl.mechanism", "PLAIN");
                client_config.set("sasl.username", username);
                client_config.set("sasl.password", password);
            }
            SaslConfig::ScramSha256 { username, password } => {
                client_config.set("sasl.mechanism", "SCRAM-SHA-256");
                client_config.set("sasl.username", username);
                client_config.set("sasl.password", password);
            }
            SaslConfig::ScramSha512 { username, password } => {
                client_config.set("sasl.mechanism", "SCRAM-SHA-512");
                client_config.set("sasl.username", username);
                client_config.set("sasl.password", password);
            }
            SaslConfig::Gssapi {
                service_name,
                principal,
                kerberos_config_path,
                auth,
            } => {
                client_config.set("sasl.mechanism", "GSSAPI");
                client_config.set("sasl.kerberos.service.name", service_name);
                client_config.set("sasl.kerberos.principal", principal);
                if let Some(path) = kerberos_config_path {
                    client_config.set("sasl.kerberos.kinit.cmd", format!(
                        "kinit -R -t \"%{{sasl.kerberos.keytab}}\" -k %{{sasl.kerberos.principal}} -c {path}"
                    ));
                }
                match auth {
                    GssapiAuth::Keytab { keytab_path } => {
                        client_config.set("sasl.kerberos.keytab", keytab_path);
                    }
                    GssapiAuth::Password { password } => {
                        client_config.set("sasl.password", password);
                    }
                }
            }
        }
    }

    for (key, value) in &config.properties {
        client_config.set(key, value);
    }

    Ok(client_config)
}

/// Decode the ConsumerProtocol member assignment: version (i16), topic count
/// (i32), then per topic a string and an i32 partition array, followed by
/// opaque user data we ignore.
fn decode_member_assignment(data: &[u8]) -> Option<Vec<TopicPartition>> {
    let mut cursor = ByteCursor::new(data);
    let _version = cursor.read_i16()?;

    let topic_count = cursor.read_i32()?;
    let mut assignment = Vec::new();
    for _ in 0..topic_count {
        let topic = cursor.read_string()?;
        let partition_count = cursor.read_i32()?;
        for _ in 0..partition_count {
            let partition = cursor.read_i32()?;
            assignment.push(TopicPartition::new(topic.clone(), partition));
        }
    }

    Some(assignment)
}

struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn read_i16(&mut self) -> Option<i16> {
        let bytes = self.take(2)?;
        Some(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_i32(&mut self) -> Option<i32> {
        let bytes = self.take(4)?;
        Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_string(&mut self) -> Option<String> {
        let len = self.read_i16()?;
        if len < 0 {
            return None;
        }
        let bytes = self.take(len as usize)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }
}

impl std::fmt::Debug for RdGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdGateway")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
