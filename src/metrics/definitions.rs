use crate::metrics::types::Descriptor;

pub const LABEL_TOPIC: &str = "topic";
pub const LABEL_PARTITION: &str = "partition";
pub const LABEL_GROUP: &str = "consumergroup";
pub const LABEL_RATE: &str = "rate";
pub const LABEL_ETA: &str = "eta";
pub const LABEL_ELAPSED: &str = "elapsed";

pub static BROKERS: Descriptor = Descriptor {
    name: "kafka_brokers",
    help: "Number of brokers in the Kafka cluster",
    variable_labels: &[],
};

pub static TOPIC_PARTITIONS: Descriptor = Descriptor {
    name: "kafka_topic_partitions",
    help: "Number of partitions for this topic",
    variable_labels: &[LABEL_TOPIC],
};

pub static TOPIC_CURRENT_OFFSET: Descriptor = Descriptor {
    name: "kafka_topic_partition_current_offset",
    help: "Current (latest) offset of a broker at topic/partition",
    variable_labels: &[LABEL_TOPIC, LABEL_PARTITION],
};

pub static TOPIC_OLDEST_OFFSET: Descriptor = Descriptor {
    name: "kafka_topic_partition_oldest_offset",
    help: "Oldest retained offset of a broker at topic/partition",
    variable_labels: &[LABEL_TOPIC, LABEL_PARTITION],
};

pub static TOPIC_PARTITION_LEADER: Descriptor = Descriptor {
    name: "kafka_topic_partition_leader",
    help: "Leader broker id of this topic/partition",
    variable_labels: &[LABEL_TOPIC, LABEL_PARTITION],
};

pub static TOPIC_PARTITION_REPLICAS: Descriptor = Descriptor {
    name: "kafka_topic_partition_replicas",
    help: "Number of replicas for this topic/partition",
    variable_labels: &[LABEL_TOPIC, LABEL_PARTITION],
};

pub static TOPIC_PARTITION_IN_SYNC_REPLICAS: Descriptor = Descriptor {
    name: "kafka_topic_partition_in_sync_replica",
    help: "Number of in-sync replicas for this topic/partition",
    variable_labels: &[LABEL_TOPIC, LABEL_PARTITION],
};

pub static TOPIC_PARTITION_USES_PREFERRED_REPLICA: Descriptor = Descriptor {
    name: "kafka_topic_partition_leader_is_preferred",
    help: "1 if the topic/partition is using the preferred broker as leader",
    variable_labels: &[LABEL_TOPIC, LABEL_PARTITION],
};

pub static TOPIC_UNDER_REPLICATED_PARTITION: Descriptor = Descriptor {
    name: "kafka_topic_partition_under_replicated_partition",
    help: "1 if the topic/partition is under-replicated",
    variable_labels: &[LABEL_TOPIC, LABEL_PARTITION],
};

pub static CONSUMERGROUP_CURRENT_OFFSET: Descriptor = Descriptor {
    name: "kafka_consumergroup_current_offset",
    help: "Current committed offset of a consumer group at topic/partition",
    variable_labels: &[LABEL_GROUP, LABEL_TOPIC, LABEL_PARTITION],
};

pub static CONSUMERGROUP_CURRENT_OFFSET_SUM: Descriptor = Descriptor {
    name: "kafka_consumergroup_current_offset_sum",
    help: "Committed offset of a consumer group at a topic, summed over all partitions",
    variable_labels: &[LABEL_GROUP, LABEL_TOPIC],
};

pub static CONSUMERGROUP_LAG: Descriptor = Descriptor {
    name: "kafka_consumergroup_lag",
    help: "Current approximate lag of a consumer group at topic/partition (-1 if uncommitted)",
    variable_labels: &[LABEL_GROUP, LABEL_TOPIC, LABEL_PARTITION],
};

pub static CONSUMERGROUP_LAG_SUM_RATE: Descriptor = Descriptor {
    name: "kafka_consumergroup_lag_sum_rate",
    help: "Per-topic lag sum of a consumer group, annotated with the observed \
           consumption rate (offsets/s), estimated drain time (s) and elapsed \
           time since the previous scrape (s)",
    variable_labels: &[LABEL_GROUP, LABEL_TOPIC, LABEL_RATE, LABEL_ETA, LABEL_ELAPSED],
};

pub static CONSUMERGROUP_MEMBERS: Descriptor = Descriptor {
    name: "kafka_consumergroup_members",
    help: "Amount of members in a consumer group",
    variable_labels: &[LABEL_GROUP],
};
