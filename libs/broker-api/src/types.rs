use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::schema::SchemaInfo;

// ════════════════════════════════════════════════════════════════
//  Topic naming
// ════════════════════════════════════════════════════════════════

pub const DEFAULT_TENANT: &str = "public";
pub const DEFAULT_NAMESPACE: &str = "default";
/// Separator between a partitioned topic and the index of one of its partitions.
pub const PARTITION_SUFFIX: &str = "-partition-";
/// Partition index of a topic that is not a partition.
pub const NON_PARTITION_INDEX: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicDomain {
    Persistent,
    NonPersistent,
}

impl TopicDomain {
    fn scheme(&self) -> &'static str {
        match self {
            TopicDomain::Persistent => "persistent://",
            TopicDomain::NonPersistent => "non-persistent://",
        }
    }
}

/// Parsed topic name: `<domain>://<tenant>/<namespace>/<local>`.
///
/// A bare local name (`orders`) lives in `public/default`, a short name
/// (`acme/billing/orders`) is persistent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName {
    domain: TopicDomain,
    tenant: String,
    namespace: String,
    local: String,
}

impl TopicName {
    pub fn parse(name: &str) -> Result<Self, BrokerError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(BrokerError::invalid_argument("topic name is empty"));
        }

        let (domain, rest, qualified) = if let Some(rest) = trimmed.strip_prefix("persistent://") {
            (TopicDomain::Persistent, rest, true)
        } else if let Some(rest) = trimmed.strip_prefix("non-persistent://") {
            (TopicDomain::NonPersistent, rest, true)
        } else {
            (TopicDomain::Persistent, trimmed, false)
        };

        let parts: Vec<&str> = rest.split('/').collect();
        let (tenant, namespace, local) = match parts.as_slice() {
            [local] if !qualified => (DEFAULT_TENANT, DEFAULT_NAMESPACE, *local),
            [tenant, namespace, local] => (*tenant, *namespace, *local),
            _ => {
                return Err(BrokerError::invalid_argument(format!(
                    "invalid topic name '{name}': expected <tenant>/<namespace>/<topic>"
                )));
            }
        };

        if tenant.is_empty() || namespace.is_empty() || local.is_empty() {
            return Err(BrokerError::invalid_argument(format!(
                "invalid topic name '{name}': empty segment"
            )));
        }

        Ok(Self {
            domain,
            tenant: tenant.to_string(),
            namespace: namespace.to_string(),
            local: local.to_string(),
        })
    }

    pub fn domain(&self) -> TopicDomain {
        self.domain
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Namespace in `<tenant>/<namespace>` form.
    pub fn namespace(&self) -> String {
        format!("{}/{}", self.tenant, self.namespace)
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn full_name(&self) -> String {
        format!(
            "{}{}/{}/{}",
            self.domain.scheme(),
            self.tenant,
            self.namespace,
            self.local
        )
    }

    /// Index of this partition, or `NON_PARTITION_INDEX` when the name
    /// does not carry a `-partition-<n>` suffix.
    pub fn partition_index(&self) -> i32 {
        match self.local.rfind(PARTITION_SUFFIX) {
            Some(pos) => self.local[pos + PARTITION_SUFFIX.len()..]
                .parse::<i32>()
                .unwrap_or(NON_PARTITION_INDEX),
            None => NON_PARTITION_INDEX,
        }
    }

    pub fn is_partition(&self) -> bool {
        self.partition_index() != NON_PARTITION_INDEX
    }

    /// The logical topic this partition belongs to (itself if not a partition).
    pub fn partitioned_topic(&self) -> TopicName {
        if !self.is_partition() {
            return self.clone();
        }
        let pos = self.local.rfind(PARTITION_SUFFIX).unwrap_or(self.local.len());
        TopicName {
            local: self.local[..pos].to_string(),
            ..self.clone()
        }
    }

    pub fn partition(&self, index: u32) -> TopicName {
        let base = self.partitioned_topic();
        TopicName {
            local: format!("{}{PARTITION_SUFFIX}{index}", base.local),
            ..base
        }
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Fully qualified name of the logical topic, partition suffix removed.
pub fn topic_name(topic: &str) -> Result<String, BrokerError> {
    Ok(TopicName::parse(topic)?.partitioned_topic().full_name())
}

/// Fully qualified name of one partition of `topic`.
pub fn topic_name_with_partition(topic: &str, index: u32) -> Result<String, BrokerError> {
    Ok(TopicName::parse(topic)?.partition(index).full_name())
}

/// One partition of a logical topic. Non-partitioned topics use
/// `NON_PARTITION_INDEX`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self { topic: topic.into(), partition }
    }

    /// Physical topic name this partition is stored under.
    pub fn full_name(&self) -> Result<String, BrokerError> {
        if self.partition == NON_PARTITION_INDEX {
            topic_name(&self.topic)
        } else {
            topic_name_with_partition(&self.topic, self.partition as u32)
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Messages
// ════════════════════════════════════════════════════════════════

/// Broker-issued identifier of an acknowledged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    pub ledger_id: u64,
    pub entry_id: u64,
    pub partition: i32,
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.ledger_id, self.entry_id, self.partition)
    }
}

/// Message handed to a producer.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub key: Option<String>,
    pub payload: Vec<u8>,
    /// Transaction the message belongs to. Invisible to consumers until commit.
    pub txn: Option<TxnId>,
}

/// Message as delivered by a consumer, payload not yet decoded.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: MessageId,
    /// Physical topic (partition) the message was read from.
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub publish_time_ms: i64,
}

/// Decoded message.
#[derive(Debug, Clone)]
pub struct Message<T> {
    pub id: MessageId,
    pub topic: String,
    pub key: Option<String>,
    pub value: T,
    pub publish_time_ms: i64,
}

impl<T> Message<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

// ════════════════════════════════════════════════════════════════
//  Admin data
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantInfo {
    pub allowed_clusters: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionedTopicMetadata {
    pub partitions: u32,
}

impl PartitionedTopicMetadata {
    pub const NON_PARTITIONED: u32 = 0;

    pub fn is_partitioned(&self) -> bool {
        self.partitions != Self::NON_PARTITIONED
    }
}

/// Where a newly created subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialPosition {
    Earliest,
    #[default]
    Latest,
}

// ════════════════════════════════════════════════════════════════
//  Producer / consumer / client options
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerAccessMode {
    /// Any number of producers on the topic.
    #[default]
    Shared,
    /// Only one producer; a second one is rejected.
    Exclusive,
}

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    pub schema: SchemaInfo,
    pub batching_enabled: bool,
    /// Accept a schema that differs from the one registered on the topic.
    pub multi_schema: bool,
    pub access_mode: ProducerAccessMode,
    /// `None` = no send timeout.
    pub send_timeout: Option<Duration>,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            schema: SchemaInfo::bytes(),
            batching_enabled: true,
            multi_schema: true,
            access_mode: ProducerAccessMode::Shared,
            send_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionMode {
    #[default]
    Durable,
    NonDurable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionType {
    #[default]
    Exclusive,
    Shared,
}

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub subscription: String,
    pub mode: SubscriptionMode,
    pub kind: SubscriptionType,
    /// Used only when the subscription does not exist yet.
    pub initial_position: InitialPosition,
    pub schema: SchemaInfo,
}

impl ConsumerOptions {
    pub fn new(subscription: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
            mode: SubscriptionMode::default(),
            kind: SubscriptionType::default(),
            initial_position: InitialPosition::default(),
            schema: SchemaInfo::bytes(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Required for `BrokerClient::transaction_coordinator`.
    pub enable_transaction: bool,
}

/// Transaction identifier issued by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId {
    pub most_bits: u64,
    pub least_bits: u64,
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.most_bits, self.least_bits)
    }
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_lives_in_default_namespace() {
        let name = TopicName::parse("orders").unwrap();
        assert_eq!(name.full_name(), "persistent://public/default/orders");
        assert_eq!(name.namespace(), "public/default");
        assert_eq!(name.partition_index(), NON_PARTITION_INDEX);
    }

    #[test]
    fn partition_names_round_trip() {
        let p = topic_name_with_partition("acme/billing/orders", 3).unwrap();
        assert_eq!(p, "persistent://acme/billing/orders-partition-3");

        let parsed = TopicName::parse(&p).unwrap();
        assert_eq!(parsed.partition_index(), 3);
        assert_eq!(parsed.partitioned_topic().full_name(), "persistent://acme/billing/orders");
        assert_eq!(topic_name(&p).unwrap(), "persistent://acme/billing/orders");
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(TopicName::parse("").is_err());
        assert!(TopicName::parse("a/b").is_err());
        assert!(TopicName::parse("persistent://orders").is_err());
        assert!(TopicName::parse("persistent://a//orders").is_err());
    }

    #[test]
    fn topic_partition_resolves_physical_name() {
        let tp = TopicPartition::new("orders", 1);
        assert_eq!(tp.full_name().unwrap(), "persistent://public/default/orders-partition-1");
        let tp = TopicPartition::new("orders", NON_PARTITION_INDEX);
        assert_eq!(tp.full_name().unwrap(), "persistent://public/default/orders");
    }
}
