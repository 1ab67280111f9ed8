//! Capability interface of a publish/subscribe broker: connect, produce,
//! consume, admin-manage and transaction coordination.
//!
//! The crate defines traits and data types only. Implementations live
//! elsewhere (`broker-memory` ships an embedded one).

pub mod client;
pub mod error;
pub mod schema;
pub mod types;

pub use client::{
    BoxFuture, BrokerAdmin, BrokerClient, BrokerConnector, Consumer, Producer,
    TransactionCoordinator,
};
pub use error::{BrokerError, ErrorKind};
pub use schema::{BytesSchema, JsonSchema, Schema, SchemaInfo, SchemaType, StringSchema};
pub use types::{
    ClientOptions, ConsumerOptions, InitialPosition, Message, MessageId, NON_PARTITION_INDEX,
    OutgoingMessage, PartitionedTopicMetadata, ProducerAccessMode, ProducerOptions, RawMessage,
    SubscriptionMode, SubscriptionType, TenantInfo, TopicDomain, TopicName, TopicPartition, TxnId,
    now_ms, topic_name, topic_name_with_partition,
};
