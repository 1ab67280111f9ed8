use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BrokerError;
use crate::schema::SchemaInfo;
use crate::types::{
    ClientOptions, ConsumerOptions, InitialPosition, MessageId, OutgoingMessage,
    PartitionedTopicMetadata, ProducerOptions, RawMessage, TenantInfo, TxnId,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ════════════════════════════════════════════════════════════════
//  Connector
// ════════════════════════════════════════════════════════════════

/// Entry point into a broker: turns URLs into client and admin handles.
pub trait BrokerConnector: Send + Sync {
    /// Connect a client for producing and consuming.
    fn connect(
        &self,
        service_url: &str,
        options: ClientOptions,
    ) -> BoxFuture<'_, Result<Arc<dyn BrokerClient>, BrokerError>>;

    /// Connect an admin handle for managing tenants, namespaces and topics.
    fn connect_admin(&self, admin_url: &str) -> BoxFuture<'_, Result<Arc<dyn BrokerAdmin>, BrokerError>>;
}

// ════════════════════════════════════════════════════════════════
//  Client
// ════════════════════════════════════════════════════════════════

/// Data-plane handle. Safe to share between tasks.
pub trait BrokerClient: Send + Sync {
    fn create_producer(
        &self,
        topic: &str,
        options: ProducerOptions,
    ) -> BoxFuture<'_, Result<Box<dyn Producer>, BrokerError>>;

    /// Subscribe to a topic. For a partitioned topic the consumer reads
    /// from every partition.
    fn subscribe(
        &self,
        topic: &str,
        options: ConsumerOptions,
    ) -> BoxFuture<'_, Result<Box<dyn Consumer>, BrokerError>>;

    /// Physical topic names backing `topic`: its partitions, or the topic
    /// itself when it is not partitioned.
    fn partitions_for_topic(&self, topic: &str) -> BoxFuture<'_, Result<Vec<String>, BrokerError>>;

    /// Fails unless the client was connected with transactions enabled.
    fn transaction_coordinator(&self) -> Result<Arc<dyn TransactionCoordinator>, BrokerError>;

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// Producer bound to one topic. Dropping it releases it on the broker.
pub trait Producer: Send {
    fn topic(&self) -> &str;

    /// Send a message and wait for the broker acknowledgement.
    fn send(&mut self, message: OutgoingMessage) -> BoxFuture<'_, Result<MessageId, BrokerError>>;

    fn flush(&mut self) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn close(&mut self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// Consumer bound to one subscription. Dropping it releases it on the broker.
pub trait Consumer: Send {
    fn topic(&self) -> &str;

    fn subscription(&self) -> &str;

    /// Wait for the next message. Cancel-safe: dropping the future before it
    /// completes does not consume a message.
    fn receive(&mut self) -> BoxFuture<'_, Result<RawMessage, BrokerError>>;

    fn acknowledge(&mut self, id: MessageId) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn close(&mut self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// Transaction coordinator of a client.
pub trait TransactionCoordinator: Send + Sync {
    /// Open a transaction that is aborted if not committed within `timeout`.
    fn new_transaction(&self, timeout: Duration) -> BoxFuture<'_, Result<TxnId, BrokerError>>;

    fn commit(&self, txn: TxnId) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn abort(&self, txn: TxnId) -> BoxFuture<'_, Result<(), BrokerError>>;
}

// ════════════════════════════════════════════════════════════════
//  Admin
// ════════════════════════════════════════════════════════════════

/// Control-plane handle.
pub trait BrokerAdmin: Send + Sync {
    fn clusters(&self) -> BoxFuture<'_, Result<Vec<String>, BrokerError>>;

    fn tenants(&self) -> BoxFuture<'_, Result<Vec<String>, BrokerError>>;

    fn create_tenant(&self, tenant: &str, info: TenantInfo) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Namespaces of `tenant` in `<tenant>/<namespace>` form.
    fn namespaces(&self, tenant: &str) -> BoxFuture<'_, Result<Vec<String>, BrokerError>>;

    fn create_namespace(&self, namespace: &str) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn create_non_partitioned_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn create_partitioned_topic(&self, topic: &str, partitions: u32) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Partition count of `topic` (0 when non-partitioned). `NotFound` when
    /// the topic does not exist.
    fn partitioned_topic_metadata(
        &self,
        topic: &str,
    ) -> BoxFuture<'_, Result<PartitionedTopicMetadata, BrokerError>>;

    fn update_partitioned_topic(&self, topic: &str, partitions: u32) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn delete_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn delete_partitioned_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn subscriptions(&self, topic: &str) -> BoxFuture<'_, Result<Vec<String>, BrokerError>>;

    fn create_subscription(
        &self,
        topic: &str,
        subscription: &str,
        position: InitialPosition,
    ) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn create_schema(&self, topic: &str, schema: SchemaInfo) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}
