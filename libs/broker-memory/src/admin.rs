use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use broker_api::{
    BoxFuture, BrokerAdmin, BrokerError, InitialPosition, PartitionedTopicMetadata, SchemaInfo, TenantInfo,
};

use crate::Shared;

/// Admin handle of a [`crate::MemoryBroker`].
pub struct MemoryAdmin {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MemoryAdmin {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared, closed: AtomicBool::new(false) }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BrokerError::unavailable("admin client is closed"))
        } else {
            Ok(())
        }
    }
}

impl BrokerAdmin for MemoryAdmin {
    fn clusters(&self) -> BoxFuture<'_, Result<Vec<String>, BrokerError>> {
        Box::pin(async move {
            self.ensure_open()?;
            Ok(self.shared.state().clusters())
        })
    }

    fn tenants(&self) -> BoxFuture<'_, Result<Vec<String>, BrokerError>> {
        Box::pin(async move {
            self.ensure_open()?;
            Ok(self.shared.state().tenants())
        })
    }

    fn create_tenant(&self, tenant: &str, info: TenantInfo) -> BoxFuture<'_, Result<(), BrokerError>> {
        let tenant = tenant.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.shared.state().create_tenant(&tenant, info)?;
            tracing::debug!(tenant = %tenant, "tenant created");
            Ok(())
        })
    }

    fn namespaces(&self, tenant: &str) -> BoxFuture<'_, Result<Vec<String>, BrokerError>> {
        let tenant = tenant.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.shared.state().namespaces(&tenant)
        })
    }

    fn create_namespace(&self, namespace: &str) -> BoxFuture<'_, Result<(), BrokerError>> {
        let namespace = namespace.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.shared.state().create_namespace(&namespace)?;
            tracing::debug!(namespace = %namespace, "namespace created");
            Ok(())
        })
    }

    fn create_non_partitioned_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.shared.state().create_non_partitioned_topic(&topic)?;
            tracing::debug!(topic = %topic, "topic created");
            Ok(())
        })
    }

    fn create_partitioned_topic(&self, topic: &str, partitions: u32) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.shared.state().create_partitioned_topic(&topic, partitions)?;
            tracing::debug!(topic = %topic, partitions, "partitioned topic created");
            Ok(())
        })
    }

    fn partitioned_topic_metadata(
        &self,
        topic: &str,
    ) -> BoxFuture<'_, Result<PartitionedTopicMetadata, BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.shared.state().partitioned_topic_metadata(&topic)
        })
    }

    fn update_partitioned_topic(&self, topic: &str, partitions: u32) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.shared.state().update_partitioned_topic(&topic, partitions)?;
            tracing::debug!(topic = %topic, partitions, "partitions increased");
            Ok(())
        })
    }

    fn delete_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.shared.state().delete_topic(&topic)?;
            self.shared.notify.notify_waiters();
            Ok(())
        })
    }

    fn delete_partitioned_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.shared.state().delete_partitioned_topic(&topic)?;
            self.shared.notify.notify_waiters();
            Ok(())
        })
    }

    fn subscriptions(&self, topic: &str) -> BoxFuture<'_, Result<Vec<String>, BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.shared.state().subscriptions(&topic)
        })
    }

    fn create_subscription(
        &self,
        topic: &str,
        subscription: &str,
        position: InitialPosition,
    ) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        let subscription = subscription.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.shared.state().create_subscription(&topic, &subscription, position)
        })
    }

    fn create_schema(&self, topic: &str, schema: SchemaInfo) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.shared.state().create_schema(&topic, schema)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            Ok(())
        })
    }
}
