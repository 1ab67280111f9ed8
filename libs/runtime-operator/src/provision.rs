//! Idempotent tenant, namespace and topic management.

use broker_api::{
    ErrorKind, NON_PARTITION_INDEX, Schema, StringSchema, TenantInfo, TopicName, TopicPartition, topic_name,
    topic_name_with_partition,
};
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::error::{Context, OperatorError};
use crate::operator::{DEFAULT_PARTITIONS, NUM_RECORDS_PER_PARTITION, RuntimeOperator};

/// Random alphanumeric string of `len` characters.
pub fn random_alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

impl RuntimeOperator {
    /// Create `tenant` unless it exists, allowing every known cluster.
    pub async fn create_tenant(&self, tenant: &str) -> Result<(), OperatorError> {
        let tenants = self.admin.tenants().await.context(|| "list tenants".into())?;
        if tenants.iter().any(|t| t == tenant) {
            return Ok(());
        }

        let clusters = self.admin.clusters().await.context(|| "list clusters".into())?;
        let info = TenantInfo { allowed_clusters: clusters.into_iter().collect() };
        self.admin
            .create_tenant(tenant, info)
            .await
            .context(|| format!("create tenant '{tenant}'"))?;
        tracing::info!(tenant, "tenant created");
        Ok(())
    }

    /// Create `<tenant>/<namespace>` and its tenant unless they exist.
    pub async fn create_namespace(&self, namespace: &str) -> Result<(), OperatorError> {
        let tenant = match namespace.split_once('/') {
            Some((tenant, local)) if !tenant.is_empty() && !local.is_empty() && !local.contains('/') => tenant,
            _ => {
                return Err(OperatorError::InvalidArgument(format!(
                    "namespace '{namespace}' is not in <tenant>/<namespace> form"
                )));
            }
        };

        self.create_tenant(tenant).await?;
        let namespaces = self
            .admin
            .namespaces(tenant)
            .await
            .context(|| format!("list namespaces of '{tenant}'"))?;
        if namespaces.iter().any(|n| n == namespace) {
            return Ok(());
        }

        self.admin
            .create_namespace(namespace)
            .await
            .context(|| format!("create namespace '{namespace}'"))?;
        tracing::info!(namespace, "namespace created");
        Ok(())
    }

    /// Create a topic; `0` partitions means non-partitioned. An existing
    /// topic is left untouched, whatever its partition count.
    pub async fn create_topic(&self, topic: &str, partitions: i32) -> Result<(), OperatorError> {
        if partitions < 0 {
            return Err(OperatorError::InvalidArgument(format!(
                "partition count of '{topic}' must not be negative, got {partitions}"
            )));
        }

        let result = if partitions == 0 {
            self.admin.create_non_partitioned_topic(topic).await
        } else {
            self.admin.create_partitioned_topic(topic, partitions as u32).await
        };

        match result {
            Ok(()) => {
                tracing::info!(topic, partitions, "topic created");
                Ok(())
            }
            Err(e) if e.is(ErrorKind::AlreadyExists) => {
                tracing::debug!(topic, "topic already exists");
                Ok(())
            }
            Err(e) => Err(OperatorError::broker(format!("create topic '{topic}'"), e)),
        }
    }

    /// Grow a partitioned topic to `partitions`, which must exceed the
    /// current count.
    pub async fn increase_topic_partitions(&self, topic: &str, partitions: i32) -> Result<(), OperatorError> {
        let metadata = self
            .admin
            .partitioned_topic_metadata(topic)
            .await
            .context(|| format!("read metadata of '{topic}'"))?;
        if partitions <= 0 || metadata.partitions >= partitions as u32 {
            return Err(OperatorError::InvalidArgument(format!(
                "new partition count {partitions} of '{topic}' must be greater than {}",
                metadata.partitions
            )));
        }

        self.admin
            .update_partitioned_topic(topic, partitions as u32)
            .await
            .context(|| format!("update partitions of '{topic}'"))?;
        tracing::info!(topic, from = metadata.partitions, to = partitions, "topic partitions increased");
        Ok(())
    }

    /// Delete a topic. A missing topic is not an error.
    pub async fn delete_topic(&self, topic: &str) -> Result<(), OperatorError> {
        let name = topic_name(topic).context(|| format!("delete topic '{topic}'"))?;
        let metadata = match self.admin.partitioned_topic_metadata(&name).await {
            Ok(metadata) => metadata,
            Err(e) if e.is(ErrorKind::NotFound) => {
                tracing::debug!(topic = %name, "topic does not exist, nothing to delete");
                return Ok(());
            }
            Err(e) => return Err(OperatorError::broker(format!("read metadata of '{name}'"), e)),
        };

        let deleted = if metadata.is_partitioned() {
            self.admin.delete_partitioned_topic(&name).await
        } else {
            self.admin.delete_topic(&name).await
        };
        deleted.context(|| format!("delete topic '{name}'"))?;
        tracing::info!(topic = %name, "topic deleted");
        Ok(())
    }

    /// Partitions the broker currently assigns to `topic`, in partition order.
    pub async fn topic_partitions(&self, topic: &str) -> Result<Vec<TopicPartition>, OperatorError> {
        let physical = self
            .client
            .partitions_for_topic(topic)
            .await
            .context(|| format!("list partitions of '{topic}'"))?;

        let mut partitions = physical
            .iter()
            .map(|p| {
                let index = TopicName::parse(p).map_or(NON_PARTITION_INDEX, |n| n.partition_index());
                TopicPartition::new(topic, index)
            })
            .collect::<Vec<_>>();
        partitions.sort();
        Ok(partitions)
    }

    /// Register `schema` on `topic`.
    pub async fn create_schema<T>(&self, topic: &str, schema: &dyn Schema<T>) -> Result<(), OperatorError> {
        self.admin
            .create_schema(topic, schema.schema_info())
            .await
            .context(|| format!("create schema on '{topic}'"))?;
        tracing::debug!(topic, "schema registered");
        Ok(())
    }

    /// Create `topic` with `DEFAULT_PARTITIONS` partitions and write
    /// `NUM_RECORDS_PER_PARTITION` random strings to each of them.
    pub async fn setup_topic(&self, topic: &str) -> Result<(), OperatorError> {
        let mut supplier = || random_alphanumeric(10 + rand::rng().random_range(0..20));
        self.setup_topic_with(topic, &StringSchema, &mut supplier, NUM_RECORDS_PER_PARTITION)
            .await
    }

    /// Create `topic` with `DEFAULT_PARTITIONS` partitions and write
    /// `records_per_partition` records from `supplier` to each of them.
    ///
    /// `topic` must not carry a partition suffix.
    pub async fn setup_topic_with<T>(
        &self,
        topic: &str,
        schema: &dyn Schema<T>,
        supplier: &mut (dyn FnMut() -> T + Send),
        records_per_partition: usize,
    ) -> Result<(), OperatorError> {
        let name = topic_name(topic).context(|| format!("set up topic '{topic}'"))?;
        self.create_topic(&name, DEFAULT_PARTITIONS as i32).await?;

        for index in 0..DEFAULT_PARTITIONS {
            let partition = topic_name_with_partition(&name, index).context(|| format!("set up topic '{name}'"))?;
            let messages = std::iter::repeat_with(&mut *supplier)
                .take(records_per_partition)
                .collect::<Vec<_>>();
            self.send_messages(&partition, schema, None, &messages).await?;
        }
        tracing::info!(topic = %name, partitions = DEFAULT_PARTITIONS, records_per_partition, "topic set up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_strings_are_alphanumeric() {
        let s = random_alphanumeric(32);
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
