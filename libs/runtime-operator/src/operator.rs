use std::sync::Arc;
use std::time::Duration;

use broker_api::{BrokerAdmin, BrokerClient, BrokerConnector, ClientOptions, TransactionCoordinator};
use serde::Deserialize;

use crate::config::{
    ADMIN_URL, Configuration, DELIVERY_GUARANTEE, DeliveryGuarantee, ENABLE_TRANSACTION, SEND_TIMEOUT_MS,
    SERVICE_URL, SINK_TRANSACTION_TIMEOUT, TRANSACTION_TIMEOUT_MILLIS,
};
use crate::error::{Context, OperatorError};

/// Partition count used by `setup_topic`.
pub const DEFAULT_PARTITIONS: u32 = 10;
/// Records written to every partition by `setup_topic`.
pub const NUM_RECORDS_PER_PARTITION: usize = 20;
/// Subscription every operator consumer binds to.
pub const SUBSCRIPTION_NAME: &str = "PulsarRuntimeOperator";
/// Bound on each receive while draining with a negative count.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Where the operator connects, and what it advertises to pipelines.
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorSettings {
    pub service_url: String,
    pub admin_url: String,
    /// Service URL handed to pipelines. Defaults to `service_url`.
    #[serde(default)]
    pub container_service_url: Option<String>,
    /// Admin URL handed to pipelines. Defaults to `admin_url`.
    #[serde(default)]
    pub container_admin_url: Option<String>,
}

impl OperatorSettings {
    pub fn new(service_url: impl Into<String>, admin_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
            admin_url: admin_url.into(),
            container_service_url: None,
            container_admin_url: None,
        }
    }
}

/// Test-side handle on a running broker: provisions topics, exchanges
/// messages and builds pipeline configuration.
///
/// Owns one client (transactions enabled) and one admin connection.
pub struct RuntimeOperator {
    pub(crate) client: Arc<dyn BrokerClient>,
    pub(crate) admin: Arc<dyn BrokerAdmin>,
    container_service_url: String,
    container_admin_url: String,
}

impl RuntimeOperator {
    pub async fn connect(connector: &dyn BrokerConnector, settings: OperatorSettings) -> Result<Self, OperatorError> {
        let client = connector
            .connect(&settings.service_url, ClientOptions { enable_transaction: true })
            .await
            .context(|| format!("connect client to '{}'", settings.service_url))?;
        let admin = match connector.connect_admin(&settings.admin_url).await {
            Ok(admin) => admin,
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    tracing::warn!(error = ?close_err, "failed to close client after admin connect error");
                }
                return Err(OperatorError::broker(format!("connect admin to '{}'", settings.admin_url), e));
            }
        };

        tracing::info!(service_url = %settings.service_url, admin_url = %settings.admin_url, "operator connected");
        Ok(Self {
            client,
            admin,
            container_service_url: settings.container_service_url.unwrap_or(settings.service_url),
            container_admin_url: settings.container_admin_url.unwrap_or(settings.admin_url),
        })
    }

    pub fn client(&self) -> &Arc<dyn BrokerClient> {
        &self.client
    }

    pub fn admin(&self) -> &Arc<dyn BrokerAdmin> {
        &self.admin
    }

    /// Service URL pipelines should use. Not necessarily the one this
    /// operator connected with.
    pub fn container_service_url(&self) -> &str {
        &self.container_service_url
    }

    pub fn container_admin_url(&self) -> &str {
        &self.container_admin_url
    }

    pub fn coordinator_client(&self) -> Result<Arc<dyn TransactionCoordinator>, OperatorError> {
        self.client
            .transaction_coordinator()
            .context(|| "transaction coordinator".into())
    }

    /// Connection settings only.
    pub fn config(&self) -> Configuration {
        let mut config = Configuration::new();
        config.set(SERVICE_URL, self.container_service_url.as_str());
        config.set(ADMIN_URL, self.container_admin_url.as_str());
        config
    }

    /// Sink settings for `guarantee`. Exactly-once additionally needs a
    /// transaction timeout, no send timeout and transactions enabled.
    pub fn sink_config(&self, guarantee: DeliveryGuarantee) -> Configuration {
        let mut config = self.config();
        config.set(DELIVERY_GUARANTEE, guarantee);
        if guarantee == DeliveryGuarantee::ExactlyOnce {
            config.set(TRANSACTION_TIMEOUT_MILLIS, SINK_TRANSACTION_TIMEOUT.as_millis() as i64);
            config.set(ENABLE_TRANSACTION, true);
            config.set(SEND_TIMEOUT_MS, 0i64);
        }
        config
    }

    /// Release the client, then the admin. The admin is released even if
    /// closing the client fails; the first error is returned.
    pub async fn close(&self) -> Result<(), OperatorError> {
        let client = self.client.close().await.context(|| "close client".into());
        let admin = self.admin.close().await.context(|| "close admin".into());
        tracing::info!("operator closed");
        client.and(admin)
    }
}
