//! Embedded in-process broker.
//!
//! Implements the `broker-api` traits on top of in-memory partition logs:
//! durable cursors with individual acknowledgement, exclusive and shared
//! subscriptions, read-committed transactions and schema checks. Used as
//! the broker behind tests and the `memory` mode of `guarantee-check`.

mod admin;
mod client;
mod state;

use std::sync::{Arc, Mutex, MutexGuard};

use broker_api::{BoxFuture, BrokerAdmin, BrokerClient, BrokerConnector, BrokerError, ClientOptions};
use serde::Deserialize;
use tokio::sync::Notify;

pub use admin::MemoryAdmin;
pub use client::{MemoryClient, MemoryConsumer, MemoryCoordinator, MemoryProducer};

use state::BrokerState;

const SERVICE_SCHEMES: [&str; 2] = ["pulsar://", "pulsar+ssl://"];
const ADMIN_SCHEMES: [&str; 2] = ["http://", "https://"];

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryBrokerConfig {
    /// Name of the single cluster the broker reports.
    #[serde(default = "default_cluster")]
    pub cluster: String,
    /// Create a non-partitioned topic on first produce or subscribe.
    #[serde(default = "default_auto_create")]
    pub auto_create_topics: bool,
}

fn default_cluster() -> String {
    "standalone".into()
}

fn default_auto_create() -> bool {
    true
}

impl Default for MemoryBrokerConfig {
    fn default() -> Self {
        Self {
            cluster: default_cluster(),
            auto_create_topics: default_auto_create(),
        }
    }
}

/// State shared by every handle of one broker.
pub(crate) struct Shared {
    state: Mutex<BrokerState>,
    /// Woken on every append, commit, abort and consumer release.
    pub(crate) notify: Notify,
}

impl Shared {
    pub(crate) fn state(&self) -> MutexGuard<'_, BrokerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("broker state lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// In-process broker. Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_config(MemoryBrokerConfig::default())
    }

    pub fn with_config(config: MemoryBrokerConfig) -> Self {
        tracing::debug!(cluster = %config.cluster, auto_create = config.auto_create_topics, "memory broker started");
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::new(&config.cluster, config.auto_create_topics)),
                notify: Notify::new(),
            }),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn check_scheme(url: &str, schemes: &[&str], what: &str) -> Result<(), BrokerError> {
    let rest = schemes.iter().find_map(|s| url.strip_prefix(s));
    match rest {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(BrokerError::invalid_argument(format!(
            "invalid {what} url '{url}': expected one of {}",
            schemes.join(", ")
        ))),
    }
}

impl BrokerConnector for MemoryBroker {
    fn connect(
        &self,
        service_url: &str,
        options: ClientOptions,
    ) -> BoxFuture<'_, Result<Arc<dyn BrokerClient>, BrokerError>> {
        let service_url = service_url.to_string();
        Box::pin(async move {
            check_scheme(&service_url, &SERVICE_SCHEMES, "service")?;
            tracing::debug!(url = %service_url, transactions = options.enable_transaction, "client connected");
            let client: Arc<dyn BrokerClient> = Arc::new(MemoryClient::new(self.shared.clone(), options));
            Ok(client)
        })
    }

    fn connect_admin(&self, admin_url: &str) -> BoxFuture<'_, Result<Arc<dyn BrokerAdmin>, BrokerError>> {
        let admin_url = admin_url.to_string();
        Box::pin(async move {
            check_scheme(&admin_url, &ADMIN_SCHEMES, "admin")?;
            tracing::debug!(url = %admin_url, "admin connected");
            let admin: Arc<dyn BrokerAdmin> = Arc::new(MemoryAdmin::new(self.shared.clone()));
            Ok(admin)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_url_needs_pulsar_scheme() {
        assert!(check_scheme("pulsar://localhost:6650", &SERVICE_SCHEMES, "service").is_ok());
        assert!(check_scheme("pulsar+ssl://broker:6651", &SERVICE_SCHEMES, "service").is_ok());
        assert!(check_scheme("http://localhost:8080", &SERVICE_SCHEMES, "service").is_err());
        assert!(check_scheme("pulsar://", &SERVICE_SCHEMES, "service").is_err());
    }
}
