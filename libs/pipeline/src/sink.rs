use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use broker_api::{
    BoxFuture, BrokerAdmin, BrokerClient, BrokerConnector, ClientOptions, OutgoingMessage, Producer,
    ProducerAccessMode, ProducerOptions, Schema, TransactionCoordinator, TxnId,
};
use runtime_operator::config::{
    ADMIN_URL, DELIVERY_GUARANTEE, ENABLE_TRANSACTION, SEND_TIMEOUT_MS, SERVICE_URL, SINK_TRANSACTION_TIMEOUT,
    TRANSACTION_TIMEOUT_MILLIS,
};
use runtime_operator::{Configuration, DeliveryGuarantee};

use crate::PipelineError;

const DEFAULT_SEND_TIMEOUT_MS: i64 = 30_000;

/// Sink taking part in two-phase checkpoints.
///
/// The environment calls `open` once, `write` per record, then on every
/// checkpoint `prepare_commit` followed by `commit` with what it returned,
/// and finally `close`.
pub trait CommittingSink<T>: Send {
    type Committable: Send;

    fn open(&mut self) -> BoxFuture<'_, Result<(), PipelineError>>;

    fn write(&mut self, record: T) -> BoxFuture<'_, Result<(), PipelineError>>;

    /// Make everything written so far durable and hand over what must be
    /// committed once the checkpoint is complete.
    fn prepare_commit(&mut self) -> BoxFuture<'_, Result<Vec<Self::Committable>, PipelineError>>;

    fn commit(&mut self, committables: Vec<Self::Committable>) -> BoxFuture<'_, Result<(), PipelineError>>;

    /// Release resources. Uncommitted transactional writes are aborted.
    fn close(&mut self) -> BoxFuture<'_, Result<(), PipelineError>>;
}

/// Transaction handed from `prepare_commit` to `commit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkCommittable {
    pub txn: TxnId,
}

// ═══════════════════════════════════════════════════════════════
//  Builder
// ═══════════════════════════════════════════════════════════════

/// Builds a [`BrokerSink`]. Settings come from explicit setters or from a
/// ready [`Configuration`], later calls winning.
pub struct BrokerSinkBuilder<T> {
    connector: Arc<dyn BrokerConnector>,
    config: Configuration,
    topics: Vec<String>,
    schema: Option<Arc<dyn Schema<T>>>,
}

impl<T: Send + 'static> BrokerSinkBuilder<T> {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            config: Configuration::new(),
            topics: Vec::new(),
            schema: None,
        }
    }

    pub fn service_url(mut self, url: impl Into<String>) -> Self {
        self.config.set(SERVICE_URL, url.into());
        self
    }

    pub fn admin_url(mut self, url: impl Into<String>) -> Self {
        self.config.set(ADMIN_URL, url.into());
        self
    }

    pub fn delivery_guarantee(mut self, guarantee: DeliveryGuarantee) -> Self {
        self.config.set(DELIVERY_GUARANTEE, guarantee);
        self
    }

    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn serialization_schema(mut self, schema: impl Schema<T> + 'static) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Merge every entry of `config` into the builder.
    pub fn config(mut self, config: &Configuration) -> Self {
        for (key, value) in config.iter() {
            self.config.set(key, value.clone());
        }
        self
    }

    pub fn build(self) -> Result<BrokerSink<T>, PipelineError> {
        let service_url = self
            .config
            .get_str(SERVICE_URL)
            .ok_or_else(|| PipelineError::Config(format!("'{SERVICE_URL}' is required")))?
            .to_string();
        let admin_url = self
            .config
            .get_str(ADMIN_URL)
            .ok_or_else(|| PipelineError::Config(format!("'{ADMIN_URL}' is required")))?
            .to_string();
        if self.topics.is_empty() {
            return Err(PipelineError::Config("at least one topic is required".into()));
        }
        let schema = self
            .schema
            .ok_or_else(|| PipelineError::Config("serialization schema is required".into()))?;

        let guarantee = if self.config.contains(DELIVERY_GUARANTEE) {
            self.config
                .get_guarantee(DELIVERY_GUARANTEE)
                .ok_or_else(|| PipelineError::Config(format!("'{DELIVERY_GUARANTEE}' has an invalid value")))?
        } else {
            DeliveryGuarantee::default()
        };

        let mut enable_transaction = self.config.get_bool(ENABLE_TRANSACTION).unwrap_or(false);
        if guarantee == DeliveryGuarantee::ExactlyOnce && !enable_transaction {
            if self.config.contains(ENABLE_TRANSACTION) {
                tracing::warn!("exactly-once delivery needs transactions, enabling them");
            }
            enable_transaction = true;
        }

        let transaction_timeout = match self.config.get_i64(TRANSACTION_TIMEOUT_MILLIS) {
            Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
            Some(ms) => {
                return Err(PipelineError::Config(format!(
                    "'{TRANSACTION_TIMEOUT_MILLIS}' must be positive, got {ms}"
                )));
            }
            None => SINK_TRANSACTION_TIMEOUT,
        };

        // 0 disables the send timeout.
        let send_timeout = match self.config.get_i64(SEND_TIMEOUT_MS).unwrap_or(DEFAULT_SEND_TIMEOUT_MS) {
            ms if ms > 0 => Some(Duration::from_millis(ms as u64)),
            _ => None,
        };

        Ok(BrokerSink {
            connector: self.connector,
            service_url,
            admin_url,
            guarantee,
            enable_transaction,
            transaction_timeout,
            send_timeout,
            topics: self.topics,
            schema,
            conn: None,
            producers: HashMap::new(),
            next_topic: 0,
            current_txn: None,
            written: 0,
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Sink
// ═══════════════════════════════════════════════════════════════

struct Connection {
    client: Arc<dyn BrokerClient>,
    admin: Arc<dyn BrokerAdmin>,
    coordinator: Option<Arc<dyn TransactionCoordinator>>,
}

/// Writes records to broker topics under a delivery guarantee.
///
/// - `None`: send and move on.
/// - `AtLeastOnce`: send, flush every producer at checkpoint.
/// - `ExactlyOnce`: send inside a transaction; the transaction is handed
///   over at checkpoint, committed on `commit` and aborted on `close`.
///
/// Records go to the configured topics round robin.
pub struct BrokerSink<T> {
    connector: Arc<dyn BrokerConnector>,
    service_url: String,
    admin_url: String,
    guarantee: DeliveryGuarantee,
    enable_transaction: bool,
    transaction_timeout: Duration,
    send_timeout: Option<Duration>,
    topics: Vec<String>,
    schema: Arc<dyn Schema<T>>,
    conn: Option<Connection>,
    producers: HashMap<String, Box<dyn Producer>>,
    next_topic: usize,
    current_txn: Option<TxnId>,
    written: u64,
}

impl<T: Send + 'static> BrokerSink<T> {
    pub fn builder(connector: Arc<dyn BrokerConnector>) -> BrokerSinkBuilder<T> {
        BrokerSinkBuilder::new(connector)
    }

    pub fn guarantee(&self) -> DeliveryGuarantee {
        self.guarantee
    }

    pub fn transactions_enabled(&self) -> bool {
        self.enable_transaction
    }

    pub fn transaction_timeout(&self) -> Duration {
        self.transaction_timeout
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout
    }

    /// Records written since `open`.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn connection(&self) -> Result<&Connection, PipelineError> {
        self.conn
            .as_ref()
            .ok_or_else(|| PipelineError::Config("sink used before open".into()))
    }

    async fn producer(&mut self, topic: &str) -> Result<&mut Box<dyn Producer>, PipelineError> {
        if !self.producers.contains_key(topic) {
            let options = ProducerOptions {
                schema: self.schema.schema_info(),
                batching_enabled: self.guarantee != DeliveryGuarantee::ExactlyOnce,
                multi_schema: true,
                access_mode: ProducerAccessMode::Shared,
                send_timeout: self.send_timeout,
            };
            let client = self.connection()?.client.clone();
            let producer = client
                .create_producer(topic, options)
                .await
                .map_err(|e| PipelineError::broker(format!("create producer on '{topic}'"), e))?;
            tracing::debug!(topic, "sink producer created");
            self.producers.insert(topic.to_string(), producer);
        }
        self.producers
            .get_mut(topic)
            .ok_or_else(|| PipelineError::Config(format!("no producer for '{topic}'")))
    }

    async fn transaction(&mut self) -> Result<TxnId, PipelineError> {
        if let Some(txn) = self.current_txn {
            return Ok(txn);
        }
        let coordinator = self
            .connection()?
            .coordinator
            .clone()
            .ok_or_else(|| PipelineError::Config("transactions are not enabled".into()))?;
        let txn = coordinator
            .new_transaction(self.transaction_timeout)
            .await
            .map_err(|e| PipelineError::broker("open transaction", e))?;
        tracing::debug!(txn = %txn, "sink transaction opened");
        self.current_txn = Some(txn);
        Ok(txn)
    }

    async fn flush_all(&mut self) -> Result<(), PipelineError> {
        for (topic, producer) in self.producers.iter_mut() {
            producer
                .flush()
                .await
                .map_err(|e| PipelineError::broker(format!("flush '{topic}'"), e))?;
        }
        Ok(())
    }
}

impl<T: Send + 'static> CommittingSink<T> for BrokerSink<T> {
    type Committable = SinkCommittable;

    fn open(&mut self) -> BoxFuture<'_, Result<(), PipelineError>> {
        Box::pin(async move {
            let options = ClientOptions { enable_transaction: self.enable_transaction };
            let client = self
                .connector
                .connect(&self.service_url, options)
                .await
                .map_err(|e| PipelineError::broker(format!("connect to '{}'", self.service_url), e))?;
            let admin = match self.connector.connect_admin(&self.admin_url).await {
                Ok(admin) => admin,
                Err(e) => {
                    if let Err(close_err) = client.close().await {
                        tracing::warn!(error = ?close_err, "failed to close client after admin connect error");
                    }
                    return Err(PipelineError::broker(format!("connect admin to '{}'", self.admin_url), e));
                }
            };

            let checked = async {
                for topic in &self.topics {
                    admin
                        .partitioned_topic_metadata(topic)
                        .await
                        .map_err(|e| PipelineError::broker(format!("look up sink topic '{topic}'"), e))?;
                }
                if self.enable_transaction {
                    let coordinator = client
                        .transaction_coordinator()
                        .map_err(|e| PipelineError::broker("transaction coordinator", e))?;
                    Ok(Some(coordinator))
                } else {
                    Ok(None)
                }
            }
            .await;
            let coordinator = match checked {
                Ok(coordinator) => coordinator,
                Err(e) => {
                    if let Err(close_err) = client.close().await {
                        tracing::warn!(error = ?close_err, "failed to close client after sink open error");
                    }
                    if let Err(close_err) = admin.close().await {
                        tracing::warn!(error = ?close_err, "failed to close admin after sink open error");
                    }
                    return Err(e);
                }
            };

            self.conn = Some(Connection { client, admin, coordinator });
            tracing::info!(guarantee = %self.guarantee, topics = ?self.topics, "sink opened");
            Ok(())
        })
    }

    fn write(&mut self, record: T) -> BoxFuture<'_, Result<(), PipelineError>> {
        Box::pin(async move {
            let topic = self.topics[self.next_topic % self.topics.len()].clone();
            self.next_topic = self.next_topic.wrapping_add(1);

            let payload = self
                .schema
                .encode(&record)
                .map_err(|e| PipelineError::broker(format!("encode record for '{topic}'"), e))?;
            let txn = if self.guarantee == DeliveryGuarantee::ExactlyOnce {
                Some(self.transaction().await?)
            } else {
                None
            };

            let producer = self.producer(&topic).await?;
            producer
                .send(OutgoingMessage { key: None, payload, txn })
                .await
                .map_err(|e| PipelineError::broker(format!("send to '{topic}'"), e))?;
            self.written += 1;
            Ok(())
        })
    }

    fn prepare_commit(&mut self) -> BoxFuture<'_, Result<Vec<SinkCommittable>, PipelineError>> {
        Box::pin(async move {
            match self.guarantee {
                DeliveryGuarantee::None => Ok(Vec::new()),
                DeliveryGuarantee::AtLeastOnce => {
                    self.flush_all().await?;
                    Ok(Vec::new())
                }
                DeliveryGuarantee::ExactlyOnce => {
                    self.flush_all().await?;
                    // The next write opens a fresh transaction.
                    Ok(self.current_txn.take().map(|txn| SinkCommittable { txn }).into_iter().collect())
                }
            }
        })
    }

    fn commit(&mut self, committables: Vec<SinkCommittable>) -> BoxFuture<'_, Result<(), PipelineError>> {
        Box::pin(async move {
            if committables.is_empty() {
                return Ok(());
            }
            let coordinator = self
                .connection()?
                .coordinator
                .clone()
                .ok_or_else(|| PipelineError::Config("transactions are not enabled".into()))?;
            for committable in committables {
                coordinator
                    .commit(committable.txn)
                    .await
                    .map_err(|e| PipelineError::broker(format!("commit transaction {}", committable.txn), e))?;
                tracing::debug!(txn = %committable.txn, "sink transaction committed");
            }
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), PipelineError>> {
        Box::pin(async move {
            let Some(conn) = self.conn.take() else {
                return Ok(());
            };
            let mut first_error = None;

            if let Some(txn) = self.current_txn.take() {
                if let Some(coordinator) = &conn.coordinator {
                    match coordinator.abort(txn).await {
                        Ok(()) => tracing::info!(txn = %txn, "uncommitted sink transaction aborted"),
                        Err(e) => {
                            first_error.get_or_insert(PipelineError::broker(format!("abort transaction {txn}"), e));
                        }
                    }
                }
            }

            for (topic, mut producer) in self.producers.drain() {
                if let Err(e) = producer.close().await {
                    tracing::warn!(topic = %topic, error = %e, "failed to close sink producer");
                    first_error.get_or_insert(PipelineError::broker(format!("close producer on '{topic}'"), e));
                }
            }
            if let Err(e) = conn.client.close().await {
                first_error.get_or_insert(PipelineError::broker("close client", e));
            }
            if let Err(e) = conn.admin.close().await {
                first_error.get_or_insert(PipelineError::broker("close admin", e));
            }

            tracing::info!(written = self.written, "sink closed");
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_api::{BrokerError, ErrorKind, StringSchema};

    struct NoBroker;

    impl BrokerConnector for NoBroker {
        fn connect(&self, _: &str, _: ClientOptions) -> BoxFuture<'_, Result<Arc<dyn BrokerClient>, BrokerError>> {
            Box::pin(async { Err(BrokerError::unavailable("no broker")) })
        }

        fn connect_admin(&self, _: &str) -> BoxFuture<'_, Result<Arc<dyn BrokerAdmin>, BrokerError>> {
            Box::pin(async { Err(BrokerError::unavailable("no broker")) })
        }
    }

    /// Hands out real embedded-broker handles and keeps a copy of each so a
    /// test can check they were released. The admin side can be made to fail.
    struct Tracked {
        broker: broker_memory::MemoryBroker,
        admin_fails: bool,
        client: std::sync::Mutex<Option<Arc<dyn BrokerClient>>>,
        admin: std::sync::Mutex<Option<Arc<dyn BrokerAdmin>>>,
    }

    impl Tracked {
        fn new(admin_fails: bool) -> Arc<Self> {
            Arc::new(Self {
                broker: broker_memory::MemoryBroker::new(),
                admin_fails,
                client: std::sync::Mutex::new(None),
                admin: std::sync::Mutex::new(None),
            })
        }

        fn client(&self) -> Arc<dyn BrokerClient> {
            self.client.lock().unwrap().clone().unwrap()
        }

        fn admin(&self) -> Arc<dyn BrokerAdmin> {
            self.admin.lock().unwrap().clone().unwrap()
        }
    }

    impl BrokerConnector for Tracked {
        fn connect(&self, url: &str, options: ClientOptions) -> BoxFuture<'_, Result<Arc<dyn BrokerClient>, BrokerError>> {
            let url = url.to_string();
            Box::pin(async move {
                let client = self.broker.connect(&url, options).await?;
                *self.client.lock().unwrap() = Some(client.clone());
                Ok(client)
            })
        }

        fn connect_admin(&self, url: &str) -> BoxFuture<'_, Result<Arc<dyn BrokerAdmin>, BrokerError>> {
            let url = url.to_string();
            Box::pin(async move {
                if self.admin_fails {
                    return Err(BrokerError::unavailable("admin endpoint down"));
                }
                let admin = self.broker.connect_admin(&url).await?;
                *self.admin.lock().unwrap() = Some(admin.clone());
                Ok(admin)
            })
        }
    }

    fn builder() -> BrokerSinkBuilder<String> {
        BrokerSink::builder(Arc::new(NoBroker))
            .service_url("pulsar://localhost:6650")
            .admin_url("http://localhost:8080")
            .topics(["orders"])
            .serialization_schema(StringSchema)
    }

    #[test]
    fn exactly_once_forces_transactions() {
        let sink = builder().delivery_guarantee(DeliveryGuarantee::ExactlyOnce).build().unwrap();
        assert!(sink.transactions_enabled());
        assert_eq!(sink.transaction_timeout(), SINK_TRANSACTION_TIMEOUT);

        let sink = builder().delivery_guarantee(DeliveryGuarantee::AtLeastOnce).build().unwrap();
        assert!(!sink.transactions_enabled());
        assert_eq!(sink.send_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_send_timeout_disables_it() {
        let mut config = Configuration::new();
        config.set(SEND_TIMEOUT_MS, 0i64);
        config.set(DELIVERY_GUARANTEE, "exactly-once");
        let sink = builder().config(&config).build().unwrap();
        assert_eq!(sink.guarantee(), DeliveryGuarantee::ExactlyOnce);
        assert_eq!(sink.send_timeout(), None);
    }

    #[test]
    fn missing_settings_are_config_errors() {
        let err = BrokerSink::<String>::builder(Arc::new(NoBroker))
            .topics(["orders"])
            .serialization_schema(StringSchema)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Config(_)));

        let err = builder().topics(Vec::<String>::new()).build().err().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));

        let mut config = Configuration::new();
        config.set(DELIVERY_GUARANTEE, "twice");
        let err = builder().config(&config).build().err().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn open_surfaces_connection_errors() {
        let mut sink = builder().build().unwrap();
        let err = sink.open().await.unwrap_err();
        assert!(matches!(err, PipelineError::Broker { .. }));
    }

    #[tokio::test]
    async fn failed_admin_connect_releases_the_client() {
        let connector = Tracked::new(true);
        let mut sink = BrokerSink::<String>::builder(connector.clone())
            .service_url("pulsar://localhost:6650")
            .admin_url("http://localhost:8080")
            .topics(["orders"])
            .serialization_schema(StringSchema)
            .build()
            .unwrap();

        assert!(sink.open().await.is_err());
        let err = connector
            .client()
            .create_producer("orders", ProducerOptions::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn failed_topic_lookup_releases_both_connections() {
        let connector = Tracked::new(false);
        let mut sink = BrokerSink::<String>::builder(connector.clone())
            .service_url("pulsar://localhost:6650")
            .admin_url("http://localhost:8080")
            .topics(["missing"])
            .serialization_schema(StringSchema)
            .build()
            .unwrap();

        let err = sink.open().await.unwrap_err();
        assert!(matches!(err, PipelineError::Broker { .. }));
        let err = connector
            .client()
            .create_producer("missing", ProducerOptions::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        let err = connector.admin().clusters().await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
