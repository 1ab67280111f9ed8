use std::time::Duration;

use broker_api::{
    BrokerConnector, ClientOptions, ConsumerOptions, ErrorKind, InitialPosition, OutgoingMessage,
    ProducerAccessMode, ProducerOptions, SchemaInfo, TenantInfo,
};
use broker_memory::{MemoryBroker, MemoryBrokerConfig};

const SERVICE: &str = "pulsar://localhost:6650";
const ADMIN: &str = "http://localhost:8080";

fn text(payload: &str) -> OutgoingMessage {
    OutgoingMessage { payload: payload.as_bytes().to_vec(), ..Default::default() }
}

fn earliest(subscription: &str) -> ConsumerOptions {
    let mut options = ConsumerOptions::new(subscription);
    options.initial_position = InitialPosition::Earliest;
    options
}

#[tokio::test]
async fn default_tenant_and_namespace_exist() {
    let broker = MemoryBroker::new();
    let admin = broker.connect_admin(ADMIN).await.unwrap();

    assert_eq!(admin.clusters().await.unwrap(), vec!["standalone".to_string()]);
    assert!(admin.tenants().await.unwrap().contains(&"public".to_string()));
    assert_eq!(admin.namespaces("public").await.unwrap(), vec!["public/default".to_string()]);

    let err = admin.create_namespace("public/default").await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    let err = admin.namespaces("nobody").await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn tenant_must_reference_known_clusters() {
    let broker = MemoryBroker::new();
    let admin = broker.connect_admin(ADMIN).await.unwrap();

    let info = TenantInfo { allowed_clusters: ["elsewhere".to_string()].into() };
    let err = admin.create_tenant("acme", info).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let info = TenantInfo { allowed_clusters: ["standalone".to_string()].into() };
    admin.create_tenant("acme", info).await.unwrap();
    admin.create_namespace("acme/billing").await.unwrap();
    admin.create_partitioned_topic("acme/billing/invoices", 2).await.unwrap();
}

#[tokio::test]
async fn duplicate_topic_reports_already_exists() {
    let broker = MemoryBroker::new();
    let admin = broker.connect_admin(ADMIN).await.unwrap();

    admin.create_partitioned_topic("orders", 3).await.unwrap();
    let err = admin.create_partitioned_topic("orders", 3).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(err.message(), "This topic already exists");

    let meta = admin.partitioned_topic_metadata("orders").await.unwrap();
    assert_eq!(meta.partitions, 3);
    let err = admin.partitioned_topic_metadata("missing").await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn receive_waits_for_publish() {
    let broker = MemoryBroker::new();
    let client = broker.connect(SERVICE, ClientOptions::default()).await.unwrap();

    let mut consumer = client.subscribe("events", earliest("sub")).await.unwrap();
    let mut producer = client.create_producer("events", ProducerOptions::default()).await.unwrap();

    let pending = tokio::time::timeout(Duration::from_millis(50), consumer.receive()).await;
    assert!(pending.is_err(), "nothing published yet");

    let publisher = tokio::spawn(async move {
        producer.send(text("hello")).await.unwrap();
        producer.close().await.unwrap();
    });

    let message = tokio::time::timeout(Duration::from_secs(2), consumer.receive())
        .await
        .expect("message arrives")
        .unwrap();
    assert_eq!(message.payload, b"hello");
    consumer.acknowledge(message.id).await.unwrap();
    publisher.await.unwrap();
}

#[tokio::test]
async fn dropped_consumer_frees_exclusive_subscription() {
    let broker = MemoryBroker::new();
    let client = broker.connect(SERVICE, ClientOptions::default()).await.unwrap();

    let first = client.subscribe("events", earliest("sub")).await.unwrap();
    let err = client.subscribe("events", earliest("sub")).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    drop(first);
    let mut second = client.subscribe("events", earliest("sub")).await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn exclusive_producer_rejects_others() {
    let broker = MemoryBroker::new();
    let client = broker.connect(SERVICE, ClientOptions::default()).await.unwrap();

    let options = ProducerOptions { access_mode: ProducerAccessMode::Exclusive, ..Default::default() };
    let _owner = client.create_producer("events", options).await.unwrap();
    let err = client
        .create_producer("events", ProducerOptions::default())
        .await
        .err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn schema_mismatch_needs_multi_schema() {
    let broker = MemoryBroker::new();
    let admin = broker.connect_admin(ADMIN).await.unwrap();
    let client = broker.connect(SERVICE, ClientOptions::default()).await.unwrap();

    admin.create_non_partitioned_topic("quotes").await.unwrap();
    admin.create_schema("quotes", SchemaInfo::string()).await.unwrap();

    let strict = ProducerOptions { multi_schema: false, ..Default::default() };
    let err = client.create_producer("quotes", strict).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::IncompatibleSchema);

    client
        .create_producer("quotes", ProducerOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn unknown_topic_without_auto_create() {
    let broker = MemoryBroker::with_config(MemoryBrokerConfig {
        auto_create_topics: false,
        ..Default::default()
    });
    let client = broker.connect(SERVICE, ClientOptions::default()).await.unwrap();

    let err = client
        .create_producer("ghost", ProducerOptions::default())
        .await
        .err().unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn committed_transaction_becomes_visible() {
    let broker = MemoryBroker::new();
    let client = broker
        .connect(SERVICE, ClientOptions { enable_transaction: true })
        .await
        .unwrap();
    let coordinator = client.transaction_coordinator().unwrap();

    let mut consumer = client.subscribe("ledger", earliest("sub")).await.unwrap();
    let mut producer = client.create_producer("ledger", ProducerOptions::default()).await.unwrap();

    let txn = coordinator.new_transaction(Duration::from_secs(60)).await.unwrap();
    let mut message = text("pending");
    message.txn = Some(txn);
    producer.send(message).await.unwrap();

    let hidden = tokio::time::timeout(Duration::from_millis(50), consumer.receive()).await;
    assert!(hidden.is_err(), "uncommitted message must stay invisible");

    coordinator.commit(txn).await.unwrap();
    let message = consumer.receive().await.unwrap();
    assert_eq!(message.payload, b"pending");
}

#[tokio::test]
async fn expired_transaction_releases_blocked_reader() {
    let broker = MemoryBroker::new();
    let client = broker
        .connect(SERVICE, ClientOptions { enable_transaction: true })
        .await
        .unwrap();
    let coordinator = client.transaction_coordinator().unwrap();

    let mut consumer = client.subscribe("ledger", earliest("sub")).await.unwrap();
    let mut producer = client.create_producer("ledger", ProducerOptions::default()).await.unwrap();

    let txn = coordinator.new_transaction(Duration::from_millis(50)).await.unwrap();
    let mut message = text("in-txn");
    message.txn = Some(txn);
    producer.send(message).await.unwrap();
    producer.send(text("after")).await.unwrap();

    // Nothing else touches the broker, so only the deadline can wake the reader.
    let message = tokio::time::timeout(Duration::from_secs(2), consumer.receive())
        .await
        .expect("reader stayed blocked behind an expired transaction")
        .unwrap();
    assert_eq!(message.payload, b"after");

    let err = coordinator.commit(txn).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Transaction);
}

#[tokio::test]
async fn coordinator_requires_transactions_enabled() {
    let broker = MemoryBroker::new();
    let client = broker.connect(SERVICE, ClientOptions::default()).await.unwrap();
    let err = client.transaction_coordinator().err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Transaction);
}

#[tokio::test]
async fn bad_urls_are_rejected() {
    let broker = MemoryBroker::new();
    let err = broker.connect("http://localhost:6650", ClientOptions::default()).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = broker.connect_admin("pulsar://localhost:8080").await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}
