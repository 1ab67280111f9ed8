use broker_api::{ErrorKind, NON_PARTITION_INDEX, StringSchema, TopicPartition};
use broker_memory::MemoryBroker;
use runtime_operator::{DEFAULT_PARTITIONS, NUM_RECORDS_PER_PARTITION, OperatorSettings, RuntimeOperator};

async fn operator() -> RuntimeOperator {
    let broker = MemoryBroker::new();
    let settings = OperatorSettings::new("pulsar://localhost:6650", "http://localhost:8080");
    RuntimeOperator::connect(&broker, settings).await.unwrap()
}

#[tokio::test]
async fn tenant_and_namespace_creation_is_idempotent() {
    let op = operator().await;

    op.create_namespace("acme/billing").await.unwrap();
    op.create_namespace("acme/billing").await.unwrap();
    op.create_tenant("acme").await.unwrap();

    let tenants = op.admin().tenants().await.unwrap();
    assert_eq!(tenants.iter().filter(|t| *t == "acme").count(), 1);
    let namespaces = op.admin().namespaces("acme").await.unwrap();
    assert_eq!(namespaces, vec!["acme/billing".to_string()]);
}

#[tokio::test]
async fn malformed_namespace_is_rejected() {
    let op = operator().await;
    for bad in ["billing", "acme/", "/billing", "acme/billing/extra"] {
        let err = op.create_namespace(bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{bad}");
    }
}

#[tokio::test]
async fn create_topic_twice_keeps_first_partition_count() {
    let op = operator().await;

    op.create_topic("orders", 4).await.unwrap();
    op.create_topic("orders", 4).await.unwrap();
    op.create_topic("orders", 7).await.unwrap();

    let partitions = op.topic_partitions("orders").await.unwrap();
    let expected: Vec<_> = (0..4).map(|i| TopicPartition::new("orders", i)).collect();
    assert_eq!(partitions, expected);
}

#[tokio::test]
async fn zero_partitions_means_non_partitioned() {
    let op = operator().await;
    op.create_topic("single", 0).await.unwrap();

    let partitions = op.topic_partitions("single").await.unwrap();
    assert_eq!(partitions, vec![TopicPartition::new("single", NON_PARTITION_INDEX)]);
}

#[tokio::test]
async fn negative_partitions_are_rejected() {
    let op = operator().await;
    let err = op.create_topic("orders", -1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn topic_in_missing_namespace_propagates() {
    let op = operator().await;
    let err = op.create_topic("ghost/ns/orders", 2).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn partitions_only_grow() {
    let op = operator().await;
    op.create_topic("orders", 4).await.unwrap();

    let err = op.increase_topic_partitions("orders", 4).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = op.increase_topic_partitions("orders", 2).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    op.increase_topic_partitions("orders", 6).await.unwrap();
    assert_eq!(op.topic_partitions("orders").await.unwrap().len(), 6);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let op = operator().await;
    op.create_topic("orders", 3).await.unwrap();
    op.create_topic("single", 0).await.unwrap();

    op.delete_topic("orders").await.unwrap();
    op.delete_topic("orders").await.unwrap();
    op.delete_topic("single").await.unwrap();
    op.delete_topic("never-existed").await.unwrap();

    let err = op.admin().partitioned_topic_metadata("orders").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // A deleted topic can be created again.
    op.create_topic("orders", 2).await.unwrap();
    assert_eq!(op.topic_partitions("orders").await.unwrap().len(), 2);
}

#[tokio::test]
async fn setup_topic_fills_every_partition() {
    let op = operator().await;
    op.setup_topic("prefilled").await.unwrap();

    let partitions = op.topic_partitions("prefilled").await.unwrap();
    assert_eq!(partitions.len(), DEFAULT_PARTITIONS as usize);

    let first = partitions[0].full_name().unwrap();
    let messages = op.receive_messages(&first, &StringSchema, NUM_RECORDS_PER_PARTITION as i32).await.unwrap();
    assert_eq!(messages.len(), NUM_RECORDS_PER_PARTITION);
    assert!(messages.iter().all(|m| (10..30).contains(&m.value.len())));
}

#[tokio::test]
async fn schema_registration_is_visible_to_strict_producers() {
    let op = operator().await;
    op.create_topic("typed", 0).await.unwrap();
    op.create_schema("typed", &StringSchema).await.unwrap();

    let strict = broker_api::ProducerOptions { multi_schema: false, ..Default::default() };
    let err = op.client().create_producer("typed", strict).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::IncompatibleSchema);
}
