//! Test-side operator for a running broker.
//!
//! `RuntimeOperator` provisions tenants, namespaces and topics, sends and
//! receives typed messages, and builds the configuration a pipeline sink
//! needs for a given delivery guarantee.
//!
//! ```ignore
//! let broker = MemoryBroker::new();
//! let operator = RuntimeOperator::connect(&broker, OperatorSettings::new(
//!     "pulsar://localhost:6650",
//!     "http://localhost:8080",
//! )).await?;
//! operator.create_topic("orders", 4).await?;
//! operator.send_messages("orders", &StringSchema, None, &["a".to_string()]).await?;
//! let all = operator.receive_all_messages("orders", &StringSchema, Duration::from_secs(1)).await?;
//! ```

pub mod config;
pub mod error;
mod exchange;
mod operator;
mod provision;

pub use config::{ConfigValue, Configuration, DeliveryGuarantee};
pub use error::OperatorError;
pub use operator::{
    DEFAULT_PARTITIONS, DRAIN_TIMEOUT, NUM_RECORDS_PER_PARTITION, OperatorSettings, RuntimeOperator,
    SUBSCRIPTION_NAME,
};
pub use provision::random_alphanumeric;
