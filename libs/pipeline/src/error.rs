use broker_api::BrokerError;
use runtime_operator::OperatorError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Operator(#[from] OperatorError),

    #[error("{context}: {source}")]
    Broker {
        context: String,
        #[source]
        source: BrokerError,
    },

    /// Raised by a `RecordSource` that cannot produce its next record.
    #[error("source: {0}")]
    Source(String),

    #[error(
        "delivery verification failed: {} missing, {} unexpected (missing: {missing:?}, unexpected: {unexpected:?})",
        .missing.len(),
        .unexpected.len()
    )]
    Verification {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}

impl PipelineError {
    pub(crate) fn broker(context: impl Into<String>, source: BrokerError) -> Self {
        PipelineError::Broker { context: context.into(), source }
    }
}
