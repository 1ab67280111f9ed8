use broker_api::{BrokerError, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{context}: {source}")]
    Broker {
        context: String,
        #[source]
        source: BrokerError,
    },
}

impl OperatorError {
    pub fn broker(context: impl Into<String>, source: BrokerError) -> Self {
        OperatorError::Broker { context: context.into(), source }
    }

    /// Category of the failure, as the broker reported it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OperatorError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            OperatorError::Broker { source, .. } => source.kind(),
        }
    }
}

/// Attach call context to broker results.
pub(crate) trait Context<T> {
    fn context(self, ctx: impl FnOnce() -> String) -> Result<T, OperatorError>;
}

impl<T> Context<T> for Result<T, BrokerError> {
    fn context(self, ctx: impl FnOnce() -> String) -> Result<T, OperatorError> {
        self.map_err(|source| OperatorError::broker(ctx(), source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_broker_error() {
        let err: Result<(), _> = Err(BrokerError::conflict("busy"));
        let err = err.context(|| "subscribe 'orders'".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "subscribe 'orders': busy");

        let err = OperatorError::InvalidArgument("partitions < 0".into());
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
