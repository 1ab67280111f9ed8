#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("unsupported broker '{0}'")]
    UnsupportedBroker(String),

    #[error("{0}")]
    Operator(#[from] runtime_operator::OperatorError),

    #[error("{failed} of {total} guarantee checks failed")]
    Failed { failed: usize, total: usize },

    #[error("interrupted")]
    Interrupted,

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
