use std::fmt;

/// Category of a broker error. Callers branch on the kind, never on the
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed caller input. Permanent.
    InvalidArgument,
    /// Resource creation conflict (tenant, namespace, topic).
    AlreadyExists,
    /// Topic, tenant, namespace or subscription does not exist.
    NotFound,
    /// Resource is busy (exclusive subscription or producer already attached).
    Conflict,
    /// An operation did not complete within its deadline.
    Timeout,
    /// Transport error or closed connection.
    Unavailable,
    /// Producer schema does not match the schema registered on the topic.
    IncompatibleSchema,
    /// Transaction could not be opened, committed or aborted.
    Transaction,
    /// Payload could not be encoded or decoded.
    Format,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidArgument => f.write_str("invalid argument"),
            ErrorKind::AlreadyExists => f.write_str("already exists"),
            ErrorKind::NotFound => f.write_str("not found"),
            ErrorKind::Conflict => f.write_str("conflict"),
            ErrorKind::Timeout => f.write_str("timeout"),
            ErrorKind::Unavailable => f.write_str("unavailable"),
            ErrorKind::IncompatibleSchema => f.write_str("incompatible schema"),
            ErrorKind::Transaction => f.write_str("transaction"),
            ErrorKind::Format => f.write_str("format"),
        }
    }
}

/// Error returned by every broker capability method.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerError {
    kind: ErrorKind,
    message: String,
}

impl BrokerError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, msg)
    }

    pub fn incompatible_schema(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::IncompatibleSchema, msg)
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, msg)
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Format, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Add context to the error, preserving the original `ErrorKind`.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Debug for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BrokerError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → BrokerError with the matching kind
// ---------------------------------------------------------------------------

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        Self::format(e.to_string())
    }
}

impl From<std::str::Utf8Error> for BrokerError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::format(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for BrokerError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::format(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = BrokerError::not_found("topic missing").with_context("delete 'orders'");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), "delete 'orders': topic missing");
        assert_eq!(format!("{err:?}"), "[not found] delete 'orders': topic missing");
    }

    #[test]
    fn utf8_errors_are_format_errors() {
        let err: BrokerError = String::from_utf8(vec![0xff, 0xfe]).unwrap_err().into();
        assert!(err.is(ErrorKind::Format));
    }
}
