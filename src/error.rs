use serde_json::Value;
use thiserror::Error;

/// Category of a pipeline failure, used for log filtering and alert
/// payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Event payload failed schema or range validation
    Validation,
    /// Parsed event could not be turned into a storage record
    Transform,
    /// PostgreSQL write or read failed
    Storage,
    /// Upstream chain or broker failure
    Blockchain,
    /// Invalid or missing configuration
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transform => "transform",
            ErrorKind::Storage => "storage",
            ErrorKind::Blockchain => "blockchain",
            ErrorKind::Config => "config",
        }
    }
}

/// Tagged pipeline error.
///
/// Carries an HTTP-ish status code and optional structured details so a
/// single error shape can flow into logs and alert payloads.
#[derive(Debug, Clone, Error)]
#[error("[{}] {message}", kind.as_str())]
pub struct IndexerError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: u16,
    pub details: Option<Value>,
}

impl IndexerError {
    fn new(kind: ErrorKind, message: impl Into<String>, status: u16) -> Self {
        Self {
            kind,
            message: message.into(),
            status,
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message, 400)
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transform, message, 422)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message, 500)
    }

    pub fn blockchain(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Blockchain, message, 502)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message, 500)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_kind_tag() {
        let err = IndexerError::validation("price must be non-negative");
        assert_eq!(err.to_string(), "[validation] price must be non-negative");
        assert_eq!(err.status, 400);
    }

    #[test]
    fn test_constructor_kinds_and_statuses() {
        assert_eq!(IndexerError::transform("m").kind, ErrorKind::Transform);
        assert_eq!(IndexerError::transform("m").status, 422);
        assert_eq!(IndexerError::config("m").kind, ErrorKind::Config);
        assert_eq!(IndexerError::config("m").status, 500);
        assert_eq!(IndexerError::blockchain("m").status, 502);
    }

    #[test]
    fn test_with_details_attaches_payload() {
        let err = IndexerError::storage("write failed")
            .with_details(serde_json::json!({"batch_size": 7}));
        assert_eq!(err.kind, ErrorKind::Storage);
        assert_eq!(err.details.unwrap()["batch_size"], 7);
    }
}
