//! Error types for the stammtisch core.

use thiserror::Error;

/// Result type alias using the stammtisch Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for stammtisch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Message not found
    #[error("Message not found: {0}")]
    MessageNotFound(uuid::Uuid),

    /// Admission rejected (queue ceiling, bot limit)
    #[error("Admission rejected: {0}")]
    Admission(String),

    /// Provider call failed (generation, vision, GIF search)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("taste profile".to_string());
        assert_eq!(err.to_string(), "Not found: taste profile");
    }

    #[test]
    fn test_error_display_message_not_found() {
        let id = Uuid::nil();
        let err = Error::MessageNotFound(id);
        assert_eq!(err.to_string(), format!("Message not found: {}", id));
    }

    #[test]
    fn test_error_display_admission() {
        let err = Error::Admission("ai queue full".to_string());
        assert_eq!(err.to_string(), "Admission rejected: ai queue full");
    }

    #[test]
    fn test_error_display_provider() {
        let err = Error::Provider("model timeout".to_string());
        assert_eq!(err.to_string(), "Provider error: model timeout");
    }

    #[test]
    fn test_error_display_job() {
        let err = Error::Job("claim failed".to_string());
        assert_eq!(err.to_string(), "Job error: claim failed");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing API key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing API key");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
