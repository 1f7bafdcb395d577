//! Error types for Ducky
//!
//! Centralized error handling using thiserror. Per-item collaborator failures
//! live in [`crate::domain::ActionError`] and never surface here; this enum
//! covers startup, registration and persistence problems.

use thiserror::Error;

/// All error types that can occur in Ducky
#[derive(Debug, Error)]
pub enum DuckyError {
    /// A job with the same name was already registered
    #[error("Duplicate job: {0}")]
    DuplicateJob(String),

    /// Job lookup by name or index failed
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    /// Cron expression could not be parsed
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    /// Configuration is structurally valid YAML but semantically wrong
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// A collaborator credential is missing from the environment
    #[error("Missing credential: environment variable {0} not set")]
    MissingCredential(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// HTTP client construction or transport error
    #[error("HTTP error: {0}")]
    Http(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Ducky operations
pub type Result<T> = std::result::Result<T, DuckyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_job_error() {
        let err = DuckyError::DuplicateJob("reply-bot".to_string());
        assert_eq!(err.to_string(), "Duplicate job: reply-bot");
    }

    #[test]
    fn test_unknown_job_error() {
        let err = DuckyError::UnknownJob("#7".to_string());
        assert_eq!(err.to_string(), "Unknown job: #7");
    }

    #[test]
    fn test_invalid_cron_error() {
        let err = DuckyError::InvalidCron {
            expr: "61 * * * *".to_string(),
            reason: "minute out of range".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid cron expression '61 * * * *': minute out of range"
        );
    }

    #[test]
    fn test_missing_credential_error() {
        let err = DuckyError::MissingCredential("DUCKY_API_TOKEN".to_string());
        assert_eq!(
            err.to_string(),
            "Missing credential: environment variable DUCKY_API_TOKEN not set"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DuckyError = io_err.into();
        assert!(matches!(err, DuckyError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: DuckyError = json_err.into();
        assert!(matches!(err, DuckyError::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(DuckyError::Storage("locked".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
