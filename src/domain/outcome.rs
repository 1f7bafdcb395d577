//! Failure taxonomy for calls against external collaborators.

use std::time::Duration;
use thiserror::Error;

/// Error returned by an Action Invoker or Candidate Source call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// External quota exhausted; recoverable by waiting
    #[error("Rate limited (reset hint: {reset_hint:?})")]
    RateLimited { reset_hint: Option<Duration> },

    /// Network blip, temporary 5xx, parse failure
    #[error("Transient error: {0}")]
    Transient(String),

    /// Bad credentials, permanent validation failure
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl ActionError {
    pub fn rate_limited(reset_hint: Option<Duration>) -> Self {
        ActionError::RateLimited { reset_hint }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        ActionError::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ActionError::Fatal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::RateLimited { .. } => ErrorKind::RateLimited,
            ActionError::Transient(_) => ErrorKind::Transient,
            ActionError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

/// Coarse classification used in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    Transient,
    Fatal,
    /// Dedup store or audit write failed around the action
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Storage => "storage",
        }
    }
}
