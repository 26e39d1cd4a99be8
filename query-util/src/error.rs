use std::time::Duration;
use thiserror::Error;

/// Error surface for every query path in this workspace.
///
/// `Provider` carries the backend's message verbatim; callers must never see
/// a reinterpreted or rewrapped provider error. `NotFound` is the provider
/// subtype for a missing entity so callers can tell "absent" from "broken".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid {what}: {reason}")]
    InvalidInput { what: &'static str, reason: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl QueryError {
    pub fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        QueryError::InvalidInput {
            what,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryError::NotFound(_))
    }
}
