//! The cluster capability the engine consumes

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::resource::{ResourceDocument, ResourceRef};

/// Errors a cluster connection reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ConnectionError {
    /// Credentials were refused; nothing else will succeed this run
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// Transport failure, timeout or a transient server error
    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    /// The server understood the request and refused it
    #[error("rejected by the API server: {0}")]
    Rejected(String),
}

/// Broad category of connection errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    Transient,
    Permanent,
}

impl ErrorCategory {
    /// Whether errors of this category are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Whether errors of this category end the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication)
    }
}

impl ConnectionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthenticationFailure(_) => ErrorCategory::Authentication,
            Self::Unreachable(_) => ErrorCategory::Transient,
            Self::Rejected(_) => ErrorCategory::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub fn is_fatal(&self) -> bool {
        self.category().is_fatal()
    }
}

/// What a successful submission did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitOutcome {
    /// Created or updated
    Applied,
    /// Already present with the same content
    AlreadyExists,
}

/// One authenticated handle to a cluster's API server
///
/// Shared by every worker of a run, so implementations must be thread-safe.
/// Per-call timeouts are the implementation's concern and surface as
/// [`ConnectionError::Unreachable`].
pub trait ClusterConnection: Send + Sync {
    /// Create or update everything a document describes
    fn submit(&self, document: &ResourceDocument) -> Result<SubmitOutcome, ConnectionError>;

    /// Look up a resource; `Ok(None)` when it doesn't exist
    fn get(&self, reference: &ResourceRef) -> Result<Option<ResourceDocument>, ConnectionError>;

    /// Block until what `document` created reports ready
    fn watch_ready(
        &self,
        _document: &ResourceDocument,
        _timeout: Duration,
    ) -> Result<(), ConnectionError> {
        Ok(())
    }
}
