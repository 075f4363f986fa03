//! Error types for the FSS provisioner
//!
//! Provides structured error types for admission, reconciliation, the
//! provision state store, and the file storage backend adapters.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Admission Errors
    // =========================================================================
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unavailable: {backend}: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Backend call {operation} timed out after {timeout:?}")]
    BackendTimeout { operation: String, timeout: Duration },

    #[error("Resource not found: {kind}/{id}")]
    NotFound { kind: String, id: String },

    #[error("Resource conflict: {kind}/{id}: {reason}")]
    Conflict {
        kind: String,
        id: String,
        reason: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Reconciliation Errors
    // =========================================================================
    #[error("Retries exhausted for claim {claim} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        claim: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Provisioning of claim {claim} cancelled by deletion")]
    Cancelled { claim: String },

    #[error("Timed out after {timeout:?} waiting for claim {claim} to reach {phase}")]
    WaitTimeout {
        claim: String,
        phase: String,
        timeout: Duration,
    },

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Provision store error: {0}")]
    Store(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry with exponential backoff
    RetryWithBackoff,
    /// Treat the operation as already satisfied
    AlreadySatisfied,
    /// Don't retry, surface the failure
    Fail,
}

impl Error {
    /// Build a `BackendUnavailable` error
    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Build a `NotFound` error
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Build a `Conflict` error
    pub fn conflict(
        kind: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Conflict {
            kind: kind.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Determine what action to take for this error when creating resources
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::BackendUnavailable { .. }
            | Error::BackendTimeout { .. }
            | Error::Http(_)
            | Error::Kube(_)
            | Error::Store(_)
            | Error::Io(_) => ErrorAction::RetryWithBackoff,

            // Everything else is terminal for the current operation
            _ => ErrorAction::Fail,
        }
    }

    /// Determine what action to take for this error when deleting resources
    ///
    /// A missing or conflicting resource on delete means the deletion has
    /// already happened or is already under way.
    pub fn delete_action(&self) -> ErrorAction {
        match self {
            Error::NotFound { .. } | Error::Conflict { .. } => ErrorAction::AlreadySatisfied,
            other => other.action(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self.action(), ErrorAction::RetryWithBackoff)
    }

    /// Check if this error means a resource is already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;
