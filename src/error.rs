//! Error types for the NexentaStor provider core
//!
//! Every failure the provider can report is one variant of [`Error`]. Appliance
//! error envelopes are never matched ad hoc by callers: they are classified once
//! into a [`NefError`] and inspected through the predicates on [`Error`].

use crate::controlplane::backends::nexentastor::envelope::{NefError, NefErrorKind};
use thiserror::Error;

/// Unified error type for the provider core
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Endpoint Errors
    // =========================================================================
    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("Endpoint {endpoint} is unavailable: {reason}")]
    Unavailable { endpoint: String, reason: String },

    // =========================================================================
    // Caller Deadline / Cancellation
    // =========================================================================
    #[error("Deadline exceeded during {operation}")]
    DeadlineExceeded { operation: String },

    #[error("Cancelled during {operation}")]
    Cancelled { operation: String },

    // =========================================================================
    // Appliance Errors
    // =========================================================================
    #[error("Login to NexentaStor {endpoint} failed (username: '{username}'): {reason}")]
    Auth {
        endpoint: String,
        username: String,
        reason: String,
    },

    #[error("{operation} on {endpoint} failed: {source}")]
    Appliance {
        endpoint: String,
        operation: String,
        #[source]
        source: NefError,
    },

    #[error("Job {job_id} was finished with error: {source}")]
    JobFailed {
        job_id: String,
        #[source]
        source: NefError,
    },

    // =========================================================================
    // Response Shape Errors
    // =========================================================================
    #[error("Cannot decode response from {endpoint} (status {status}): {reason}; body: {body}")]
    Decode {
        endpoint: String,
        status: u16,
        body: String,
        reason: String,
    },

    #[error("{operation} on {endpoint}: {reason}")]
    Protocol {
        endpoint: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Caller Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Cluster Errors
    // =========================================================================
    #[error("{operation}: all cluster endpoints failed: {}", format_failures(.failures))]
    ClusterUnavailable {
        operation: String,
        failures: Vec<EndpointFailure>,
    },

    // =========================================================================
    // Configuration / IO
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One endpoint's contribution to a [`Error::ClusterUnavailable`]
#[derive(Debug)]
pub struct EndpointFailure {
    pub endpoint: String,
    pub error: Error,
}

fn format_failures(failures: &[EndpointFailure]) -> String {
    if failures.is_empty() {
        return "no endpoints configured".to_string();
    }
    failures
        .iter()
        .map(|f| format!("[{}: {}]", f.endpoint, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Coarse error taxonomy exposed to the orchestrator layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Auth,
    Protocol,
    Validation,
    NotFound,
    AlreadyExists,
    Appliance,
    JobFailed,
    ClusterUnavailable,
    DeadlineExceeded,
    Cancelled,
    Configuration,
}

impl Error {
    /// Classify this error into the coarse taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport { .. } | Error::Timeout { .. } | Error::Unavailable { .. } => {
                ErrorKind::Transport
            }
            Error::Auth { .. } => ErrorKind::Auth,
            Error::Appliance { source, .. } => match source.kind() {
                NefErrorKind::Auth => ErrorKind::Auth,
                NefErrorKind::NotFound => ErrorKind::NotFound,
                NefErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
                NefErrorKind::InvalidArgument => ErrorKind::Validation,
                _ => ErrorKind::Appliance,
            },
            Error::JobFailed { .. } => ErrorKind::JobFailed,
            Error::Decode { .. } | Error::Protocol { .. } | Error::Json(_) => ErrorKind::Protocol,
            Error::Validation(_) => ErrorKind::Validation,
            Error::ClusterUnavailable { .. } => ErrorKind::ClusterUnavailable,
            Error::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Configuration(_) | Error::Io(_) | Error::Yaml(_) => ErrorKind::Configuration,
        }
    }

    /// Whether the failure is attributable to the endpoint itself, making it
    /// eligible for failover to another cluster member
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::Timeout { .. } | Error::Unavailable { .. }
        )
    }

    /// Check if the appliance rejected our credentials or token
    pub fn is_auth_failure(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }

    /// Check if the appliance reported the resource as missing
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if the appliance reported the resource as already existing
    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }
}

/// Result type alias for the provider core
pub type Result<T> = std::result::Result<T, Error>;
