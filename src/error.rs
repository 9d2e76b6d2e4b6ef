//! Error types for the Storage Lifecycle Operator
//!
//! Provides structured error types for the reconcile engine, the node drain
//! workflow, and the Kubernetes adapters, plus the policy used to collapse
//! several independent failures into one reportable error.

use std::time::Duration;
use thiserror::Error;

/// Message reported when more than one sub-operation of a pass failed.
pub const AGGREGATE_ERROR_MESSAGE: &str = "multiple errors occurred during reconcile";

/// Unified error type for the operator
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
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("{operation} {kind} {key}: {source}")]
    ResourceOperation {
        operation: &'static str,
        kind: String,
        key: String,
        source: Box<Error>,
    },

    // =========================================================================
    // Reconcile Errors
    // =========================================================================
    #[error("timed out after {timeout:?} waiting for {target}{}", last_error_suffix(.last_error))]
    Timeout {
        target: String,
        timeout: Duration,
        last_error: Option<Box<Error>>,
    },

    #[error("cancelled while waiting for {target}")]
    Cancelled { target: String },

    #[error("{}", AGGREGATE_ERROR_MESSAGE)]
    Aggregate { errors: Vec<Error> },

    // =========================================================================
    // Drain Errors
    // =========================================================================
    #[error("node {node}: {step} failed: {source}")]
    NodeDrain {
        node: String,
        step: String,
        source: Box<Error>,
    },

    #[error("exec {command:?} in pod {pod} failed: {reason}")]
    Exec {
        pod: String,
        command: Vec<String>,
        reason: String,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn last_error_suffix(last_error: &Option<Box<Error>>) -> String {
    match last_error {
        Some(e) => format!(": last error: {}", e),
        None => String::new(),
    }
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Wrap an error with the identity of the resource it happened on.
    ///
    /// Cancellation is passed through untouched so callers can still
    /// recognise it.
    pub fn for_resource(self, operation: &'static str, kind: &str, key: impl ToString) -> Self {
        match self {
            Error::Cancelled { .. } => self,
            other => Error::ResourceOperation {
                operation,
                kind: kind.to_string(),
                key: key.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Wrap an error with the node and drain step it happened in.
    pub fn for_node(self, node: &str, step: impl ToString) -> Self {
        match self {
            Error::Cancelled { .. } => self,
            other => Error::NodeDrain {
                node: node.to_string(),
                step: step.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Collapse independent failures into at most one error.
    ///
    /// A single failure is returned as-is so its text survives verbatim; two
    /// or more are reported with [`AGGREGATE_ERROR_MESSAGE`].
    pub fn collapse(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate { errors }),
        }
    }

    /// True for a 404 returned by the API server, directly or wrapped.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(response)) => response.code == 404,
            Error::ResourceNotFound { .. } => true,
            Error::ResourceOperation { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::ResourceOperation { .. } | Error::Aggregate { .. } => {
                ErrorAction::RequeueWithBackoff
            }

            // A step ran out of budget - give the cluster time to settle
            Error::Timeout { .. } | Error::NodeDrain { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(30))
            }

            // Shutdown or bad configuration - don't retry automatically
            Error::Cancelled { .. } | Error::Configuration(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_)
                | Error::ResourceOperation { .. }
                | Error::Timeout { .. }
                | Error::Exec { .. }
        )
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
