//! Error types for the reconciler

use crate::dom::NodeId;
use thiserror::Error;

/// Virtual DOM and host DOM errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Invalid selector '{0}'")]
    InvalidSelector(String),

    #[error("Node {0} is detached from the document")]
    Detached(NodeId),

    #[error("No node matches '{0}'")]
    NoMatch(String),

    #[error("Document body is not ready")]
    BodyNotReady,
}

/// Remote metadata client errors
///
/// `Clone` so one failed request can be delivered to every deduplicated
/// waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Endpoint error: {0}")]
    Endpoint(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Task-level failures
///
/// None of these escape a task runner: they are retried per policy and, once
/// attempts run out, logged as a terminal failure for the cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Prerequisites not ready: {0}")]
    PrerequisitesNotReady(String),

    #[error("Missing DOM target: {0}")]
    MissingTarget(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Endpoint rejected request: {0}")]
    Endpoint(String),

    /// The page moved on while the task was running
    #[error("Result is stale")]
    Stale,

    #[error("{0}")]
    Other(String),
}

impl From<MetadataError> for TaskError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::Network(msg) => TaskError::Network(msg),
            MetadataError::Status(code) => TaskError::Network(format!("HTTP status {}", code)),
            MetadataError::Endpoint(msg) => TaskError::Endpoint(msg),
            MetadataError::Parse(msg) => TaskError::Other(format!("Unreadable response: {}", msg)),
        }
    }
}

impl From<DomError> for TaskError {
    fn from(err: DomError) -> Self {
        match err {
            DomError::InvalidSelector(selector) | DomError::NoMatch(selector) => {
                TaskError::MissingTarget(selector)
            }
            other => TaskError::MissingTarget(other.to_string()),
        }
    }
}
