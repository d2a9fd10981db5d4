//! Network-level error types.

use thiserror::Error;

/// Errors raised by the [`Network`](crate::network::Network) mutation API
/// and the execution bootstrap.
///
/// Job-level failures are deliberately absent: they are reported through the
/// completion callback, logged, and folded into the boolean return value of
/// `execute` rather than raised.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Invalid identifier: {0}")]
    InvalidId(String),
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
    #[error("Duplicate link id: {0}")]
    DuplicateLink(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Link not found: {0}")]
    LinkNotFound(String),
    #[error("Item not found: {0}")]
    ItemNotFound(String),
    #[error("Node {0} is not a source node")]
    NotASource(String),
    #[error("Network {network} is executing, mutation refused")]
    ExecutionInProgress { network: String },
    #[error("Link {link} already belongs to network {owner}")]
    LinkOwnershipMismatch { link: String, owner: String },
    #[error("No source data supplied for source node: {0}")]
    MissingSourceData(String),
    #[error("No sink data supplied for sink node: {0}")]
    MissingSinkData(String),
    #[error("No value available for input '{input}' of node {node}")]
    MissingInput { node: String, input: String },
    #[error("Unknown execution backend: {0}")]
    UnknownBackend(String),
    #[error("Execution backend is closed")]
    BackendClosed,
    #[error("Cycle detected in network graph")]
    CycleDetected,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}
