//! Error types for graph, event and scheduling operations.
//!
//! Every error is local to the single operation that raised it. None of them
//! leave the registry or the queues half-updated, and none abort a tick that
//! is already in progress: the frame loop logs them per item and moves on.

use crate::events::EventKey;
use crate::graph::NodeId;

/// Errors produced by [`NodesManager`](crate::NodesManager) operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The kind name passed to `create_node` has no registered constructor.
    #[error("unsupported node kind `{0}`")]
    UnsupportedKind(String),

    /// An operation referenced an id that is not in the registry.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// The node exists but lacks the capability the operation needs.
    #[error("node {id} is not a {expected} node")]
    InvalidNodeType {
        /// The offending node.
        id: NodeId,
        /// The kind of node the operation expected.
        expected: &'static str,
    },

    /// A binding already exists for this (target, event kind) pair.
    #[error("an event binding already exists for {key}")]
    DuplicateBinding {
        /// The key that is already bound.
        key: EventKey,
    },

    /// A node needed a child at this position but has fewer children.
    #[error("node {id} has no child at position {index}")]
    MissingChild {
        /// The node being evaluated.
        id: NodeId,
        /// The position that was read.
        index: usize,
    },

    /// The node configuration could not be decoded for its kind.
    #[error("invalid config for node {id}: {source}")]
    InvalidConfig {
        /// The node being created.
        id: NodeId,
        /// The underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// Evaluation recursed deeper than the configured limit, which almost
    /// always means the graph contains a cycle.
    #[error("evaluation of node {id} exceeded depth {depth}")]
    EvaluationDepthExceeded {
        /// The node whose evaluation hit the limit.
        id: NodeId,
        /// The configured limit.
        depth: usize,
    },

    /// The manager has been torn down.
    #[error("nodes manager has been invalidated")]
    Invalidated,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;
