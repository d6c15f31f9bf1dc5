//! Node Graph
//!
//! This module implements the dataflow graph: the nodes, the closed set of
//! node kinds, and the registry that owns them.
//!
//! # Overview
//!
//! - Nodes are identified by caller-chosen ids and owned by the registry.
//! - Edges are ordered: a node's children are its inputs, read positionally
//!   by the node's kind. Each child also records its parents so updates can
//!   be pushed toward the final nodes (`props`, `always`) that consume them.
//! - Evaluation is pull-based and memoized per update pass.
//!
//! # Design Decisions
//!
//! 1. Node kinds are a closed enum selected through a name → constructor
//!    table, rather than an open trait hierarchy.
//!
//! 2. Nodes are shared as `Arc<Node>` and the registry lock is only held to
//!    look them up, so evaluation can freely re-enter the registry (a `set`
//!    node writing another node, a clock posting its next tick).
//!
//! 3. No cycle detection. A cyclic graph is stopped by the evaluation depth
//!    limit and reported as an error for that pass.

mod context;
mod kind;
mod node;
mod registry;
mod value;

pub use context::EvaluationFrame;
pub use kind::{BezierCurve, Constructor, EventSpec, KindTable, NodeKind, Operator, PropsSpec};
pub use node::{GraphContext, Node, NodeId};
pub use registry::NodeRegistry;
pub use value::NodeValue;
