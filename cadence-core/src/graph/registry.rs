//! Node Registry
//!
//! The registry owns every node and resolves ids to nodes. It performs the
//! structural mutations of the graph: create, drop, connect and disconnect.
//!
//! # Edges
//!
//! `connect(parent, child)` appends `child` to the parent's ordered input
//! list and records `parent` on the child, so an update to the child can be
//! pushed forward to the final nodes that consume it.
//!
//! Dropping a node does not touch the nodes that reference it. Parents that
//! still list a dropped child see [`GraphError::UnknownNode`] the next time
//! they evaluate, and children keep a stale parent entry that propagation
//! skips. Callers disconnect before dropping when they want a clean graph.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value as Json;

use super::kind::KindTable;
use super::node::{Node, NodeId};
use crate::error::{GraphError, Result};

/// Owner and resolver of all nodes.
pub struct NodeRegistry {
    /// All nodes in the graph, indexed by ID, in creation order.
    nodes: RwLock<IndexMap<NodeId, Arc<Node>>>,

    /// Kind name → constructor.
    kinds: KindTable,
}

impl NodeRegistry {
    /// Create an empty registry with the built-in kinds.
    pub fn new() -> Self {
        Self::with_kinds(KindTable::builtin())
    }

    /// Create an empty registry with a custom kind table.
    pub fn with_kinds(kinds: KindTable) -> Self {
        Self {
            nodes: RwLock::new(IndexMap::new()),
            kinds,
        }
    }

    /// Construct a node of `kind` from `config` and store it under `id`.
    ///
    /// An existing node with the same id is replaced without touching its
    /// edges.
    pub fn create_node(&self, id: NodeId, kind: &str, config: &Json) -> Result<Arc<Node>> {
        let Some(constructor) = self.kinds.get(kind) else {
            tracing::warn!(node = %id, kind, "unsupported node kind");
            return Err(GraphError::UnsupportedKind(kind.to_owned()));
        };
        let kind = constructor(config).map_err(|source| {
            tracing::warn!(node = %id, kind, error = %source, "invalid node config");
            GraphError::InvalidConfig { id, source }
        })?;

        let node = Arc::new(Node::new(id, kind));
        let replaced = self.nodes.write().insert(id, Arc::clone(&node));
        if replaced.is_some() {
            tracing::debug!(node = %id, "replaced existing node");
        }
        tracing::trace!(node = %id, kind = node.kind().name(), "created node");
        Ok(node)
    }

    /// Remove a node from the graph. No-op if absent.
    pub fn drop_node(&self, id: NodeId) -> Option<Arc<Node>> {
        let removed = self.nodes.write().shift_remove(&id);
        if removed.is_some() {
            tracing::trace!(node = %id, "dropped node");
        }
        removed
    }

    /// Get a node by id.
    pub fn find_node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.read().get(&id).cloned()
    }

    /// Get a node by id, failing with [`GraphError::UnknownNode`].
    pub fn resolve(&self, id: NodeId) -> Result<Arc<Node>> {
        self.find_node(id).ok_or(GraphError::UnknownNode(id))
    }

    /// Check whether an id is registered.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.read().contains_key(&id)
    }

    /// Append `child` to `parent`'s inputs.
    pub fn connect(&self, parent: NodeId, child: NodeId) -> Result<()> {
        let parent_node = self.resolve(parent)?;
        let child_node = self.resolve(child)?;

        parent_node.add_child(child);
        child_node.add_parent(parent);
        Ok(())
    }

    /// Remove one occurrence of `child` from `parent`'s inputs. No-op if the
    /// edge (or either node) is absent.
    pub fn disconnect(&self, parent: NodeId, child: NodeId) {
        let Some(parent_node) = self.find_node(parent) else {
            return;
        };
        if !parent_node.remove_child(child) {
            return;
        }
        if let Some(child_node) = self.find_node(child) {
            child_node.remove_parent(parent);
        }
    }

    /// Collect the final nodes reachable from `start` by following parent
    /// edges, including `start` itself.
    ///
    /// Nodes already in `visited` are not walked again, so one set can be
    /// shared across several starting points of the same pass. Stale parent
    /// entries (dropped nodes) are skipped.
    pub fn collect_final_nodes(
        &self,
        start: NodeId,
        visited: &mut HashSet<NodeId>,
    ) -> Vec<Arc<Node>> {
        let mut finals = Vec::new();
        let mut queue = VecDeque::from([start]);

        // BFS towards the sinks
        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            let Some(node) = self.find_node(node_id) else {
                continue;
            };
            queue.extend(node.parents());
            if node.kind().is_final() {
                finals.push(node);
            }
        }

        finals
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
