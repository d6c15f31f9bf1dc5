//! Graph Nodes
//!
//! This module defines the node type that lives in the registry, and the
//! [`GraphContext`] seam through which a node reaches the rest of the engine
//! while it evaluates.

use std::fmt;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::context::EvaluationFrame;
use super::kind::NodeKind;
use super::value::NodeValue;
use crate::bridge::ViewTag;
use crate::error::{GraphError, Result};

/// Identifier for a node in the graph.
///
/// Ids are chosen by the controlling application, never generated here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything a node may touch while it evaluates or processes an event.
///
/// Implemented by [`NodesManager`](crate::NodesManager). Implementations must
/// not hold locks across these calls, since evaluation recurses back into them.
pub trait GraphContext {
    /// Id of the current evaluation pass. Values cached in the same pass are
    /// reused.
    fn loop_id(&self) -> u64;

    /// Maximum evaluation nesting allowed.
    fn max_depth(&self) -> usize;

    /// Timestamp of the current (or most recent) frame, in milliseconds.
    fn frame_time_ms(&self) -> f64;

    /// Resolve and evaluate another node.
    fn evaluate(&self, id: NodeId) -> Result<NodeValue>;

    /// Write a value node and mark it updated.
    fn set_value(&self, id: NodeId, value: NodeValue) -> Result<()>;

    /// Start a clock node ticking.
    fn start_clock(&self, id: NodeId) -> Result<()>;

    /// Stop a clock node.
    fn stop_clock(&self, id: NodeId) -> Result<()>;

    /// Whether a clock node is running.
    fn clock_running(&self, id: NodeId) -> Result<bool>;

    /// Deliver evaluated props for a view to the host.
    fn update_props(&self, view: ViewTag, props: &IndexMap<String, NodeValue>);

    /// Forward a call node's arguments to the host.
    fn call_host(&self, node: NodeId, args: &[NodeValue]);
}

/// Mutable part of a node.
#[derive(Debug)]
struct NodeState {
    /// Inputs, in evaluation order. Duplicates are allowed.
    children: SmallVec<[NodeId; 4]>,

    /// Nodes that list this one as a child. Used to find final nodes when
    /// this node is updated.
    parents: SmallVec<[NodeId; 4]>,

    /// Last computed (or, for value nodes, stored) value.
    value: NodeValue,

    /// Pass in which `value` was computed.
    evaluated_in: Option<u64>,

    /// Clock nodes only.
    running: bool,

    /// Props nodes only: views receiving this node's props.
    views: SmallVec<[ViewTag; 1]>,
}

/// A node in the dependency graph.
///
/// Shared as `Arc<Node>`; the registry is the only long-lived owner. All
/// mutation goes through an internal lock that is never held while another
/// node is evaluated.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    state: Mutex<NodeState>,
}

impl Node {
    /// Create a detached node of the given kind.
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            state: Mutex::new(NodeState {
                children: SmallVec::new(),
                parents: SmallVec::new(),
                value: kind.initial_value(),
                evaluated_in: None,
                running: false,
                views: SmallVec::new(),
            }),
            kind,
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Snapshot of the children, in order.
    pub fn children(&self) -> SmallVec<[NodeId; 4]> {
        self.state.lock().children.clone()
    }

    /// Snapshot of the parents.
    pub fn parents(&self) -> SmallVec<[NodeId; 4]> {
        self.state.lock().parents.clone()
    }

    pub(crate) fn add_child(&self, child: NodeId) {
        self.state.lock().children.push(child);
    }

    /// Remove one occurrence of `child`. Returns whether one was found.
    pub(crate) fn remove_child(&self, child: NodeId) -> bool {
        remove_first(&mut self.state.lock().children, child)
    }

    pub(crate) fn add_parent(&self, parent: NodeId) {
        self.state.lock().parents.push(parent);
    }

    pub(crate) fn remove_parent(&self, parent: NodeId) -> bool {
        remove_first(&mut self.state.lock().parents, parent)
    }

    /// The last computed value, without evaluating.
    pub fn cached_value(&self) -> NodeValue {
        self.state.lock().value.clone()
    }

    /// Evaluate the node, reusing the cached value if it was computed in the
    /// current pass.
    pub fn value(&self, cx: &dyn GraphContext) -> Result<NodeValue> {
        let loop_id = cx.loop_id();
        {
            let state = self.state.lock();
            if state.evaluated_in == Some(loop_id) {
                return Ok(state.value.clone());
            }
        }

        let _frame = EvaluationFrame::enter(self.id, cx.max_depth())?;
        let value = self.kind.evaluate(self, cx)?;

        let mut state = self.state.lock();
        state.value = value.clone();
        state.evaluated_in = Some(loop_id);
        Ok(value)
    }

    /// Store a new value. Only value nodes accept writes.
    pub(crate) fn store(&self, value: NodeValue) -> Result<()> {
        if !matches!(self.kind, NodeKind::Value { .. }) {
            return Err(GraphError::InvalidNodeType {
                id: self.id,
                expected: "value",
            });
        }
        self.state.lock().value = value;
        Ok(())
    }

    /// Whether this is a running clock.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Set the running flag of a clock node, returning the previous flag.
    pub(crate) fn set_running(&self, running: bool) -> Result<bool> {
        if self.kind != NodeKind::Clock {
            return Err(GraphError::InvalidNodeType {
                id: self.id,
                expected: "clock",
            });
        }
        Ok(std::mem::replace(&mut self.state.lock().running, running))
    }

    /// Views this props node writes to.
    pub fn views(&self) -> SmallVec<[ViewTag; 1]> {
        self.state.lock().views.clone()
    }

    /// Connect a view output. Returns false if it was already connected.
    pub(crate) fn attach_view(&self, view: ViewTag) -> bool {
        let mut state = self.state.lock();
        if state.views.contains(&view) {
            return false;
        }
        state.views.push(view);
        true
    }

    pub(crate) fn detach_view(&self, view: ViewTag) -> bool {
        remove_first(&mut self.state.lock().views, view)
    }

    /// Route an event payload into the value nodes named by this event
    /// node's mapping.
    ///
    /// Paths missing from the payload are skipped. Every mapping entry is
    /// attempted; the first failure is returned.
    pub(crate) fn process_event(
        &self,
        payload: &serde_json::Value,
        cx: &dyn GraphContext,
    ) -> Result<()> {
        let NodeKind::Event(spec) = &self.kind else {
            return Err(GraphError::InvalidNodeType {
                id: self.id,
                expected: "event",
            });
        };

        let mut first_error = None;
        for (pointer, target) in &spec.mapping {
            let Some(value) = payload.pointer(pointer).and_then(NodeValue::from_json) else {
                tracing::trace!(node = %self.id, pointer = %pointer, "event payload has no value at path");
                continue;
            };
            if let Err(err) = cx.set_value(*target, value) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind.name())
            .field("children", &state.children)
            .field("value", &state.value)
            .finish()
    }
}

fn remove_first<A>(items: &mut SmallVec<A>, item: A::Item) -> bool
where
    A: smallvec::Array,
    A::Item: PartialEq,
{
    match items.iter().position(|existing| *existing == item) {
        Some(index) => {
            items.remove(index);
            true
        }
        None => false,
    }
}
