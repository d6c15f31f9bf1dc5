//! Host bridge.
//!
//! The engine never paints anything. Final nodes hand their results to the
//! host through this trait: props nodes deliver property maps for views and
//! call nodes forward their arguments.

use std::fmt;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::graph::{NodeId, NodeValue};

/// Host identifier of a view. Also the target half of an event binding key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewTag(pub u64);

impl From<u64> for ViewTag {
    fn from(tag: u64) -> Self {
        Self(tag)
    }
}

impl fmt::Display for ViewTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view {}", self.0)
    }
}

/// Outbound side of the engine.
///
/// Called synchronously from inside a tick; implementations should hand work
/// off rather than block.
pub trait HostBridge: Send + Sync {
    /// New property values for a view.
    fn update_props(&self, view: ViewTag, props: &IndexMap<String, NodeValue>);

    /// A call node was evaluated with these arguments.
    fn call(&self, node: NodeId, args: &[NodeValue]);
}

/// A bridge that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBridge;

impl HostBridge for NoopBridge {
    fn update_props(&self, _view: ViewTag, _props: &IndexMap<String, NodeValue>) {}

    fn call(&self, _node: NodeId, _args: &[NodeValue]) {}
}

/// One recorded props delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct PropsUpdate {
    pub view: ViewTag,
    pub props: IndexMap<String, NodeValue>,
}

/// One recorded host call.
#[derive(Debug, Clone, PartialEq)]
pub struct HostCall {
    pub node: NodeId,
    pub args: Vec<NodeValue>,
}

/// A bridge that records everything it receives, for embedding hosts that
/// poll and for tests.
#[derive(Debug, Default)]
pub struct RecordingBridge {
    updates: Mutex<Vec<PropsUpdate>>,
    calls: Mutex<Vec<HostCall>>,
}

impl RecordingBridge {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the recorded props updates.
    pub fn take_updates(&self) -> Vec<PropsUpdate> {
        std::mem::take(&mut *self.updates.lock())
    }

    /// Drain the recorded host calls.
    pub fn take_calls(&self) -> Vec<HostCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// Number of props updates recorded and not yet drained.
    pub fn update_count(&self) -> usize {
        self.updates.lock().len()
    }
}

impl HostBridge for RecordingBridge {
    fn update_props(&self, view: ViewTag, props: &IndexMap<String, NodeValue>) {
        self.updates.lock().push(PropsUpdate {
            view,
            props: props.clone(),
        });
    }

    fn call(&self, node: NodeId, args: &[NodeValue]) {
        self.calls.lock().push(HostCall {
            node,
            args: args.to_vec(),
        });
    }
}
