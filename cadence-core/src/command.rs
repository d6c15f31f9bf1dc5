//! Graph commands.
//!
//! The controlling application describes graph edits as a list of commands,
//! typically decoded from JSON, and hands them to
//! [`NodesManager::apply_all`](crate::NodesManager::apply_all).
//!
//! ```json
//! [
//!   {"op": "createNode", "id": 1, "kind": "value", "config": {"value": 0}},
//!   {"op": "createNode", "id": 2, "kind": "props", "config": {"props": ["opacity"]}},
//!   {"op": "connect", "parent": 2, "child": 1},
//!   {"op": "connectNodeToOutput", "id": 2, "view": 10}
//! ]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::bridge::ViewTag;
use crate::graph::{NodeId, NodeValue};

/// One graph or event-binding edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Command {
    CreateNode {
        id: NodeId,
        kind: String,
        #[serde(default)]
        config: Json,
    },
    DropNode {
        id: NodeId,
    },
    Connect {
        parent: NodeId,
        child: NodeId,
    },
    Disconnect {
        parent: NodeId,
        child: NodeId,
    },
    ConnectNodeToOutput {
        id: NodeId,
        view: ViewTag,
    },
    DisconnectNodeFromOutput {
        id: NodeId,
        view: ViewTag,
    },
    AttachEvent {
        target: ViewTag,
        kind: String,
        node: NodeId,
    },
    /// Removes the binding for `(target, kind)`; `node` is informational.
    DetachEvent {
        target: ViewTag,
        kind: String,
        node: NodeId,
    },
    SetValue {
        id: NodeId,
        value: NodeValue,
    },
}

impl Command {
    /// The command's `op` name.
    pub fn op(&self) -> &'static str {
        match self {
            Self::CreateNode { .. } => "createNode",
            Self::DropNode { .. } => "dropNode",
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::ConnectNodeToOutput { .. } => "connectNodeToOutput",
            Self::DisconnectNodeFromOutput { .. } => "disconnectNodeFromOutput",
            Self::AttachEvent { .. } => "attachEvent",
            Self::DetachEvent { .. } => "detachEvent",
            Self::SetValue { .. } => "setValue",
        }
    }
}
