//! Cadence Core
//!
//! A frame-synchronized dataflow graph engine. Nodes form a dependency graph
//! (clocks, value holders, operators, conditionals, bezier easing, property
//! outputs, host calls, event taps) that is evaluated once per display
//! refresh tick, outside the host's normal rendering pipeline.
//!
//! It implements:
//!
//! - A node registry with ordered, positional edges
//! - An event router that queues external events for the next tick
//! - A frame scheduler with this-frame and after-frame callback queues
//! - Update propagation from changed nodes to the final nodes that consume them
//!
//! # Architecture
//!
//! - `graph`: nodes, node kinds and the registry
//! - `events`: event bindings and the pending-event queue
//! - `frame`: frame sources and the per-tick scheduler
//! - `manager`: the [`NodesManager`] tying it all together
//! - `bridge`: the outbound [`HostBridge`] seam
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cadence_core::{ManualFrameSource, NodeId, NodeValue, NodesManager, RecordingBridge, ViewTag};
//! use serde_json::json;
//!
//! let source = Arc::new(ManualFrameSource::new());
//! let bridge = Arc::new(RecordingBridge::new());
//! let manager = NodesManager::new(source.clone(), bridge.clone());
//!
//! manager.create_node(NodeId::from(1), "value", &json!({"value": 0}))?;
//! manager.create_node(NodeId::from(2), "props", &json!({"props": ["opacity"]}))?;
//! manager.connect(NodeId::from(2), NodeId::from(1))?;
//! manager.connect_node_to_output(NodeId::from(2), ViewTag(10))?;
//!
//! manager.set_value(NodeId::from(1), NodeValue::Number(0.5))?;
//! source.fire(16.0);
//!
//! let updates = bridge.take_updates();
//! assert_eq!(updates[0].props["opacity"], NodeValue::Number(0.5));
//! # Ok::<(), cadence_core::GraphError>(())
//! ```

pub mod bridge;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod graph;
pub mod manager;

pub use bridge::{HostBridge, HostCall, NoopBridge, PropsUpdate, RecordingBridge, ViewTag};
pub use command::Command;
pub use config::EngineConfig;
pub use error::{GraphError, Result};
pub use events::{Event, EventKey};
pub use frame::{
    FrameContext, FrameSource, IntervalFrameSource, ManualFrameSource, SchedulerState,
};
pub use graph::{NodeId, NodeKind, NodeValue};
pub use manager::NodesManager;
