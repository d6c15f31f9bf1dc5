//! Event Routing
//!
//! External events (gestures, scroll offsets, ...) reach the graph through
//! bindings from a `(target view, event kind)` pair to an event node.
//!
//! # Delivery
//!
//! Dispatch is deferred. An event with a live binding is queued and the
//! frame scheduler is woken; the queue is drained at the start of the next
//! tick, in arrival order. Events without a binding are dropped on the spot.
//!
//! Bindings store node ids, not nodes. The registry stays the only owner, so
//! a binding whose node was dropped simply resolves to nothing at delivery.

mod router;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bridge::ViewTag;

pub use router::EventRouter;

/// Composite binding key: target view and event kind name.
///
/// Compared structurally, never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    /// The view the event originates from.
    pub target: ViewTag,
    /// Event kind name, e.g. `onGestureEvent`.
    pub kind: String,
}

impl EventKey {
    /// Build a key.
    pub fn new(target: impl Into<ViewTag>, kind: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} `{}`", self.target, self.kind)
    }
}

/// An inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The view the event originates from.
    pub target: ViewTag,
    /// Event kind name.
    pub kind: String,
    /// Arbitrary payload; event nodes read fields from it by JSON pointer.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Build an event.
    pub fn new(
        target: impl Into<ViewTag>,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            target: target.into(),
            kind: kind.into(),
            payload,
        }
    }

    /// The binding key this event is routed by.
    pub fn key(&self) -> EventKey {
        EventKey {
            target: self.target,
            kind: self.kind.clone(),
        }
    }
}
