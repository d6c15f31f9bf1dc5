//! Binding table and pending-event queue.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{Event, EventKey};
use crate::error::{GraphError, Result};
use crate::graph::{NodeId, NodeRegistry};

/// Maps binding keys to event nodes and holds events awaiting the next tick.
#[derive(Debug, Default)]
pub struct EventRouter {
    bindings: DashMap<EventKey, NodeId>,
    queue: Mutex<Vec<Event>>,
}

impl EventRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router whose queue starts with room for `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bindings: DashMap::new(),
            queue: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Bind `key` to the event node `node`.
    ///
    /// The existing binding is left untouched when the key is already bound.
    pub fn attach(&self, registry: &NodeRegistry, key: EventKey, node: NodeId) -> Result<()> {
        if !registry.resolve(node)?.kind().is_event() {
            return Err(GraphError::InvalidNodeType {
                id: node,
                expected: "event",
            });
        }

        match self.bindings.entry(key) {
            Entry::Occupied(entry) => {
                tracing::warn!(key = %entry.key(), bound = %entry.get(), node = %node, "duplicate event binding");
                Err(GraphError::DuplicateBinding {
                    key: entry.key().clone(),
                })
            }
            Entry::Vacant(entry) => {
                tracing::debug!(key = %entry.key(), node = %node, "attached event");
                entry.insert(node);
                Ok(())
            }
        }
    }

    /// Remove the binding for `key`. Returns the node it pointed at.
    pub fn detach(&self, key: &EventKey) -> Option<NodeId> {
        let removed = self.bindings.remove(key).map(|(_, node)| node);
        if let Some(node) = removed {
            tracing::debug!(key = %key, node = %node, "detached event");
        }
        removed
    }

    /// The node bound to `key`, if any.
    pub fn binding(&self, key: &EventKey) -> Option<NodeId> {
        self.bindings.get(key).map(|entry| *entry.value())
    }

    /// Queue `event` if it has a binding. Returns whether it was queued.
    pub fn enqueue(&self, event: Event) -> bool {
        if !self.bindings.contains_key(&event.key()) {
            tracing::trace!(target_view = %event.target, kind = %event.kind, "dropping unbound event");
            return false;
        }
        self.queue.lock().push(event);
        true
    }

    /// Take every queued event, leaving the queue empty.
    ///
    /// Events queued after this call wait for the next drain.
    pub fn take_queued(&self) -> Vec<Event> {
        std::mem::take(&mut *self.queue.lock())
    }

    /// Number of events waiting for the next tick.
    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Discard every queued event.
    pub fn clear_queue(&self) {
        let dropped = self.take_queued();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "discarded queued events");
        }
    }

    /// Number of bindings.
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}
