//! Nodes Manager
//!
//! The manager is the engine's front door. It owns the registry, the event
//! router and the frame scheduler, and it runs the per-tick protocol when the
//! frame source fires.
//!
//! # How Updates Flow
//!
//! 1. Something writes a value node: an event, a `set` node, the host, or a
//!    running clock reaching a new frame.
//!
//! 2. The node is marked updated. The first mark of a pass posts an
//!    after-frame callback, which also wakes the scheduler.
//!
//! 3. At the end of the tick that callback walks parent edges from every
//!    updated node to the final nodes that consume them and evaluates each
//!    one, pushing props to the host.
//!
//! # Ownership
//!
//! `NodesManager` is a cheap handle around shared state. Callbacks the engine
//! posts for itself hold weak references, so dropping the last handle tears
//! everything down. Callbacks posted by callers that capture a handle keep
//! the engine alive until [`invalidate`](NodesManager::invalidate) drops them.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as Json;

use crate::bridge::{HostBridge, ViewTag};
use crate::command::Command;
use crate::config::EngineConfig;
use crate::error::{GraphError, Result};
use crate::events::{Event, EventKey, EventRouter};
use crate::frame::{
    run_isolated, FrameContext, FrameHandler, FrameScheduler, FrameSource, SchedulerState,
};
use crate::graph::{GraphContext, KindTable, Node, NodeId, NodeKind, NodeRegistry, NodeValue};

/// Nodes updated since the last propagation pass.
#[derive(Debug, Default)]
struct UpdateContext {
    updated: Vec<NodeId>,
    /// Evaluation pass id; node values are memoized per pass.
    loop_id: u64,
    /// Whether a propagation callback is already queued.
    flush_posted: bool,
}

struct Inner {
    config: EngineConfig,
    registry: NodeRegistry,
    router: EventRouter,
    scheduler: FrameScheduler,
    bridge: Arc<dyn HostBridge>,
    updates: Mutex<UpdateContext>,
    /// Clocks with a frame callback queued.
    scheduled_clocks: Mutex<HashSet<NodeId>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.scheduler.invalidate();
    }
}

/// Handle to a graph engine. Clones share the same engine.
#[derive(Clone)]
pub struct NodesManager {
    inner: Arc<Inner>,
}

impl NodesManager {
    /// Create an engine with the default config and built-in node kinds.
    pub fn new(source: Arc<dyn FrameSource>, bridge: Arc<dyn HostBridge>) -> Self {
        Self::with_config(EngineConfig::default(), source, bridge)
    }

    /// Create an engine with the built-in node kinds.
    pub fn with_config(
        config: EngineConfig,
        source: Arc<dyn FrameSource>,
        bridge: Arc<dyn HostBridge>,
    ) -> Self {
        Self::with_kinds(config, KindTable::builtin(), source, bridge)
    }

    /// Create an engine with a custom kind table.
    pub fn with_kinds(
        config: EngineConfig,
        kinds: KindTable,
        source: Arc<dyn FrameSource>,
        bridge: Arc<dyn HostBridge>,
    ) -> Self {
        let capacity = config.queue_capacity;
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let handler: FrameHandler = Arc::new(move |timestamp_ms: f64| {
                if let Some(inner) = weak.upgrade() {
                    NodesManager { inner }.on_animation_frame(timestamp_ms);
                }
            });
            Inner {
                registry: NodeRegistry::with_kinds(kinds),
                router: EventRouter::with_capacity(capacity),
                scheduler: FrameScheduler::new(source, handler, capacity),
                bridge,
                updates: Mutex::new(UpdateContext::default()),
                scheduled_clocks: Mutex::new(HashSet::new()),
                config,
            }
        });
        Self { inner }
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------------
    // Graph mutation
    // ------------------------------------------------------------------------

    /// Create a node of `kind` under `id`, replacing any node with that id.
    pub fn create_node(&self, id: NodeId, kind: &str, config: &Json) -> Result<()> {
        self.inner.registry.create_node(id, kind, config).map(|_| ())
    }

    /// Remove a node. Parents that still list it keep a dangling child.
    pub fn drop_node(&self, id: NodeId) {
        self.inner.registry.drop_node(id);
    }

    /// Append `child` to `parent`'s inputs.
    pub fn connect(&self, parent: NodeId, child: NodeId) -> Result<()> {
        self.inner.registry.connect(parent, child)
    }

    /// Remove one occurrence of `child` from `parent`'s inputs.
    pub fn disconnect(&self, parent: NodeId, child: NodeId) {
        self.inner.registry.disconnect(parent, child);
    }

    /// Look up a node.
    pub fn find_node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.inner.registry.find_node(id)
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.inner.registry.node_count()
    }

    /// Route a props node's output to `view`. Other kinds ignore this.
    pub fn connect_node_to_output(&self, id: NodeId, view: ViewTag) -> Result<()> {
        let node = self.inner.registry.resolve(id)?;
        if !node.kind().is_props() {
            tracing::debug!(node = %id, kind = node.kind().name(), "ignoring output connection for non-props node");
            return Ok(());
        }
        if node.attach_view(view) {
            tracing::debug!(node = %id, view = %view, "connected node to output");
        }
        Ok(())
    }

    /// Stop routing a props node's output to `view`.
    pub fn disconnect_node_from_output(&self, id: NodeId, view: ViewTag) -> Result<()> {
        let node = self.inner.registry.resolve(id)?;
        if node.detach_view(view) {
            tracing::debug!(node = %id, view = %view, "disconnected node from output");
        }
        Ok(())
    }

    /// Evaluate a node in a fresh pass and return its value.
    pub fn get_value(&self, id: NodeId) -> Result<NodeValue> {
        self.begin_pass();
        self.evaluate_node(id)
    }

    /// Write a value node and schedule propagation to its consumers.
    pub fn set_value(&self, id: NodeId, value: NodeValue) -> Result<()> {
        self.write_value(id, value)
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Bind events of `kind` from `target` to the event node `node`.
    pub fn attach_event(&self, target: ViewTag, kind: &str, node: NodeId) -> Result<()> {
        self.inner
            .router
            .attach(&self.inner.registry, EventKey::new(target, kind), node)
    }

    /// Remove the binding for `(target, kind)`. No-op if absent.
    pub fn detach_event(&self, target: ViewTag, kind: &str) {
        self.inner.router.detach(&EventKey::new(target, kind));
    }

    /// Queue an event for the next tick.
    ///
    /// Returns false, with no other effect, if nothing is bound to the
    /// event's target and kind.
    pub fn dispatch(&self, event: Event) -> bool {
        if self.inner.scheduler.is_stopped() {
            return false;
        }
        if !self.inner.router.enqueue(event) {
            return false;
        }
        self.inner.scheduler.activate();
        true
    }

    /// Deliver one queued event to its node. Stale bindings are skipped.
    fn process_queued(&self, event: &Event) -> Result<()> {
        let Some(node_id) = self.inner.router.binding(&event.key()) else {
            tracing::trace!(view = %event.target, kind = %event.kind, "binding removed before delivery");
            return Ok(());
        };
        let Some(node) = self.inner.registry.find_node(node_id) else {
            tracing::trace!(node = %node_id, "event node dropped before delivery");
            return Ok(());
        };
        node.process_event(&event.payload, self)
    }

    /// Number of events waiting for the next tick.
    pub fn pending_events(&self) -> usize {
        self.inner.router.queued_len()
    }

    // ------------------------------------------------------------------------
    // Callbacks and scheduling
    // ------------------------------------------------------------------------

    /// Run `callback` on the next tick.
    ///
    /// Does not wake the scheduler. From inside a tick the pending callback
    /// keeps ticks coming; from outside, follow with
    /// [`request_frames`](Self::request_frames).
    pub fn post_this_frame<F>(&self, callback: F)
    where
        F: FnOnce(&FrameContext) + Send + 'static,
    {
        self.inner.scheduler.post_this_frame(Box::new(callback));
    }

    /// Run `callback` at the end of the current tick, or of the next one when
    /// idle. Wakes the scheduler.
    pub fn post_after_frame<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.scheduler.post_after_frame(Box::new(callback));
    }

    /// Make sure ticks are being delivered.
    pub fn request_frames(&self) -> Result<()> {
        if self.inner.scheduler.activate() {
            Ok(())
        } else {
            Err(GraphError::Invalidated)
        }
    }

    /// Current scheduler state.
    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.scheduler.state()
    }

    /// Number of ticks processed.
    pub fn frame_count(&self) -> u64 {
        self.inner.scheduler.frame_count()
    }

    /// Callbacks waiting for the next tick.
    pub fn pending_this_frame(&self) -> usize {
        self.inner.scheduler.pending_this_frame()
    }

    /// After-frame callbacks not yet run.
    pub fn pending_after_frame(&self) -> usize {
        self.inner.scheduler.pending_after_frame()
    }

    /// Process one tick. Called by the frame source.
    pub fn on_animation_frame(&self, timestamp_ms: f64) {
        let scheduler = &self.inner.scheduler;
        if scheduler.is_stopped() {
            return;
        }
        let context = scheduler.begin_frame(timestamp_ms);
        let _span = tracing::trace_span!("frame", frame = context.frame).entered();

        // Only events queued before the drain starts
        let mut events = self.inner.router.take_queued().into_iter();
        while !scheduler.is_stopped() {
            let Some(event) = events.next() else {
                break;
            };
            run_isolated("event delivery", || {
                if let Err(err) = self.process_queued(&event) {
                    tracing::warn!(view = %event.target, kind = %event.kind, error = %err, "event processing failed");
                }
            });
        }
        if events.len() > 0 {
            tracing::debug!(dropped = events.len(), "discarded events after invalidation");
        }

        scheduler.run_this_frame(&context);
        if !scheduler.is_stopped() {
            scheduler.run_after_frame();
        }

        // Events dispatched during this tick still need a frame
        let state = scheduler.finish_frame(|| self.inner.router.queued_len() > 0);
        tracing::trace!(?state, "frame done");
    }

    /// Tear the engine down. Ticks stop for good, and queued callbacks and
    /// events are dropped without running.
    pub fn invalidate(&self) {
        self.inner.scheduler.invalidate();
        self.inner.router.clear_queue();
        self.inner.updates.lock().updated.clear();
        self.inner.scheduled_clocks.lock().clear();
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Apply one command.
    pub fn apply(&self, command: Command) -> Result<()> {
        match command {
            Command::CreateNode { id, kind, config } => self.create_node(id, &kind, &config),
            Command::DropNode { id } => {
                self.drop_node(id);
                Ok(())
            }
            Command::Connect { parent, child } => self.connect(parent, child),
            Command::Disconnect { parent, child } => {
                self.disconnect(parent, child);
                Ok(())
            }
            Command::ConnectNodeToOutput { id, view } => self.connect_node_to_output(id, view),
            Command::DisconnectNodeFromOutput { id, view } => {
                self.disconnect_node_from_output(id, view)
            }
            Command::AttachEvent { target, kind, node } => self.attach_event(target, &kind, node),
            Command::DetachEvent { target, kind, node } => {
                let removed = self.inner.router.detach(&EventKey::new(target, kind));
                if removed.is_some_and(|bound| bound != node) {
                    tracing::debug!(node = %node, "detached a binding that pointed at another node");
                }
                Ok(())
            }
            Command::SetValue { id, value } => self.set_value(id, value),
        }
    }

    /// Apply commands in order. A failing command does not stop the rest;
    /// failures are returned with their position.
    pub fn apply_all(
        &self,
        commands: impl IntoIterator<Item = Command>,
    ) -> Vec<(usize, GraphError)> {
        commands
            .into_iter()
            .enumerate()
            .filter_map(|(index, command)| self.apply(command).err().map(|err| (index, err)))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Update propagation
    // ------------------------------------------------------------------------

    fn begin_pass(&self) -> u64 {
        let mut updates = self.inner.updates.lock();
        updates.loop_id += 1;
        updates.loop_id
    }

    fn evaluate_node(&self, id: NodeId) -> Result<NodeValue> {
        self.inner.registry.resolve(id)?.value(self)
    }

    fn write_value(&self, id: NodeId, value: NodeValue) -> Result<()> {
        self.inner.registry.resolve(id)?.store(value)?;
        self.mark_updated(id);
        Ok(())
    }

    fn mark_updated(&self, id: NodeId) {
        let first = {
            let mut updates = self.inner.updates.lock();
            updates.updated.push(id);
            !std::mem::replace(&mut updates.flush_posted, true)
        };
        if first {
            let weak = self.downgrade();
            self.post_after_frame(move || {
                if let Some(manager) = Self::upgrade(&weak) {
                    manager.run_prop_updates();
                }
            });
        }
    }

    /// Evaluate every final node reachable from the updated nodes.
    ///
    /// Nodes marked while this runs are picked up by the same pass.
    fn run_prop_updates(&self) {
        self.begin_pass();
        let mut visited = HashSet::new();
        let mut index = 0;
        let mut evaluated = 0usize;

        loop {
            let next = self.inner.updates.lock().updated.get(index).copied();
            let Some(updated) = next else {
                break;
            };
            index += 1;

            for node in self.inner.registry.collect_final_nodes(updated, &mut visited) {
                evaluated += 1;
                run_isolated("final node evaluation", || {
                    if let Err(err) = node.value(self) {
                        tracing::warn!(node = %node.id(), error = %err, "final node evaluation failed");
                    }
                });
            }
        }

        {
            let mut updates = self.inner.updates.lock();
            updates.updated.clear();
            updates.flush_posted = false;
        }
        tracing::trace!(updated = index, evaluated, "ran prop updates");
    }

    fn schedule_clock_frame(&self, id: NodeId) {
        let weak = self.downgrade();
        self.post_this_frame(move |_| {
            if let Some(manager) = Self::upgrade(&weak) {
                manager.clock_frame(id);
            }
        });
    }

    /// A running clock reached a new frame: propagate and keep ticking.
    ///
    /// At most one of these is queued per clock; a stopped clock releases
    /// its slot here.
    fn clock_frame(&self, id: NodeId) {
        match self.inner.registry.find_node(id) {
            Some(clock) if clock.is_running() => {
                self.mark_updated(id);
                self.schedule_clock_frame(id);
            }
            _ => {
                self.inner.scheduled_clocks.lock().remove(&id);
                tracing::trace!(node = %id, "clock stopped");
            }
        }
    }

    fn resolve_clock(&self, id: NodeId) -> Result<Arc<Node>> {
        let node = self.inner.registry.resolve(id)?;
        if *node.kind() != NodeKind::Clock {
            return Err(GraphError::InvalidNodeType {
                id,
                expected: "clock",
            });
        }
        Ok(node)
    }
}

impl GraphContext for NodesManager {
    fn loop_id(&self) -> u64 {
        self.inner.updates.lock().loop_id
    }

    fn max_depth(&self) -> usize {
        self.inner.config.max_evaluation_depth
    }

    fn frame_time_ms(&self) -> f64 {
        self.inner.scheduler.frame_time_ms()
    }

    fn evaluate(&self, id: NodeId) -> Result<NodeValue> {
        self.evaluate_node(id)
    }

    fn set_value(&self, id: NodeId, value: NodeValue) -> Result<()> {
        self.write_value(id, value)
    }

    fn start_clock(&self, id: NodeId) -> Result<()> {
        let was_running = self.resolve_clock(id)?.set_running(true)?;
        if !was_running {
            tracing::debug!(node = %id, "clock started");
        }
        // A clock stopped earlier this frame still has its callback queued
        let newly_scheduled = self.inner.scheduled_clocks.lock().insert(id);
        if newly_scheduled {
            self.schedule_clock_frame(id);
            self.request_frames()?;
        }
        Ok(())
    }

    fn stop_clock(&self, id: NodeId) -> Result<()> {
        if self.resolve_clock(id)?.set_running(false)? {
            tracing::debug!(node = %id, "clock stopped");
        }
        Ok(())
    }

    fn clock_running(&self, id: NodeId) -> Result<bool> {
        Ok(self.resolve_clock(id)?.is_running())
    }

    fn update_props(&self, view: ViewTag, props: &IndexMap<String, NodeValue>) {
        self.inner.bridge.update_props(view, props);
    }

    fn call_host(&self, node: NodeId, args: &[NodeValue]) {
        self.inner.bridge.call(node, args);
    }
}

impl std::fmt::Debug for NodesManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodesManager")
            .field("nodes", &self.node_count())
            .field("bindings", &self.inner.router.binding_count())
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}
