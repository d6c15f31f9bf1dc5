//! Integration Tests for the Frame Engine
//!
//! These tests drive a `NodesManager` through a manual frame source and check
//! what the host bridge receives, tick by tick.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence_core::{
    Command, EngineConfig, Event, FrameSource, GraphError, IntervalFrameSource, ManualFrameSource,
    NodeId, NodeValue, NodesManager, RecordingBridge, SchedulerState, ViewTag,
};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};

fn engine() -> (NodesManager, Arc<ManualFrameSource>, Arc<RecordingBridge>) {
    let source = Arc::new(ManualFrameSource::new());
    let bridge = Arc::new(RecordingBridge::new());
    let manager = NodesManager::new(source.clone(), bridge.clone());
    (manager, source, bridge)
}

fn id(raw: u64) -> NodeId {
    NodeId::from(raw)
}

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (count.clone(), count)
}

/// Builds `value(1) -> props(2) -> view 10`, plus an event tap on view 5.
fn scroll_graph(manager: &NodesManager) {
    manager
        .create_node(id(1), "value", &json!({"value": 0}))
        .unwrap();
    manager
        .create_node(id(2), "props", &json!({"props": ["offset"]}))
        .unwrap();
    manager
        .create_node(
            id(3),
            "event",
            &json!({"mapping": [["/contentOffset/y", 1]]}),
        )
        .unwrap();
    manager.connect(id(2), id(1)).unwrap();
    manager.connect_node_to_output(id(2), ViewTag(10)).unwrap();
    manager.attach_event(ViewTag(5), "onScroll", id(3)).unwrap();
}

/// Building a graph with no events leaves the engine idle.
#[test]
fn building_a_graph_does_not_start_frames() {
    let (manager, source, bridge) = engine();

    manager.create_node(id(1), "value", &Json::Null).unwrap();
    manager
        .create_node(id(2), "props", &json!({"props": ["opacity"]}))
        .unwrap();
    manager.connect(id(2), id(1)).unwrap();
    manager.connect_node_to_output(id(2), ViewTag(10)).unwrap();

    assert_eq!(manager.scheduler_state(), SchedulerState::Idle);
    assert!(!source.is_running());
    assert!(!source.fire(0.0));
    assert_eq!(bridge.update_count(), 0);
}

/// An after-frame post wakes the scheduler, runs once, and lets it idle.
#[test]
fn after_frame_post_runs_once_then_idles() {
    let (manager, source, _bridge) = engine();
    let (count, count_clone) = counter();

    manager.post_after_frame(move || {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(manager.scheduler_state(), SchedulerState::Active);

    source.fire(16.0);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(manager.scheduler_state(), SchedulerState::Idle);

    // Nothing left to run
    assert!(!source.fire(32.0));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

fn repost(manager: NodesManager, count: Arc<AtomicUsize>) {
    let next = manager.clone();
    manager.post_this_frame(move |_| {
        count.fetch_add(1, Ordering::SeqCst);
        repost(next, count);
    });
}

/// A this-frame callback that re-posts itself runs once per tick.
#[test]
fn self_reposting_callback_runs_once_per_tick() {
    let (manager, source, _bridge) = engine();
    let (count, count_clone) = counter();

    repost(manager.clone(), count_clone);
    // This-frame posts need an explicit wake-up
    assert_eq!(manager.scheduler_state(), SchedulerState::Idle);
    manager.request_frames().unwrap();

    for frame in 1..=5 {
        source.fire(frame as f64 * 16.0);
        assert_eq!(count.load(Ordering::SeqCst), frame);
        assert_eq!(manager.pending_this_frame(), 1);
    }
    assert_eq!(manager.scheduler_state(), SchedulerState::Active);

    // Breaks the callback's hold on the manager
    manager.invalidate();
    assert!(!source.fire(96.0));
    assert_eq!(count.load(Ordering::SeqCst), 5);
}

/// After-frame callbacks posted during the after-frame phase run in the same tick.
#[test]
fn nested_after_frame_runs_in_same_tick() {
    let (manager, source, _bridge) = engine();
    let order = Arc::new(Mutex::new(Vec::new()));

    let inner = manager.clone();
    let order_a = order.clone();
    manager.post_after_frame(move || {
        order_a.lock().push("a");
        let order_b = order_a.clone();
        inner.post_after_frame(move || order_b.lock().push("b"));
    });

    source.fire(16.0);

    assert_eq!(*order.lock(), vec!["a", "b"]);
    assert_eq!(manager.pending_after_frame(), 0);
    assert_eq!(manager.scheduler_state(), SchedulerState::Idle);
}

/// This-frame callbacks run before after-frame callbacks within a tick.
#[test]
fn this_frame_runs_before_after_frame() {
    let (manager, source, _bridge) = engine();
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_after = order.clone();
    manager.post_after_frame(move || order_after.lock().push("after"));
    let order_this = order.clone();
    manager.post_this_frame(move |context| {
        assert_eq!(context.timestamp_ms, 16.0);
        order_this.lock().push("this");
    });

    source.fire(16.0);

    assert_eq!(*order.lock(), vec!["this", "after"]);
}

/// An event flows through its mapping into a value and out to the view in one tick.
#[test]
fn event_updates_view_in_same_tick() {
    let (manager, source, bridge) = engine();
    scroll_graph(&manager);

    assert!(manager.dispatch(Event::new(
        5,
        "onScroll",
        json!({"contentOffset": {"y": 42}})
    )));
    assert_eq!(manager.pending_events(), 1);
    assert_eq!(manager.scheduler_state(), SchedulerState::Active);

    source.fire(16.0);

    let updates = bridge.take_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].view, ViewTag(10));
    assert_eq!(updates[0].props["offset"], NodeValue::Number(42.0));
    assert_eq!(manager.pending_events(), 0);
    assert_eq!(manager.scheduler_state(), SchedulerState::Idle);
}

/// Events are delivered in arrival order; the last write wins.
#[test]
fn events_are_delivered_in_order() {
    let (manager, source, bridge) = engine();
    scroll_graph(&manager);

    for y in [1, 2, 3] {
        manager.dispatch(Event::new(
            5,
            "onScroll",
            json!({"contentOffset": {"y": y}}),
        ));
    }
    source.fire(16.0);

    let updates = bridge.take_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].props["offset"], NodeValue::Number(3.0));
}

/// Events dispatched during a tick wait for the next one.
#[test]
fn event_dispatched_mid_tick_waits_for_next_tick() {
    let (manager, source, bridge) = engine();
    scroll_graph(&manager);

    let inner = manager.clone();
    manager.post_this_frame(move |_| {
        inner.dispatch(Event::new(
            5,
            "onScroll",
            json!({"contentOffset": {"y": 7}}),
        ));
    });
    manager.request_frames().unwrap();

    source.fire(16.0);
    assert_eq!(bridge.update_count(), 0);
    assert_eq!(manager.pending_events(), 1);
    // The queued event keeps frames coming
    assert_eq!(manager.scheduler_state(), SchedulerState::Active);

    source.fire(32.0);
    let updates = bridge.take_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].props["offset"], NodeValue::Number(7.0));
    assert_eq!(manager.scheduler_state(), SchedulerState::Idle);
}

/// Dispatching an unbound event has no effect at all.
#[test]
fn unbound_dispatch_is_noop() {
    let (manager, source, _bridge) = engine();
    scroll_graph(&manager);

    assert!(!manager.dispatch(Event::new(5, "onPress", Json::Null)));
    assert!(!manager.dispatch(Event::new(6, "onScroll", Json::Null)));

    assert_eq!(manager.pending_events(), 0);
    assert_eq!(manager.scheduler_state(), SchedulerState::Idle);
    assert!(!source.is_running());
}

/// A second binding for the same key fails and the first stays in place.
#[test]
fn duplicate_binding_keeps_first() {
    let (manager, source, _bridge) = engine();
    scroll_graph(&manager);
    manager.create_node(id(4), "value", &Json::Null).unwrap();
    manager
        .create_node(
            id(5),
            "event",
            &json!({"mapping": [["/contentOffset/y", 4]]}),
        )
        .unwrap();

    let err = manager
        .attach_event(ViewTag(5), "onScroll", id(5))
        .unwrap_err();
    assert!(matches!(err, GraphError::DuplicateBinding { .. }));

    manager.dispatch(Event::new(
        5,
        "onScroll",
        json!({"contentOffset": {"y": 9}}),
    ));
    source.fire(16.0);

    // Routed through the first binding only
    assert_eq!(manager.get_value(id(1)).unwrap(), NodeValue::Number(9.0));
    assert_eq!(manager.get_value(id(4)).unwrap(), NodeValue::Null);
}

/// Detaching twice is safe, and detached bindings no longer route.
#[test]
fn detach_twice_is_safe() {
    let (manager, _source, _bridge) = engine();
    scroll_graph(&manager);

    manager.detach_event(ViewTag(5), "onScroll");
    manager.detach_event(ViewTag(5), "onScroll");

    assert!(!manager.dispatch(Event::new(5, "onScroll", Json::Null)));
}

/// A binding removed after dispatch but before the tick is skipped quietly.
#[test]
fn binding_removed_before_delivery_is_skipped() {
    let (manager, source, bridge) = engine();
    scroll_graph(&manager);

    manager.dispatch(Event::new(
        5,
        "onScroll",
        json!({"contentOffset": {"y": 3}}),
    ));
    manager.detach_event(ViewTag(5), "onScroll");
    source.fire(16.0);

    assert_eq!(bridge.update_count(), 0);
    assert_eq!(manager.get_value(id(1)).unwrap(), NodeValue::Number(0.0));
}

/// Dropping a node leaves dangling references in its parents.
#[test]
fn dropped_child_is_reported_by_parent() {
    let (manager, _source, _bridge) = engine();
    manager
        .create_node(id(1), "value", &json!({"value": 2}))
        .unwrap();
    manager
        .create_node(id(2), "op", &json!({"op": "add"}))
        .unwrap();
    manager.connect(id(2), id(1)).unwrap();

    manager.drop_node(id(1));

    assert!(manager.find_node(id(1)).is_none());
    assert_eq!(
        manager.find_node(id(2)).unwrap().children().to_vec(),
        vec![id(1)]
    );
    assert!(
        matches!(manager.get_value(id(2)), Err(GraphError::UnknownNode(missing)) if missing == id(1))
    );

    // Dropping again is a no-op
    manager.drop_node(id(1));
}

/// Unknown kinds are rejected and nothing is registered.
#[test]
fn unsupported_kind_is_rejected() {
    let (manager, _source, _bridge) = engine();

    let err = manager
        .create_node(id(1), "spring", &Json::Null)
        .unwrap_err();

    assert!(matches!(err, GraphError::UnsupportedKind(ref kind) if kind == "spring"));
    assert_eq!(manager.node_count(), 0);
}

/// A clock, eased through a bezier, drives a view every tick while running.
#[test]
fn clock_drives_eased_props() {
    let (manager, source, bridge) = engine();
    manager.create_node(id(1), "clock", &Json::Null).unwrap();
    manager
        .create_node(id(2), "value", &json!({"value": 1000}))
        .unwrap();
    manager
        .create_node(id(3), "op", &json!({"op": "divide"}))
        .unwrap();
    manager
        .create_node(
            id(4),
            "bezier",
            &json!({"x1": 0.0, "y1": 0.0, "x2": 1.0, "y2": 1.0}),
        )
        .unwrap();
    manager
        .create_node(id(5), "props", &json!({"props": ["progress"]}))
        .unwrap();
    manager
        .create_node(id(6), "clockStart", &Json::Null)
        .unwrap();
    manager.connect(id(3), id(1)).unwrap();
    manager.connect(id(3), id(2)).unwrap();
    manager.connect(id(4), id(3)).unwrap();
    manager.connect(id(5), id(4)).unwrap();
    manager.connect(id(6), id(1)).unwrap();
    manager.connect_node_to_output(id(5), ViewTag(1)).unwrap();

    manager.get_value(id(6)).unwrap();
    source.fire(250.0);
    source.fire(500.0);
    source.fire(2000.0);

    let progress: Vec<f64> = bridge
        .take_updates()
        .iter()
        .map(|update| update.props["progress"].as_f64())
        .collect();
    assert_eq!(progress.len(), 3);
    assert!((progress[0] - 0.25).abs() < 1e-3);
    assert!((progress[1] - 0.5).abs() < 1e-3);
    // Bezier input clamps at 1
    assert!((progress[2] - 1.0).abs() < 1e-6);
    assert_eq!(manager.frame_count(), 3);
}

/// A panicking callback is logged and the rest of the tick still runs.
#[test]
fn panicking_callback_does_not_abort_tick() {
    let (manager, source, _bridge) = engine();
    let (count, count_clone) = counter();

    manager.post_after_frame(|| panic!("callback failed"));
    manager.post_after_frame(move || {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });

    source.fire(16.0);

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(manager.scheduler_state(), SchedulerState::Idle);
}

/// Invalidation drops queued work and nothing revives the engine.
#[test]
fn invalidate_is_terminal() {
    let (manager, source, bridge) = engine();
    scroll_graph(&manager);
    let (count, count_clone) = counter();

    let count_after = count_clone.clone();
    manager.post_after_frame(move || {
        count_after.fetch_add(1, Ordering::SeqCst);
    });
    manager.post_this_frame(move |_| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });
    manager.dispatch(Event::new(
        5,
        "onScroll",
        json!({"contentOffset": {"y": 1}}),
    ));

    manager.invalidate();

    assert_eq!(manager.scheduler_state(), SchedulerState::Stopped);
    assert!(!source.is_running());
    assert_eq!(manager.pending_events(), 0);
    assert_eq!(manager.pending_this_frame(), 0);
    assert_eq!(manager.pending_after_frame(), 0);

    // Later posts and dispatches are discarded
    assert!(!manager.dispatch(Event::new(5, "onScroll", Json::Null)));
    manager.post_after_frame(|| panic!("must not run"));
    assert!(matches!(
        manager.request_frames(),
        Err(GraphError::Invalidated)
    ));

    // Even a tick delivered by hand does nothing
    manager.on_animation_frame(16.0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(bridge.update_count(), 0);
    assert_eq!(manager.frame_count(), 0);

    // Idempotent
    manager.invalidate();
}

/// Invalidating from inside a tick drops the rest of that tick's work.
#[test]
fn invalidate_mid_tick_stops_remaining_work() {
    let (manager, source, bridge) = engine();
    scroll_graph(&manager);
    let (count, count_clone) = counter();

    let inner = manager.clone();
    manager.post_this_frame(move |_| inner.invalidate());
    let count_this = count_clone.clone();
    manager.post_this_frame(move |_| {
        count_this.fetch_add(1, Ordering::SeqCst);
    });
    manager.post_after_frame(move || {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });
    manager.request_frames().unwrap();

    source.fire(16.0);

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(manager.scheduler_state(), SchedulerState::Stopped);
    assert!(!source.is_running());
    assert_eq!(bridge.update_count(), 0);
}

/// Posts from another thread while ticks run are never stranded.
#[test]
fn posts_from_another_thread_are_not_lost() {
    const POSTS: usize = 2000;
    let (manager, source, _bridge) = engine();
    let (count, count_clone) = counter();
    let done = std::sync::atomic::AtomicBool::new(false);

    std::thread::scope(|scope| {
        let poster = manager.clone();
        let done = &done;
        scope.spawn(move || {
            for _ in 0..POSTS {
                let count = count_clone.clone();
                poster.post_after_frame(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            }
            done.store(true, Ordering::SeqCst);
        });

        let mut t = 0.0;
        while !done.load(Ordering::SeqCst) {
            t += 16.0;
            source.fire(t);
        }
    });

    // Anything still queued must have kept the source running
    let mut t = 1.0e9;
    while source.fire(t) {
        t += 16.0;
    }
    assert_eq!(count.load(Ordering::SeqCst), POSTS);
    assert_eq!(manager.pending_after_frame(), 0);
    assert_eq!(manager.scheduler_state(), SchedulerState::Idle);
}

/// A cyclic graph hits the configured depth limit instead of overflowing.
#[test]
fn cycle_hits_depth_limit() {
    let source = Arc::new(ManualFrameSource::new());
    let config = EngineConfig {
        max_evaluation_depth: 8,
        ..EngineConfig::default()
    };
    let manager = NodesManager::with_config(config, source, Arc::new(RecordingBridge::new()));
    manager.create_node(id(1), "block", &Json::Null).unwrap();
    manager.create_node(id(2), "block", &Json::Null).unwrap();
    manager.connect(id(1), id(2)).unwrap();
    manager.connect(id(2), id(1)).unwrap();

    let err = manager.get_value(id(1)).unwrap_err();

    assert!(matches!(
        err,
        GraphError::EvaluationDepthExceeded { depth: 8, .. }
    ));
}

/// A command list decoded from JSON builds a working graph.
#[test]
fn commands_build_a_working_graph() {
    let (manager, source, bridge) = engine();
    let commands: Vec<Command> = serde_json::from_value(json!([
        {"op": "createNode", "id": 1, "kind": "value", "config": {"value": 0}},
        {"op": "createNode", "id": 2, "kind": "props", "config": {"props": ["scale"]}},
        {"op": "createNode", "id": 3, "kind": "event", "config": {"mapping": [["/scale", 1]]}},
        {"op": "connect", "parent": 2, "child": 1},
        {"op": "connectNodeToOutput", "id": 2, "view": 10},
        {"op": "attachEvent", "target": 10, "kind": "onPinch", "node": 3},
        {"op": "attachEvent", "target": 10, "kind": "onPinch", "node": 3}
    ]))
    .unwrap();

    let failures = manager.apply_all(commands);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, 6);

    manager.dispatch(Event::new(10, "onPinch", json!({"scale": 1.5})));
    source.fire(16.0);
    assert_eq!(
        bridge.take_updates()[0].props["scale"],
        NodeValue::Number(1.5)
    );

    manager
        .apply(Command::SetValue {
            id: id(1),
            value: NodeValue::Number(2.0),
        })
        .unwrap();
    manager
        .apply(Command::DetachEvent {
            target: ViewTag(10),
            kind: "onPinch".into(),
            node: id(3),
        })
        .unwrap();
    source.fire(32.0);

    assert_eq!(
        bridge.take_updates()[0].props["scale"],
        NodeValue::Number(2.0)
    );
    assert!(!manager.dispatch(Event::new(10, "onPinch", json!({"scale": 3}))));
}

/// The interval source drives ticks on a tokio runtime and stops when idle.
#[tokio::test(start_paused = true)]
async fn interval_source_drives_updates() {
    let config = EngineConfig::from_json(r#"{"frameIntervalMs": 16}"#).unwrap();
    let source = Arc::new(IntervalFrameSource::try_current(config.frame_interval()).unwrap());
    let bridge = Arc::new(RecordingBridge::new());
    let manager = NodesManager::with_config(config, source.clone(), bridge.clone());
    manager.create_node(id(1), "value", &Json::Null).unwrap();
    manager
        .create_node(id(2), "props", &json!({"props": ["x"]}))
        .unwrap();
    manager.connect(id(2), id(1)).unwrap();
    manager.connect_node_to_output(id(2), ViewTag(3)).unwrap();

    manager.set_value(id(1), NodeValue::Number(12.0)).unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    let updates = bridge.take_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].props["x"], NodeValue::Number(12.0));
    assert_eq!(manager.scheduler_state(), SchedulerState::Idle);
    assert!(!source.is_running());
}
