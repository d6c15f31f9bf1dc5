//! Frame Scheduler
//!
//! State machine over the frame source subscription, plus the this-frame and
//! after-frame callback queues.
//!
//! The scheduler does not know about events or nodes; the manager drives
//! each tick through [`begin_frame`](FrameScheduler::begin_frame),
//! [`run_this_frame`](FrameScheduler::run_this_frame),
//! [`run_after_frame`](FrameScheduler::run_after_frame) and
//! [`finish_frame`](FrameScheduler::finish_frame).

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use super::source::{FrameHandler, FrameSource};
use super::FrameContext;

/// One-shot callback run on the next tick, with that tick's context.
pub type ThisFrameCallback = Box<dyn FnOnce(&FrameContext) + Send>;

/// One-shot callback run at the end of the current (or next) tick.
pub type AfterFrameCallback = Box<dyn FnOnce() + Send>;

/// Subscription state of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Not receiving ticks.
    Idle,
    /// Subscribed to the frame source.
    Active,
    /// Torn down. Terminal.
    Stopped,
}

/// Timing of the tick in progress (or the last one).
#[derive(Debug, Clone, Copy)]
struct FrameClock {
    timestamp_ms: f64,
    frames: u64,
}

/// Owns the frame subscription and the callback queues.
pub struct FrameScheduler {
    state: Mutex<SchedulerState>,
    source: Arc<dyn FrameSource>,
    handler: FrameHandler,
    clock: Mutex<FrameClock>,
    this_frame: Mutex<Vec<ThisFrameCallback>>,
    /// Slots are emptied as callbacks run; the whole vector is cleared when
    /// the after-frame phase ends.
    after_frame: Mutex<Vec<Option<AfterFrameCallback>>>,
}

impl FrameScheduler {
    /// Create an idle scheduler that will subscribe `handler` to `source`
    /// when activated.
    pub fn new(source: Arc<dyn FrameSource>, handler: FrameHandler, capacity: usize) -> Self {
        Self {
            state: Mutex::new(SchedulerState::Idle),
            source,
            handler,
            clock: Mutex::new(FrameClock {
                timestamp_ms: 0.0,
                frames: 0,
            }),
            this_frame: Mutex::new(Vec::with_capacity(capacity)),
            after_frame: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Whether the scheduler has been torn down.
    pub fn is_stopped(&self) -> bool {
        self.state() == SchedulerState::Stopped
    }

    /// Subscribe to the frame source if idle.
    ///
    /// Returns false once stopped.
    pub fn activate(&self) -> bool {
        // The subscription changes under the state lock so that state and
        // source never disagree
        let mut state = self.state.lock();
        match *state {
            SchedulerState::Active => true,
            SchedulerState::Stopped => false,
            SchedulerState::Idle => {
                *state = SchedulerState::Active;
                self.source.start(Arc::clone(&self.handler));
                tracing::trace!("scheduler active");
                true
            }
        }
    }

    /// Queue a callback for the next tick.
    ///
    /// This does not activate the scheduler: posting from inside a tick keeps
    /// it active by itself, anyone else must also call
    /// [`activate`](Self::activate).
    pub fn post_this_frame(&self, callback: ThisFrameCallback) {
        if self.is_stopped() {
            tracing::trace!("discarding this-frame callback posted after invalidation");
            return;
        }
        self.this_frame.lock().push(callback);
    }

    /// Queue a callback for the end of the current tick (or the next one
    /// when idle), activating the scheduler.
    pub fn post_after_frame(&self, callback: AfterFrameCallback) {
        if self.is_stopped() {
            tracing::trace!("discarding after-frame callback posted after invalidation");
            return;
        }
        self.after_frame.lock().push(Some(callback));
        self.activate();
    }

    /// Record the start of a tick and build its context.
    pub fn begin_frame(&self, timestamp_ms: f64) -> FrameContext {
        let mut clock = self.clock.lock();
        let context = FrameContext {
            timestamp_ms,
            frame: clock.frames,
        };
        clock.timestamp_ms = timestamp_ms;
        clock.frames += 1;
        context
    }

    /// Timestamp of the tick in progress, or of the last one.
    pub fn frame_time_ms(&self) -> f64 {
        self.clock.lock().timestamp_ms
    }

    /// Number of ticks processed so far.
    pub fn frame_count(&self) -> u64 {
        self.clock.lock().frames
    }

    /// Run the callbacks queued before this call. Anything they post is left
    /// for the next tick.
    ///
    /// If a callback invalidates the scheduler, the rest of the batch is
    /// dropped without running.
    pub fn run_this_frame(&self, context: &FrameContext) {
        let mut callbacks = std::mem::take(&mut *self.this_frame.lock()).into_iter();
        while !self.is_stopped() {
            let Some(callback) = callbacks.next() else {
                break;
            };
            run_isolated("this-frame callback", || callback(context));
        }
        let dropped = callbacks.len();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded this-frame callbacks after invalidation");
        }
    }

    /// Run after-frame callbacks until the queue is exhausted, including ones
    /// appended while it runs, then clear it.
    pub fn run_after_frame(&self) {
        let mut index = 0;
        loop {
            let stopped = self.is_stopped();
            let callback = {
                let mut queue = self.after_frame.lock();
                if stopped || index >= queue.len() {
                    queue.clear();
                    break;
                }
                queue[index].take()
            };
            index += 1;
            if let Some(callback) = callback {
                run_isolated("after-frame callback", callback);
            }
        }
    }

    /// Decide whether to keep receiving ticks.
    ///
    /// Goes idle when the this-frame queue is empty and `other_work_pending`
    /// reports nothing. A post from another thread can land between that
    /// check and the transition while its `activate` still sees `Active`, so
    /// the queues are checked again after `Idle` is published and anything
    /// found there re-activates. State and source subscription change
    /// together under the state lock, so a racing `activate` either sees
    /// `Active` before the stop or restarts the source after it.
    pub fn finish_frame(&self, other_work_pending: impl Fn() -> bool) -> SchedulerState {
        let this_frame_pending = !self.this_frame.lock().is_empty();
        if this_frame_pending || other_work_pending() {
            return self.state();
        }
        {
            let mut state = self.state.lock();
            if *state != SchedulerState::Active {
                return *state;
            }
            *state = SchedulerState::Idle;
            self.source.stop();
        }

        if self.has_queued_callbacks() || other_work_pending() {
            tracing::trace!("work posted while going idle");
            self.activate();
            return self.state();
        }
        tracing::trace!("scheduler idle");
        SchedulerState::Idle
    }

    fn has_queued_callbacks(&self) -> bool {
        !self.this_frame.lock().is_empty() || !self.after_frame.lock().is_empty()
    }

    /// Tear down permanently: unsubscribe and drop every queued callback
    /// without running it.
    pub fn invalidate(&self) {
        {
            let mut state = self.state.lock();
            if *state == SchedulerState::Stopped {
                return;
            }
            *state = SchedulerState::Stopped;
            self.source.stop();
        }

        // Drop outside the locks; callbacks may own arbitrary state
        let this_frame = std::mem::take(&mut *self.this_frame.lock());
        let after_frame = std::mem::take(&mut *self.after_frame.lock());
        tracing::debug!(
            this_frame = this_frame.len(),
            after_frame = after_frame.len(),
            "scheduler invalidated"
        );
        drop(this_frame);
        drop(after_frame);
    }

    /// Number of callbacks waiting for the next tick.
    pub fn pending_this_frame(&self) -> usize {
        self.this_frame.lock().len()
    }

    /// Number of after-frame callbacks not yet run.
    pub fn pending_after_frame(&self) -> usize {
        self.after_frame.lock().iter().filter(|slot| slot.is_some()).count()
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("state", &self.state())
            .field("frames", &self.frame_count())
            .field("pending_this_frame", &self.pending_this_frame())
            .field("pending_after_frame", &self.pending_after_frame())
            .finish()
    }
}

/// Run one unit of tick work; a panic is logged and does not abort the rest
/// of the tick.
pub(crate) fn run_isolated(what: &'static str, work: impl FnOnce()) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(work)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        tracing::error!(what, panic = %message, "tick work panicked");
    }
}
