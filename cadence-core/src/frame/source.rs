//! Frame Sources
//!
//! A frame source is the platform's refresh signal: once started it calls
//! its handler once per display frame, with a monotonically increasing
//! timestamp, until stopped. Ticks never overlap; the next one is only
//! delivered after the handler returns.
//!
//! Two sources ship with the crate:
//!
//! - [`ManualFrameSource`] fires only when told to. Hosts with their own
//!   display link forward it here, and tests drive frames deterministically.
//! - [`IntervalFrameSource`] ticks on a tokio interval.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Callback invoked once per frame with the timestamp in milliseconds.
pub type FrameHandler = Arc<dyn Fn(f64) + Send + Sync>;

/// The refresh signal driving a scheduler.
///
/// Both methods may be called from inside the handler. Neither may call the
/// handler itself: the scheduler holds its state lock across them.
pub trait FrameSource: Send + Sync {
    /// Begin delivering frames to `handler`. A running source keeps its
    /// current handler.
    fn start(&self, handler: FrameHandler);

    /// Stop delivering frames.
    fn stop(&self);

    /// Whether the source is currently delivering frames.
    fn is_running(&self) -> bool;
}

/// A source that ticks only when [`fire`](Self::fire) is called.
#[derive(Default)]
pub struct ManualFrameSource {
    handler: Mutex<Option<FrameHandler>>,
}

impl ManualFrameSource {
    /// Create a stopped source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one frame if the source is running. Returns whether a frame
    /// was delivered.
    pub fn fire(&self, timestamp_ms: f64) -> bool {
        // Clone out so the handler can stop (or restart) the source
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(timestamp_ms);
                true
            }
            None => false,
        }
    }
}

impl FrameSource for ManualFrameSource {
    fn start(&self, handler: FrameHandler) {
        self.handler.lock().get_or_insert(handler);
    }

    fn stop(&self) {
        self.handler.lock().take();
    }

    fn is_running(&self) -> bool {
        self.handler.lock().is_some()
    }
}

impl std::fmt::Debug for ManualFrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualFrameSource")
            .field("running", &self.is_running())
            .finish()
    }
}

/// A source driven by a tokio interval.
///
/// Missed ticks are skipped rather than bursted, like a display link that
/// drops frames under load.
#[derive(Debug)]
pub struct IntervalFrameSource {
    handle: Handle,
    period: Duration,
    origin: Instant,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalFrameSource {
    /// Create a source that spawns onto `handle`.
    pub fn new(handle: Handle, period: Duration) -> Self {
        Self {
            handle,
            period,
            origin: Instant::now(),
            task: Mutex::new(None),
        }
    }

    /// Create a source on the current tokio runtime, if there is one.
    pub fn try_current(period: Duration) -> Option<Self> {
        Handle::try_current().ok().map(|handle| Self::new(handle, period))
    }

    /// The tick period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl FrameSource for IntervalFrameSource {
    fn start(&self, handler: FrameHandler) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let period = self.period;
        let origin = self.origin;
        *task = Some(self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                let now = interval.tick().await;
                handler(now.duration_since(origin).as_secs_f64() * 1000.0);
            }
        }));
        tracing::trace!(period_ms = period.as_secs_f64() * 1000.0, "frame source started");
    }

    fn stop(&self) {
        // Aborting from inside the handler is fine: the task is cancelled at
        // its next await, before another tick is delivered.
        if let Some(task) = self.task.lock().take() {
            task.abort();
            tracing::trace!("frame source stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}

impl Drop for IntervalFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}
