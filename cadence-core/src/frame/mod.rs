//! Frame Scheduling
//!
//! The scheduler owns the subscription to the display refresh signal and the
//! two deferred-work queues that run around each tick.
//!
//! # Tick protocol
//!
//! Every tick runs, in this order:
//!
//! 1. The pending event queue is drained (events queued during the drain
//!    wait for the next tick).
//! 2. The this-frame queue is swapped for an empty one and the taken
//!    callbacks run. Callbacks they post land in the fresh queue and run on
//!    the next tick, so a callback that re-posts itself runs once per frame.
//! 3. The after-frame queue is walked by index, re-reading its length on
//!    every step, so callbacks appended during the walk run in this same
//!    tick. The queue is then cleared.
//! 4. With no this-frame work left, the scheduler goes idle and stops
//!    receiving ticks.
//!
//! Steps 2 and 3 use different queue algorithms.
//!
//! # States
//!
//! `Idle` ⇄ `Active`, and a terminal `Stopped` reached through invalidation.

mod scheduler;
mod source;

pub(crate) use scheduler::run_isolated;
pub use scheduler::{AfterFrameCallback, FrameScheduler, SchedulerState, ThisFrameCallback};
pub use source::{FrameHandler, FrameSource, IntervalFrameSource, ManualFrameSource};

/// Tick information handed to this-frame callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    /// Frame timestamp in milliseconds, as reported by the frame source.
    pub timestamp_ms: f64,
    /// Number of ticks processed before this one.
    pub frame: u64,
}
