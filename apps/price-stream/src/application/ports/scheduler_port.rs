//! Scheduler Port (Driven Port)
//!
//! Interface for deferring a single task, used for reconnect timers.

use std::time::Duration;

/// Work run when a timer fires.
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle to one scheduled task.
///
/// Dropping a handle must leave the task scheduled; only [`cancel`] stops it.
///
/// [`cancel`]: TimerHandle::cancel
pub trait TimerHandle: Send {
    /// Prevent the task from running. No-op if it already ran.
    fn cancel(&mut self);
}

/// Port for deferred execution.
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`.
    ///
    /// The task must not run synchronously inside this call.
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> Box<dyn TimerHandle>;
}
