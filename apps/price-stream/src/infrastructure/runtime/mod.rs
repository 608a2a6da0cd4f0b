//! Runtime Adapters
//!
//! Production [`Scheduler`] backed by tokio timers and a [`Clock`] reading
//! the system time.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::application::ports::{Clock, ScheduledTask, Scheduler, TimerHandle};

/// Scheduler that runs each task on a tokio runtime after a sleep.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    /// Schedule on the given runtime.
    #[must_use]
    pub const fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Schedule on the runtime of the calling task.
    ///
    /// # Errors
    ///
    /// Returns an error if called outside a tokio runtime.
    pub fn try_current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> Box<dyn TimerHandle> {
        // Deadline is fixed now, not when the task is first polled.
        let deadline = Instant::now().checked_add(delay);
        let handle = self.runtime.spawn(async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
            task();
        });
        Box::new(TokioTimer {
            abort: handle.abort_handle(),
        })
    }
}

/// Pending tokio timer. Dropping it leaves the timer armed.
#[derive(Debug)]
pub struct TokioTimer {
    abort: AbortHandle,
}

impl TimerHandle for TokioTimer {
    fn cancel(&mut self) {
        self.abort.abort();
    }
}

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_requires_runtime() {
        assert!(TokioScheduler::try_current().is_err());
    }

    #[test]
    fn system_clock_tracks_utc_now() {
        let before = Utc::now();
        let now = SystemClock.now();
        assert!(now >= before);
        assert!(now <= Utc::now());
    }
}
