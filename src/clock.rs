//! Run clock and the shared deadline token.
//!
//! Both workers receive the same `RunToken`. It carries the absolute deadline
//! (as an offset on the run clock) and a cooperative cancellation flag. There
//! is no preemptive stop: a worker only leaves its loop when it observes the
//! deadline, a fatal budget signal, or cancellation at its next poll.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source used by every wait loop.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's epoch.
    fn elapsed(&self) -> Duration;

    /// Block the calling worker for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `Instant` and `thread::sleep`.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock. `sleep` advances time instantly instead of blocking.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Shared deadline + cancellation token for one run.
pub struct RunToken {
    clock: Arc<dyn Clock>,
    deadline: Duration,
    cancelled: AtomicBool,
}

impl RunToken {
    /// Token whose deadline is `max_runtime` from the clock's current time.
    pub fn new(clock: Arc<dyn Clock>, max_runtime: Duration) -> Self {
        let deadline = clock.elapsed() + max_runtime;
        Self {
            clock,
            deadline,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Seconds until the deadline. Negative once the deadline has passed.
    pub fn time_remaining(&self) -> f64 {
        self.deadline.as_secs_f64() - self.clock.elapsed().as_secs_f64()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for at most `duration`, never past the deadline.
    pub fn sleep(&self, duration: Duration) {
        let remaining = self.time_remaining();
        if remaining <= 0.0 {
            return;
        }
        let capped = duration.min(Duration::from_secs_f64(remaining));
        if !capped.is_zero() {
            self.clock.sleep(capped);
        }
    }
}
