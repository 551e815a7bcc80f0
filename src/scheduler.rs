//! Task scheduling for flush ticks, sends, and retries.
//!
//! Everything the sink runs concurrently goes through [`TaskScheduler`]:
//! immediate tasks (batch sends), delayed tasks (retries), and the
//! long-running flush loop. Stopping the scheduler refuses new work; tasks
//! already accepted (including delayed ones still waiting) run to
//! completion, and [`TaskScheduler::drain`] waits (bounded) for them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{watch, Notify};
use tracing::debug;

use crate::buffer::EventBuffer;
use crate::clock::Clock;
use crate::sink::LifecycleState;

/// Abstraction over delayed wakeups so schedules can be observed in tests.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test sleeper that completes immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

/// Test sleeper that records every requested delay and completes
/// immediately.
#[derive(Debug, Default, Clone)]
pub struct TrackingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.delays.lock().unwrap().push(duration);
        Box::pin(async {})
    }
}

#[derive(Debug, Default)]
struct TaskTracker {
    active: AtomicUsize,
    idle: Notify,
}

impl TaskTracker {
    fn finish(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Shared facility for the sink's concurrent work.
///
/// Bound to the tokio runtime it was created on; producer threads outside
/// the runtime can still hand it work.
#[derive(Debug)]
pub struct TaskScheduler {
    handle: tokio::runtime::Handle,
    sleeper: Arc<dyn Sleeper>,
    stopped: AtomicBool,
    tracker: Arc<TaskTracker>,
}

impl TaskScheduler {
    /// Create a scheduler bound to the current tokio runtime.
    ///
    /// Panics outside a runtime context.
    pub fn new(sleeper: Arc<dyn Sleeper>) -> Arc<Self> {
        Arc::new(Self {
            handle: tokio::runtime::Handle::current(),
            sleeper,
            stopped: AtomicBool::new(false),
            tracker: Arc::new(TaskTracker::default()),
        })
    }

    /// Run `task` as soon as the runtime picks it up. Returns `false` (and
    /// drops the task) once the scheduler is stopped.
    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            debug!("scheduler stopped; dropping task");
            return false;
        }
        self.tracker.active.fetch_add(1, Ordering::AcqRel);
        let tracker = Arc::clone(&self.tracker);
        self.handle.spawn(async move {
            task.await;
            tracker.finish();
        });
        true
    }

    /// Run `task` at or after `delay`. Once accepted, the task fires even
    /// if the scheduler is stopped in the meantime.
    pub fn spawn_after<F>(&self, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            debug!(delay = ?delay, "scheduler stopped; dropping delayed task");
            return false;
        }
        let sleep = self.sleeper.sleep(delay);
        self.spawn(async move {
            sleep.await;
            task.await;
        })
    }

    /// Stop accepting new tasks. In-flight tasks are unaffected.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Tasks currently running or waiting out a delay.
    pub fn active_tasks(&self) -> usize {
        self.tracker.active.load(Ordering::Acquire)
    }

    /// Wait for in-flight tasks to finish, bounded by `timeout`. Returns
    /// `true` if the scheduler fully drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.tracker.active.load(Ordering::Acquire) == 0 {
                return true;
            }
            let notified = self.tracker.idle.notified();
            if self.tracker.active.load(Ordering::Acquire) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.tracker.active.load(Ordering::Acquire) == 0;
            }
        }
    }
}

/// Periodic flush driver.
///
/// Guarantees the buffer is flushed within one `max_age` interval of the
/// previous flush, whoever triggered it. Each wakeup recomputes its delay
/// from the buffer's actual last-flush time, so a late tick shortens the
/// next wait instead of shifting the whole cadence.
#[derive(Debug)]
pub struct FlushScheduler {
    buffer: Arc<EventBuffer>,
    max_age: Duration,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl FlushScheduler {
    pub fn new(
        buffer: Arc<EventBuffer>,
        max_age: Duration,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self { buffer, max_age, clock, sleeper }
    }

    /// Drive flushes until the lifecycle leaves `Running`.
    pub async fn run(self, mut lifecycle: watch::Receiver<LifecycleState>) {
        let mut delay = self.max_age;
        loop {
            tokio::select! {
                _ = self.sleeper.sleep(delay) => {
                    delay = self.tick();
                }
                changed = lifecycle.changed() => {
                    if changed.is_err() || *lifecycle.borrow() != LifecycleState::Running {
                        break;
                    }
                }
            }
        }
        debug!("flush scheduler stopped");
    }

    /// Flush if the buffer is due, then return the time until the next
    /// tick.
    fn tick(&self) -> Duration {
        let now = self.clock.now_millis();
        let last = self.buffer.last_flush_millis();
        let elapsed = now.saturating_sub(last);
        let max_age_ms = as_millis_saturated(self.max_age);
        if elapsed >= max_age_ms {
            debug!(elapsed_ms = elapsed, "time-triggered flush");
            self.buffer.flush();
            self.max_age
        } else {
            Duration::from_millis(max_age_ms - elapsed)
        }
    }
}

fn as_millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
