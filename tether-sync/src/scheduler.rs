//! Periodic tasks with self-reported delays and bulk reset.
//!
//! ```text
//!   Idle ──schedule(task, d)──► Pending ──timer──► Running
//!                                  ▲                  │ run().await
//!                                  │   next_delay()>0 │
//!                                  └──────────────────┤
//!                                     next_delay()==0 ▼
//!                                                   Idle
//! ```
//!
//! Each scheduled task is one tokio task looping over sleep → run →
//! next_delay. The scheduler itself knows nothing about what the tasks do.
//! `reset_tasks()` bumps a generation held in a `watch` channel: pending
//! timers wake up and exit, and a task that is mid-run finishes its body but
//! sees the new generation before it could reschedule.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::watch;

type RunFn = Box<dyn FnMut() -> BoxFuture<'static, ()> + Send>;
type DelayFn = Box<dyn Fn(Duration) -> Duration + Send + Sync>;

/// A unit of periodic work.
pub struct ScheduledTask {
    name: String,
    base_period: Duration,
    run: RunFn,
    next_delay: Option<DelayFn>,
}

impl ScheduledTask {
    pub fn new<F, Fut>(name: impl Into<String>, base_period: Duration, mut run: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            base_period,
            run: Box::new(move || run().boxed()),
            next_delay: None,
        }
    }

    /// Compute the delay before the next run from the base period.
    /// Returning zero ends the task.
    pub fn with_delay<D>(mut self, next_delay: D) -> Self
    where
        D: Fn(Duration) -> Duration + Send + Sync + 'static,
    {
        self.next_delay = Some(Box::new(next_delay));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_period(&self) -> Duration {
        self.base_period
    }

    pub fn next_delay(&self) -> Duration {
        match &self.next_delay {
            Some(delay) => delay(self.base_period),
            None => self.base_period,
        }
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("base_period", &self.base_period)
            .finish_non_exhaustive()
    }
}

/// Where a scheduled task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Pending,
    Running,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TaskState::Pending,
            2 => TaskState::Running,
            _ => TaskState::Idle,
        }
    }
}

#[derive(Default)]
struct TaskStatus {
    state: AtomicU8,
    runs: AtomicU64,
}

impl TaskStatus {
    fn set(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Observer for one scheduled task.
#[derive(Clone)]
pub struct TaskHandle {
    name: Arc<str>,
    status: Arc<TaskStatus>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.status.state.load(Ordering::SeqCst))
    }

    /// Completed runs so far.
    pub fn runs(&self) -> u64 {
        self.status.runs.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("runs", &self.runs())
            .finish()
    }
}

/// Cooperative periodic task runner.
///
/// Dropping the scheduler cancels every task it scheduled.
pub struct TaskScheduler {
    generation: watch::Sender<u64>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { generation }
    }

    /// Current timeline; incremented by every reset.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Run `task` after `initial_delay`, then keep rescheduling it with its
    /// own delay until that delay is zero or the scheduler is reset.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, mut task: ScheduledTask, initial_delay: Duration) -> TaskHandle {
        let mut generation = self.generation.subscribe();
        let epoch = *generation.borrow_and_update();
        let status = Arc::new(TaskStatus::default());
        let handle = TaskHandle {
            name: Arc::from(task.name.as_str()),
            status: status.clone(),
        };
        log::debug!("Scheduling task '{}' in {initial_delay:?}", task.name);

        tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                status.set(TaskState::Pending);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = generation.changed() => break,
                }
                if *generation.borrow() != epoch {
                    break;
                }

                status.set(TaskState::Running);
                (task.run)().await;
                status.runs.fetch_add(1, Ordering::SeqCst);

                if *generation.borrow() != epoch {
                    break;
                }
                delay = task.next_delay();
                if delay.is_zero() {
                    log::debug!("Task '{}' finished", task.name);
                    break;
                }
                log::trace!("Task '{}' next run in {delay:?}", task.name);
            }
            status.set(TaskState::Idle);
        });

        handle
    }

    /// Cancel every scheduled task. Safe to call with nothing scheduled.
    pub fn reset_tasks(&self) {
        self.generation.send_modify(|generation| *generation += 1);
        log::debug!("Scheduler reset to generation {}", self.generation());
    }
}
