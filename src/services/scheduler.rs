//! Delayed and repeating tasks on the tokio runtime
//!
//! Each scheduled task is one spawned tokio task that sleeps, runs its
//! action, and (if repeating) sleeps again. Cancelling aborts it. While the
//! scheduler is paused, due runs are skipped rather than queued.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::core::error::{LablabError, Result};

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

#[derive(Clone)]
pub enum TaskAction {
    Sync(Arc<dyn Fn() -> Result<()> + Send + Sync>),
    Async(Arc<dyn Fn() -> TaskFuture + Send + Sync>),
}

impl TaskAction {
    pub fn sync(f: impl Fn() -> Result<()> + Send + Sync + 'static) -> Self {
        TaskAction::Sync(Arc::new(f))
    }

    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        TaskAction::Async(Arc::new(move || Box::pin(f()) as TaskFuture))
    }

    async fn run(&self) -> Result<()> {
        match self {
            TaskAction::Sync(f) => f(),
            TaskAction::Async(f) => f().await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Clone)]
pub struct ScheduledTaskRequest {
    pub name: Option<String>,
    pub delay: Duration,
    /// `Some` makes the task repeat at this period
    pub interval: Option<Duration>,
    pub action: TaskAction,
}

/// Caller-side view of a scheduled task
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: String,
    pub name: Option<String>,
    pub scheduled_at: SystemTime,
    pub interval: Option<Duration>,
    state: Arc<Mutex<TaskStatus>>,
}

#[derive(Debug, Clone, Copy)]
struct TaskStatus {
    state: TaskState,
    last_run: Option<SystemTime>,
    runs: u64,
}

impl ScheduledTask {
    pub fn state(&self) -> TaskState {
        self.state.lock().state
    }

    pub fn is_repeating(&self) -> bool {
        self.interval.is_some()
    }

    pub fn last_run(&self) -> Option<SystemTime> {
        self.state.lock().last_run
    }

    pub fn run_count(&self) -> u64 {
        self.state.lock().runs
    }

    fn set_state(&self, state: TaskState) {
        self.state.lock().state = state;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub active_tasks: usize,
    pub completed_tasks: u64,
    pub cancelled_tasks: u64,
    pub failed_tasks: u64,
    pub average_execution: Duration,
    pub last_execution: Option<SystemTime>,
}

#[derive(Default)]
struct Counters {
    completed: u64,
    cancelled: u64,
    failed: u64,
    total_execution: Duration,
    last_execution: Option<SystemTime>,
}

struct TaskEntry {
    task: ScheduledTask,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    counters: Mutex<Counters>,
    paused: AtomicBool,
}

impl Shared {
    fn finish(&self, id: &str) {
        self.tasks.lock().remove(id);
    }
}

pub struct SchedulerService {
    shared: Arc<Shared>,
    handle: Handle,
    // Owned only when created outside any runtime
    _runtime: Option<Runtime>,
}

impl SchedulerService {
    /// Use the current runtime, or start a small private one
    pub fn new() -> Result<Self> {
        match Handle::try_current() {
            Ok(handle) => Ok(Self::with_handle(handle)),
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name("lablab-scheduler")
                    .enable_all()
                    .build()
                    .map_err(|e| LablabError::Scheduler(e.to_string()))?;
                let handle = runtime.handle().clone();
                Ok(Self {
                    shared: Arc::new(Shared::default()),
                    handle,
                    _runtime: Some(runtime),
                })
            }
        }
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            handle,
            _runtime: None,
        }
    }

    pub fn schedule_delayed(&self, action: TaskAction, delay: Duration) -> ScheduledTask {
        self.schedule(ScheduledTaskRequest {
            name: None,
            delay,
            interval: None,
            action,
        })
    }

    /// First run after one interval, then every interval
    pub fn schedule_repeating(&self, action: TaskAction, interval: Duration) -> ScheduledTask {
        self.schedule(ScheduledTaskRequest {
            name: None,
            delay: interval,
            interval: Some(interval),
            action,
        })
    }

    pub fn schedule(&self, request: ScheduledTaskRequest) -> ScheduledTask {
        let task = ScheduledTask {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name.clone(),
            scheduled_at: SystemTime::now() + request.delay,
            interval: request.interval,
            state: Arc::new(Mutex::new(TaskStatus {
                state: TaskState::Pending,
                last_run: None,
                runs: 0,
            })),
        };

        info!(
            task = %task.id,
            name = task.name.as_deref().unwrap_or("Unnamed"),
            delay_ms = request.delay.as_millis() as u64,
            "Scheduled task"
        );

        // Hold the lock across spawn so a zero-delay task cannot finish
        // before it is in the table
        let mut tasks = self.shared.tasks.lock();
        let handle = self
            .handle
            .spawn(run_task(self.shared.clone(), task.clone(), request));
        tasks.insert(
            task.id.clone(),
            TaskEntry {
                task: task.clone(),
                handle,
            },
        );
        task
    }

    pub fn cancel(&self, task: &ScheduledTask) -> bool {
        let Some(entry) = self.shared.tasks.lock().remove(&task.id) else {
            return false;
        };
        entry.handle.abort();
        entry.task.set_state(TaskState::Cancelled);
        self.shared.counters.lock().cancelled += 1;
        info!(task = %task.id, "Cancelled task");
        true
    }

    pub fn cancel_all(&self) {
        let drained: Vec<TaskEntry> = self.shared.tasks.lock().drain().map(|(_, e)| e).collect();
        info!(count = drained.len(), "Cancelling all tasks");
        let mut counters = self.shared.counters.lock();
        for entry in drained {
            entry.handle.abort();
            entry.task.set_state(TaskState::Cancelled);
            counters.cancelled += 1;
        }
    }

    pub fn active_tasks(&self) -> Vec<ScheduledTask> {
        self.shared
            .tasks
            .lock()
            .values()
            .filter(|e| matches!(e.task.state(), TaskState::Pending | TaskState::Running))
            .map(|e| e.task.clone())
            .collect()
    }

    pub fn pause_all(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        info!("Paused all tasks");
    }

    pub fn resume_all(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        info!("Resumed all tasks");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SchedulerStats {
        let active = self.shared.tasks.lock().len();
        let counters = self.shared.counters.lock();
        let average = if counters.completed > 0 {
            counters.total_execution / counters.completed as u32
        } else {
            Duration::ZERO
        };
        SchedulerStats {
            active_tasks: active,
            completed_tasks: counters.completed,
            cancelled_tasks: counters.cancelled,
            failed_tasks: counters.failed,
            average_execution: average,
            last_execution: counters.last_execution,
        }
    }
}

impl Drop for SchedulerService {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn run_task(shared: Arc<Shared>, task: ScheduledTask, request: ScheduledTaskRequest) {
    tokio::time::sleep(request.delay).await;
    loop {
        if shared.paused.load(Ordering::SeqCst) {
            if request.interval.is_none() {
                // A one-shot that comes due while paused is dropped
                task.set_state(TaskState::Cancelled);
                shared.counters.lock().cancelled += 1;
                shared.finish(&task.id);
                return;
            }
        } else {
            task.set_state(TaskState::Running);
            let started = Instant::now();
            let outcome = request.action.run().await;
            let elapsed = started.elapsed();
            {
                let mut status = task.state.lock();
                status.last_run = Some(SystemTime::now());
                status.runs += 1;
            }

            match outcome {
                Ok(()) => {
                    let mut counters = shared.counters.lock();
                    counters.completed += 1;
                    counters.total_execution += elapsed;
                    counters.last_execution = Some(SystemTime::now());
                    drop(counters);
                    if request.interval.is_some() {
                        task.set_state(TaskState::Pending);
                    } else {
                        task.set_state(TaskState::Completed);
                        shared.finish(&task.id);
                        return;
                    }
                }
                Err(e) => {
                    error!(task = %task.id, error = %e, "Task failed");
                    shared.counters.lock().failed += 1;
                    task.set_state(TaskState::Failed);
                    if request.interval.is_none() {
                        shared.finish(&task.id);
                        return;
                    }
                }
            }
        }

        match request.interval {
            Some(interval) => tokio::time::sleep(interval).await,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_action(counter: &Arc<AtomicUsize>) -> TaskAction {
        let counter = counter.clone();
        TaskAction::sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_delayed_task_runs_once() {
        let scheduler = SchedulerService::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let task = scheduler.schedule_delayed(counter_action(&runs), Duration::from_millis(10));
        assert_eq!(task.state(), TaskState::Pending);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(task.state(), TaskState::Completed);

        let stats = scheduler.stats();
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.active_tasks, 0);
        assert!(stats.last_execution.is_some());
    }

    #[tokio::test]
    async fn test_repeating_task_until_cancelled() {
        let scheduler = SchedulerService::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let task = scheduler.schedule_repeating(counter_action(&runs), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(scheduler.active_tasks().len(), 1);

        assert!(scheduler.cancel(&task));
        assert_eq!(task.state(), TaskState::Cancelled);
        let after_cancel = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
        assert_eq!(scheduler.stats().cancelled_tasks, 1);
        assert!(!scheduler.cancel(&task));
    }

    #[tokio::test]
    async fn test_failed_task_is_counted() {
        let scheduler = SchedulerService::new().unwrap();
        let task = scheduler.schedule_delayed(
            TaskAction::sync(|| Err(LablabError::Scheduler("nope".into()))),
            Duration::from_millis(5),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(scheduler.stats().failed_tasks, 1);
    }

    #[tokio::test]
    async fn test_async_action() {
        let scheduler = SchedulerService::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let sink = runs.clone();
        scheduler.schedule_delayed(
            TaskAction::asynchronous(move || {
                let sink = sink.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    sink.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            Duration::from_millis(5),
        );
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_paused_runs_are_skipped() {
        let scheduler = SchedulerService::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.pause_all();
        let task = scheduler.schedule_repeating(counter_action(&runs), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        scheduler.resume_all();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(runs.load(Ordering::SeqCst) >= 1);
        scheduler.cancel(&task);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let scheduler = SchedulerService::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.schedule_delayed(counter_action(&runs), Duration::from_secs(30));
        scheduler.schedule_delayed(counter_action(&runs), Duration::from_secs(30));
        assert_eq!(scheduler.active_tasks().len(), 2);

        scheduler.cancel_all();
        assert!(scheduler.active_tasks().is_empty());
        assert_eq!(scheduler.stats().cancelled_tasks, 2);
    }
}
