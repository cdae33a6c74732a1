//! Task lifecycle: at most one long-running task at a time, with
//! cooperative start/stop semantics.

pub mod browse;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{Error, Result};

/// Static task metadata, listable without instantiating a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// Cooperative stop flag handed to a running task.
///
/// The task observes it at well-defined checkpoints (top of loop, before
/// item interactions); there is no hard preemption.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    stopped: Arc<AtomicBool>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the task should keep running.
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether two handles refer to the same flag.
    pub fn same(&self, other: &StopFlag) -> bool {
        Arc::ptr_eq(&self.stopped, &other.stopped)
    }
}

/// Outcome of one task run.
#[derive(Debug, Clone, Default)]
pub struct TaskReport {
    /// Items inspected (title read), whether or not they matched.
    pub total_processed: u64,
    /// Items whose title satisfied the match predicate.
    pub matched: u64,
    /// True if the run ended because of a stop request rather than on its
    /// own. A stop is not a failure.
    pub stopped: bool,
}

/// A long-running automation task.
#[async_trait]
pub trait Task: Send + Sync {
    fn info(&self) -> TaskInfo;

    /// Run until finished or until `stop` is raised. Must pass through the
    /// same unwinding path on stop as on completion.
    async fn run(&self, stop: StopFlag) -> Result<TaskReport>;
}

type TaskBuilder = Box<dyn Fn() -> Arc<dyn Task> + Send + Sync>;

/// Owns the single currently-running task.
///
/// `run` stops any previous task's flag before the new task begins its
/// first iteration, so at most one task is ever active. All state lives
/// behind a brief mutex; no lock is held across an await.
#[derive(Default)]
pub struct TaskManager {
    tasks: Vec<(TaskInfo, TaskBuilder)>,
    current: Mutex<Option<StopFlag>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under its static metadata.
    pub fn register<F>(&mut self, info: TaskInfo, builder: F)
    where
        F: Fn() -> Arc<dyn Task> + Send + Sync + 'static,
    {
        self.tasks.push((info, Box::new(builder)));
    }

    /// Static metadata for every registered task.
    pub fn available(&self) -> Vec<TaskInfo> {
        self.tasks.iter().map(|(info, _)| *info).collect()
    }

    /// The active task's stop flag, if one is running.
    pub fn active(&self) -> Option<StopFlag> {
        self.current.lock().expect("task manager lock").clone()
    }

    /// Request the current task to stop and forget it. Idempotent.
    pub fn stop(&self) {
        let mut current = self.current.lock().expect("task manager lock");
        if let Some(flag) = current.take() {
            info!("stop requested for running task");
            flag.stop();
        }
    }

    /// Run a task to completion. Any previously running task is stopped
    /// first.
    pub async fn run(&self, task_id: &str) -> Result<TaskReport> {
        let (info, builder) = self
            .tasks
            .iter()
            .find(|(info, _)| info.id == task_id)
            .ok_or_else(|| Error::UnknownTask(task_id.to_string()))?;

        let flag = StopFlag::new();
        {
            let mut current = self.current.lock().expect("task manager lock");
            if let Some(previous) = current.take() {
                warn!("stopping previous task before starting {}", info.id);
                previous.stop();
            }
            *current = Some(flag.clone());
        }

        let task = builder();
        info!("=== task started: {} ===", info.name);
        let result = task.run(flag.clone()).await;
        match &result {
            Ok(report) if report.stopped => info!("=== task stopped: {} ===", info.name),
            Ok(_) => info!("=== task finished: {} ===", info.name),
            Err(e) => warn!("=== task failed: {}: {} ===", info.name, e),
        }

        let mut current = self.current.lock().expect("task manager lock");
        if current.as_ref().is_some_and(|f| f.same(&flag)) {
            *current = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopTask;

    #[async_trait]
    impl Task for NoopTask {
        fn info(&self) -> TaskInfo {
            TaskInfo {
                id: "noop",
                name: "Noop",
                description: "does nothing",
            }
        }

        async fn run(&self, stop: StopFlag) -> Result<TaskReport> {
            Ok(TaskReport {
                stopped: !stop.is_running(),
                ..Default::default()
            })
        }
    }

    fn manager() -> TaskManager {
        let mut mgr = TaskManager::new();
        mgr.register(
            TaskInfo {
                id: "noop",
                name: "Noop",
                description: "does nothing",
            },
            || Arc::new(NoopTask),
        );
        mgr
    }

    #[test]
    fn stop_flag_is_idempotent() {
        let flag = StopFlag::new();
        assert!(flag.is_running());
        flag.stop();
        flag.stop();
        assert!(!flag.is_running());
    }

    #[test]
    fn stop_flag_clones_share_state() {
        let flag = StopFlag::new();
        let other = flag.clone();
        assert!(flag.same(&other));
        other.stop();
        assert!(!flag.is_running());
    }

    #[test]
    fn available_lists_registered_metadata() {
        let mgr = manager();
        let infos = mgr.available();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, "noop");
        assert_eq!(infos[0].name, "Noop");
    }

    #[tokio::test]
    async fn unknown_task_is_an_error() {
        let mgr = manager();
        let err = mgr.run("does-not-exist").await.unwrap_err();
        assert!(matches!(err, Error::UnknownTask(_)));
    }

    #[tokio::test]
    async fn run_clears_active_flag_on_completion() {
        let mgr = manager();
        mgr.run("noop").await.unwrap();
        assert!(mgr.active().is_none());
    }

    #[tokio::test]
    async fn manager_stop_without_task_is_a_noop() {
        let mgr = manager();
        mgr.stop();
        assert!(mgr.active().is_none());
    }
}
