//! Detached background work.
//!
//! The storage layer fires two kinds of work it never waits for: the stale
//! entry sweep after a feed refresh, and the feed sweep that follows a user
//! removal. Both go through a [`TaskSpawner`] so the boundary is explicit:
//! a task gets a name, its panics are logged here, and nothing is reported
//! back to whoever scheduled it. Tasks log their own errors with context.
//!
//! [`TokioSpawner`] is the production implementation. [`QueuedSpawner`] holds
//! tasks until [`QueuedSpawner::run_pending`] is awaited, which lets tests
//! decide exactly when a background sweep happens.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::storage::DatabaseError;

/// A unit of detached work.
pub type BackgroundTask = BoxFuture<'static, Result<(), DatabaseError>>;

/// Runs background tasks detached from the caller.
pub trait TaskSpawner: Send + Sync + 'static {
    /// Schedule `task`. Must not block and must not surface the task's result.
    fn spawn(&self, name: &'static str, task: BackgroundTask);
}

/// What happened to a background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    Panicked(String),
}

/// Outcome of one task drained from a [`QueuedSpawner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub name: &'static str,
    pub outcome: TaskOutcome,
}

/// Spawns onto the ambient tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, name: &'static str, task: BackgroundTask) {
        tokio::spawn(async move {
            run_logged(name, task).await;
        });
    }
}

/// Holds tasks until they are explicitly run.
#[derive(Default)]
pub struct QueuedSpawner {
    queue: Mutex<Vec<(&'static str, BackgroundTask)>>,
}

impl QueuedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Run every queued task, oldest first, and report how each one ended.
    ///
    /// Tasks scheduled while draining are left for the next call.
    pub async fn run_pending(&self) -> Vec<TaskReport> {
        let drained: Vec<_> = match self.queue.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };

        let mut reports = Vec::with_capacity(drained.len());
        for (name, task) in drained {
            let outcome = run_logged(name, task).await;
            reports.push(TaskReport { name, outcome });
        }
        reports
    }
}

impl TaskSpawner for QueuedSpawner {
    fn spawn(&self, name: &'static str, task: BackgroundTask) {
        match self.queue.lock() {
            Ok(mut queue) => queue.push((name, task)),
            Err(poisoned) => poisoned.into_inner().push((name, task)),
        }
    }
}

/// Drive a task to completion, catching panics.
async fn run_logged(name: &'static str, task: BackgroundTask) -> TaskOutcome {
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(Ok(())) => {
            tracing::debug!(task = name, "Background task completed");
            TaskOutcome::Completed
        }
        Ok(Err(e)) => {
            // Tasks log their own failures with user and feed context
            tracing::debug!(task = name, error = %e, "Background task failed");
            TaskOutcome::Failed(e.to_string())
        }
        Err(panic) => {
            let msg = panic_message(panic.as_ref());
            tracing::error!(task = name, error = %msg, "Background task panicked");
            TaskOutcome::Panicked(msg)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
