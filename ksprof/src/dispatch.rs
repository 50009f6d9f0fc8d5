//! Parallel dispatch of per-group computations
//!
//! Each group is an independent unit of work: no inter-task dependencies
//! and no shared mutable state, so the dispatcher is an embarrassingly
//! parallel map over the group list. One task's failure is recorded
//! against its group key and never aborts its siblings; the run finishes
//! with whatever completed plus a classified failure report.

use crate::cache::Normalization;
use crate::worker;
use ksprof_common::{Error, FailureClass, GroupKey, ImageKey};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Execution backend. Both backends produce identical results for the
/// same task list; `Sequential` is the fallback when no worker pool is
/// configured. A remote pool would slot in here as a third variant
/// implementing the same `run_all` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSpec {
    Sequential,
    Local { workers: usize },
}

/// One group's unit of work: its treatment images and the controls
/// already resolved for them.
#[derive(Debug, Clone)]
pub struct GroupTask {
    pub key: GroupKey,
    pub treatment: Vec<ImageKey>,
    pub controls: Vec<ImageKey>,
}

/// A recorded per-group failure.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub key: GroupKey,
    pub class: FailureClass,
    pub reason: String,
}

impl TaskFailure {
    pub fn from_error(key: GroupKey, error: &Error) -> Self {
        Self {
            key,
            class: error.failure_class(),
            reason: error.to_string(),
        }
    }
}

/// Everything a run produced: completed profiles keyed by group (so the
/// artifact is reproducible regardless of completion order) and the
/// failures, sorted by group key.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub completed: BTreeMap<GroupKey, Vec<f64>>,
    pub failures: Vec<TaskFailure>,
}

impl DispatchOutcome {
    fn record(&mut self, key: GroupKey, result: ksprof_common::Result<Vec<f64>>) {
        match result {
            Ok(profile) => {
                self.completed.insert(key, profile);
            }
            Err(e) => {
                warn!(group = %key, class = %e.failure_class(), "group failed: {e}");
                self.failures.push(TaskFailure::from_error(key, &e));
            }
        }
    }
}

/// Runs the per-group worker task once per group across the configured
/// backend, with an optional per-task deadline.
pub struct Dispatcher {
    cache_dir: PathBuf,
    normalization: Normalization,
    pool: PoolSpec,
    task_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        cache_dir: &Path,
        normalization: Normalization,
        pool: PoolSpec,
        task_timeout: Option<Duration>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            normalization,
            pool,
            task_timeout,
        }
    }

    /// Execute every task, blocking until all have completed or failed.
    /// Never returns early: a failed task only contributes to the report.
    pub async fn run_all(&self, tasks: Vec<GroupTask>) -> DispatchOutcome {
        let total = tasks.len();
        let mut outcome = match self.pool {
            PoolSpec::Sequential => self.run_sequential(tasks).await,
            PoolSpec::Local { workers } => self.run_local(tasks, workers.max(1)).await,
        };
        outcome.failures.sort_by(|a, b| a.key.cmp(&b.key));
        info!(
            "{} of {} groups completed, {} failed",
            outcome.completed.len(),
            total,
            outcome.failures.len()
        );
        outcome
    }

    async fn run_sequential(&self, tasks: Vec<GroupTask>) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for task in tasks {
            let (key, result) = run_one(
                self.cache_dir.clone(),
                self.normalization,
                task,
                self.task_timeout,
            )
            .await;
            outcome.record(key, result);
        }
        outcome
    }

    async fn run_local(&self, tasks: Vec<GroupTask>, workers: usize) -> DispatchOutcome {
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();
        for task in tasks {
            let semaphore = Arc::clone(&semaphore);
            let cache_dir = self.cache_dir.clone();
            let normalization = self.normalization;
            let task_timeout = self.task_timeout;
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("dispatcher semaphore closed");
                run_one(cache_dir, normalization, task, task_timeout).await
            });
        }

        let mut outcome = DispatchOutcome::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((key, result)) => outcome.record(key, result),
                // The wrapper future itself died; the worker panic path
                // is already handled inside run_one, so this carries no
                // group key to attribute the loss to.
                Err(e) => warn!("dispatch wrapper task lost: {e}"),
            }
        }
        outcome
    }
}

/// Run one group task to completion on the blocking pool.
///
/// A timed-out task is reported exactly like a failed one; its blocking
/// worker is abandoned, which is safe because workers only hold read-only
/// cache handles.
async fn run_one(
    cache_dir: PathBuf,
    normalization: Normalization,
    task: GroupTask,
    task_timeout: Option<Duration>,
) -> (GroupKey, ksprof_common::Result<Vec<f64>>) {
    let key = task.key.clone();
    let handle = tokio::task::spawn_blocking(move || {
        worker::compute_group_profile(&cache_dir, normalization, &task.treatment, &task.controls)
    });

    let joined = match task_timeout {
        Some(deadline) => match tokio::time::timeout(deadline, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                return (
                    key,
                    Err(Error::TaskTimeout {
                        seconds: deadline.as_secs(),
                    }),
                )
            }
        },
        None => handle.await,
    };

    let result = match joined {
        Ok(result) => result,
        Err(e) => Err(Error::WorkerPanic(e.to_string())),
    };
    (key, result)
}
