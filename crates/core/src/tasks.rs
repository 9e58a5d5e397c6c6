//! Registry of in-flight long-running operations.
//!
//! A record exists for exactly as long as its task body runs. Records are
//! keyed by `(requester, task_id)` and removed by a completion guard owned by
//! the spawned task, so removal happens once on every exit path.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::domain::chat::RequesterId;
use crate::domain::task::{TaskId, TaskOutcome};
use crate::limits::RequesterLimits;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("task `{task_id}` is already running for requester `{requester}`")]
    AlreadyRunning { requester: RequesterId, task_id: TaskId },
    #[error("requester `{0}` reached the concurrent task limit")]
    LimitReached(RequesterId),
    #[error("task registry is shutting down")]
    ShuttingDown,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct TaskKey {
    requester: RequesterId,
    task_id: TaskId,
}

#[derive(Debug)]
struct TaskRecord {
    cancel: CancellationToken,
    scheduled_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub requester: RequesterId,
    pub task_id: TaskId,
    pub scheduled_at: DateTime<Utc>,
    pub cancel_requested: bool,
}

pub struct TaskRegistry {
    records: Mutex<HashMap<TaskKey, TaskRecord>>,
    limits: Arc<RequesterLimits>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl TaskRegistry {
    pub fn new(limits: Arc<RequesterLimits>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            limits,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn limits(&self) -> &Arc<RequesterLimits> {
        &self.limits
    }

    /// Records the task and launches `body` with its cancellation token.
    ///
    /// Callers are expected to check `has_task` and `hit_limits` first so they
    /// can reply to the requester; the same checks are repeated here under
    /// the registry lock.
    pub fn schedule<F, Fut>(
        self: &Arc<Self>,
        requester: RequesterId,
        task_id: TaskId,
        body: F,
    ) -> Result<TaskHandle, ScheduleError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        let key = TaskKey { requester: requester.clone(), task_id: task_id.clone() };
        let cancel = self.shutdown.child_token();
        let future = body(cancel.clone());

        let join = {
            let mut records = self.records.lock();
            if self.shutdown.is_cancelled() {
                return Err(ScheduleError::ShuttingDown);
            }
            if records.contains_key(&key) {
                return Err(ScheduleError::AlreadyRunning { requester, task_id });
            }
            if !self.limits.try_acquire_task_slot(&requester) {
                return Err(ScheduleError::LimitReached(requester));
            }

            records.insert(
                key.clone(),
                TaskRecord { cancel: cancel.clone(), scheduled_at: Utc::now() },
            );
            // Spawned under the lock so `shutdown` cannot close the tracker
            // between registration and launch.
            let guard = CompletionGuard { registry: Arc::clone(self), key };
            self.tracker.spawn(async move {
                let _guard = guard;
                future.await
            })
        };

        info!(
            event_name = "tasks.task.scheduled",
            correlation_id = %task_id,
            requester_id = %requester,
            task_id = %task_id,
            "scheduled long-running task"
        );

        Ok(TaskHandle { requester, task_id, cancel, join })
    }

    pub fn has_task(&self, requester: &RequesterId, task_id: &TaskId) -> bool {
        let key = TaskKey { requester: requester.clone(), task_id: task_id.clone() };
        self.records.lock().contains_key(&key)
    }

    pub fn hit_limits(&self, requester: &RequesterId) -> bool {
        self.limits.hit_limits(requester)
    }

    /// Requests cooperative cancellation. Returns `false` when no such task is
    /// in flight. Repeated calls are harmless.
    pub fn external_cancel(&self, requester: &RequesterId, task_id: &TaskId) -> bool {
        let key = TaskKey { requester: requester.clone(), task_id: task_id.clone() };
        let records = self.records.lock();
        let Some(record) = records.get(&key) else {
            return false;
        };
        if !record.cancel.is_cancelled() {
            info!(
                event_name = "tasks.task.cancel_requested",
                correlation_id = %task_id,
                requester_id = %requester,
                task_id = %task_id,
                "cancellation requested for task"
            );
            record.cancel.cancel();
        }
        true
    }

    pub fn in_flight_count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let mut tasks: Vec<_> = self
            .records
            .lock()
            .iter()
            .map(|(key, record)| TaskSnapshot {
                requester: key.requester.clone(),
                task_id: key.task_id.clone(),
                scheduled_at: record.scheduled_at,
                cancel_requested: record.cancel.is_cancelled(),
            })
            .collect();
        tasks.sort_by(|left, right| left.scheduled_at.cmp(&right.scheduled_at));
        tasks
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancels every outstanding task, refuses new ones and waits for all
    /// bodies to finish their cleanup.
    pub async fn shutdown(&self) {
        let outstanding = self.in_flight_count();
        info!(
            event_name = "tasks.registry.shutdown",
            correlation_id = "shutdown",
            outstanding,
            "cancelling outstanding tasks"
        );
        {
            // Taken so a concurrent `schedule` either lands before the cancel
            // (and gets a child token that is cancelled with it) or sees it.
            let _records = self.records.lock();
            self.shutdown.cancel();
        }
        self.tracker.close();
        self.tracker.wait().await;
        debug!(
            event_name = "tasks.registry.drained",
            correlation_id = "shutdown",
            "all tasks finished"
        );
    }

    fn complete(&self, key: &TaskKey) {
        let removed = self.records.lock().remove(key);
        if removed.is_none() {
            warn!(
                event_name = "tasks.task.missing_record",
                correlation_id = %key.task_id,
                requester_id = %key.requester,
                task_id = %key.task_id,
                "task finished without a registry record"
            );
            return;
        }
        self.limits.release_task_slot(&key.requester);
        debug!(
            event_name = "tasks.task.finished",
            correlation_id = %key.task_id,
            requester_id = %key.requester,
            task_id = %key.task_id,
            "task record removed"
        );
    }
}

struct CompletionGuard {
    registry: Arc<TaskRegistry>,
    key: TaskKey,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.registry.complete(&self.key);
    }
}

#[derive(Debug)]
pub struct TaskHandle {
    requester: RequesterId,
    task_id: TaskId,
    cancel: CancellationToken,
    join: JoinHandle<TaskOutcome>,
}

impl TaskHandle {
    pub fn requester(&self) -> &RequesterId {
        &self.requester
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the task body. A panicked body counts as a failure.
    pub async fn outcome(self) -> TaskOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "tasks.task.join_failed",
                    correlation_id = %self.task_id,
                    task_id = %self.task_id,
                    error = %error,
                    "task body did not complete"
                );
                TaskOutcome::Failed
            }
        }
    }
}
