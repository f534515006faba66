//! Owner commands on existing tasks.

use chrono::Utc;
use tracing::{info, instrument};

use super::{Scheduler, SchedulerError};
use crate::events::TaskEventKind;
use crate::task::{DownloadTask, TaskStatus};

impl Scheduler {
    /// Pauses a downloading task. Transferred bytes are kept.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden`, or `InvalidTransition` unless the task is
    /// `Downloading`.
    #[instrument(skip(self))]
    pub async fn pause(&self, id: &str, user_id: &str) -> Result<DownloadTask, SchedulerError> {
        let inner = &self.inner;
        let guard = inner.task_locks.lock(id).await;
        let mut task = inner.owned_task(id, user_id)?;
        task.pause(Utc::now())
            .map_err(|e| SchedulerError::transition(id, e))?;

        inner.reporter.stop(id);
        inner.admission.release(id);
        inner.store.put(task.clone())?;
        inner.persist(&task).await;
        inner.events.publish(TaskEventKind::Paused, &task);
        info!(transferred = task.transferred_bytes, "download paused");
        drop(guard);

        inner.promote_pending().await;
        Ok(task)
    }

    /// Resumes a paused task after re-checking admission.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden`, `InvalidTransition` unless the task is
    /// `Paused`, or `AdmissionDenied` (the task then stays `Paused`).
    #[instrument(skip(self))]
    pub async fn resume(&self, id: &str, user_id: &str) -> Result<DownloadTask, SchedulerError> {
        self.readmit(id, user_id, Readmit::Resume).await
    }

    /// Retries a failed task within its retry budget.
    ///
    /// The retry count goes up by one and the transfer restarts from zero.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden`, `InvalidTransition` unless the task is
    /// `Failed` with budget left, or `AdmissionDenied` (the task then stays
    /// `Failed`).
    #[instrument(skip(self))]
    pub async fn retry(&self, id: &str, user_id: &str) -> Result<DownloadTask, SchedulerError> {
        self.readmit(id, user_id, Readmit::Retry).await
    }

    /// Cancels a task that is not yet finished.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden`, or `InvalidTransition` for completed and
    /// already-cancelled tasks.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> Result<DownloadTask, SchedulerError> {
        let inner = &self.inner;
        let guard = inner.task_locks.lock(id).await;
        let mut task = inner.owned_task(id, user_id)?;
        task.cancel(Utc::now())
            .map_err(|e| SchedulerError::transition(id, e))?;

        inner.reporter.stop(id);
        inner.retries.remove(id);
        let freed_slot = inner.admission.release(id);
        inner.store.put(task.clone())?;
        inner.persist(&task).await;
        inner.reporter.transfer().discard_partial(&task).await;
        inner.events.publish(TaskEventKind::Cancelled, &task);
        info!(reason = reason.unwrap_or("user request"), "download cancelled");
        drop(guard);

        if freed_slot {
            inner.promote_pending().await;
        }
        Ok(task)
    }

    /// Deletes a task in any state, stopping it first if needed.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Forbidden`.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str, user_id: &str) -> Result<DownloadTask, SchedulerError> {
        let inner = &self.inner;
        let guard = inner.task_locks.lock(id).await;
        let task = inner.owned_task(id, user_id)?;

        inner.reporter.stop(id);
        inner.retries.remove(id);
        let freed_slot = inner.admission.release(id);
        if task.status != TaskStatus::Completed {
            inner.reporter.transfer().discard_partial(&task).await;
        }
        let task = inner
            .store
            .remove(id)
            .ok_or_else(|| SchedulerError::NotFound { id: id.to_string() })?;
        inner.persist_removal(id).await;
        inner.events.publish(TaskEventKind::Removed, &task);
        info!(status = %task.status, "download removed");
        drop(guard);
        inner.task_locks.forget(id);

        if freed_slot {
            inner.promote_pending().await;
        }
        Ok(task)
    }

    /// Changes a task's scheduling priority, clamped to 0-10.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden`, or `InvalidTransition` for completed and
    /// cancelled tasks.
    #[instrument(skip(self))]
    pub async fn set_priority(
        &self,
        id: &str,
        user_id: &str,
        priority: u8,
    ) -> Result<DownloadTask, SchedulerError> {
        let inner = &self.inner;
        let _guard = inner.task_locks.lock(id).await;
        let mut task = inner.owned_task(id, user_id)?;
        task.set_priority(priority, Utc::now())
            .map_err(|e| SchedulerError::transition(id, e))?;
        inner.store.put(task.clone())?;
        inner.persist(&task).await;
        Ok(task)
    }

    /// Removes every task of the user in a finished state.
    ///
    /// Returns how many tasks were removed.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` unless `status` is Completed, Failed or Cancelled.
    #[instrument(skip(self))]
    pub async fn clear_history(
        &self,
        user_id: &str,
        status: TaskStatus,
    ) -> Result<usize, SchedulerError> {
        if !matches!(
            status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        ) {
            return Err(SchedulerError::InvalidRequest {
                reason: format!("cannot clear {status} downloads; use cancel or remove"),
            });
        }

        let inner = &self.inner;
        let mut cleared = 0;
        for candidate in inner.store.list_by_user(user_id) {
            if candidate.status != status {
                continue;
            }
            let guard = inner.task_locks.lock(&candidate.id).await;
            let still_matches = inner
                .store
                .get(&candidate.id)
                .is_some_and(|task| task.status == status);
            if !still_matches {
                continue;
            }
            inner.retries.remove(&candidate.id);
            if let Some(task) = inner.store.remove(&candidate.id) {
                inner.persist_removal(&task.id).await;
                inner.events.publish(TaskEventKind::Removed, &task);
                cleared += 1;
            }
            drop(guard);
            inner.task_locks.forget(&candidate.id);
        }
        info!(cleared, "history cleared");
        Ok(cleared)
    }

    async fn readmit(
        &self,
        id: &str,
        user_id: &str,
        mode: Readmit,
    ) -> Result<DownloadTask, SchedulerError> {
        let inner = &self.inner;
        inner.owned_task(id, user_id)?;
        let profile = inner.profile(user_id).await?;

        let _user_guard = inner.user_locks.lock(user_id).await;
        let _task_guard = inner.task_locks.lock(id).await;
        let mut task = inner.owned_task(id, user_id)?;
        let now = Utc::now();
        let transition = match mode {
            Readmit::Resume => task.resume(now),
            Readmit::Retry => task.retry(now),
        };
        transition.map_err(|e| SchedulerError::transition(id, e))?;

        let user_tasks = inner.store.list_by_user(user_id);
        let decision = inner.admission.try_acquire(id, &profile, &user_tasks, now);
        if let Some(reason) = decision.reason {
            info!(%reason, "re-admission refused");
            return Err(SchedulerError::AdmissionDenied { reason });
        }
        if let Err(error) = inner.store.put(task.clone()) {
            inner.admission.release(id);
            return Err(error.into());
        }
        inner.retries.remove(id);
        inner.persist(&task).await;
        inner.start_worker(id);
        inner.events.publish(mode.event(), &task);
        info!(retry_count = task.retry_count, "download {}", mode.verb());
        Ok(task)
    }
}

#[derive(Debug, Clone, Copy)]
enum Readmit {
    Resume,
    Retry,
}

impl Readmit {
    fn event(self) -> TaskEventKind {
        match self {
            Self::Resume => TaskEventKind::Resumed,
            Self::Retry => TaskEventKind::Retried,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Self::Resume => "resumed",
            Self::Retry => "retried",
        }
    }
}
