//! Progress tick handling, automatic retry and promotion of pending tasks.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::SchedulerInner;
use crate::admission::DenyReason;
use crate::events::TaskEventKind;
use crate::progress::{ProgressSink, TickControl, TickOutcome};
use crate::retry::{FailureType, RetryDecision};
use crate::task::{DownloadTask, TaskStatus};

#[async_trait]
impl ProgressSink for SchedulerInner {
    async fn snapshot(&self, task_id: &str, generation: u64) -> Option<DownloadTask> {
        if !self.reporter.is_current(task_id, generation) {
            return None;
        }
        self.store
            .get(task_id)
            .filter(|task| task.status == TaskStatus::Downloading)
    }

    async fn apply(&self, task_id: &str, generation: u64, outcome: TickOutcome) -> TickControl {
        let guard = self.task_locks.lock(task_id).await;
        if !self.reporter.is_current(task_id, generation) {
            debug!(task_id, generation, "ignoring tick from stale worker");
            return TickControl::Stop;
        }
        let Some(mut task) = self
            .store
            .get(task_id)
            .filter(|task| task.status == TaskStatus::Downloading)
        else {
            self.reporter.finish(task_id, generation);
            return TickControl::Stop;
        };

        let now = Utc::now();
        match outcome {
            TickOutcome::Advanced(chunk) => {
                let finished = task.record_progress(chunk.bytes, chunk.speed_bytes_per_sec, now);
                if !finished {
                    if self.store.put(task.clone()).is_err() {
                        self.reporter.finish(task_id, generation);
                        return TickControl::Stop;
                    }
                    self.events.publish(TaskEventKind::Progress, &task);
                    return TickControl::Continue;
                }

                self.reporter.finish(task_id, generation);
                self.admission.release(task_id);
                if let Err(error) = task.complete(now) {
                    warn!(task_id, error = %error, "completion rejected");
                    return TickControl::Stop;
                }
                if self.store.put(task.clone()).is_err() {
                    return TickControl::Stop;
                }
                self.persist(&task).await;
                self.events.publish(TaskEventKind::Completed, &task);
                info!(task_id, bytes = task.total_bytes, "download completed");
            }
            TickOutcome::Failed(error) => {
                self.reporter.finish(task_id, generation);
                self.admission.release(task_id);
                if let Err(rejected) = task.fail(error.to_string(), now) {
                    warn!(task_id, error = %rejected, "failure transition rejected");
                    return TickControl::Stop;
                }
                // Registered before the failure is visible to readers.
                self.schedule_auto_retry(&task, error.failure_type());
                if self.store.put(task.clone()).is_err() {
                    return TickControl::Stop;
                }
                self.persist(&task).await;
                self.events.publish(TaskEventKind::Failed, &task);
                warn!(
                    task_id,
                    error = %error,
                    retry_count = task.retry_count,
                    "download failed"
                );
            }
        }
        drop(guard);

        self.promote_pending().await;
        TickControl::Stop
    }
}

/// State of an automatic retry that has not started yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum PendingRetry {
    /// The backoff timer is running.
    Waiting,
    /// The timer fired while every slot was taken; retried when one frees up.
    Deferred { user_id: String },
}

/// Result of trying to start one pending task.
enum Promotion {
    Started,
    Skipped,
    NoSlot,
}

impl SchedulerInner {
    /// Starts a backoff timer that retries the task as the system.
    fn schedule_auto_retry(&self, task: &DownloadTask, failure_type: FailureType) {
        if !self.config.auto_retry || !task.can_retry() || self.is_shut_down() {
            return;
        }
        match self.retry_policy.should_retry(failure_type, task.retry_count) {
            RetryDecision::Retry { delay, attempt } => {
                info!(
                    task_id = %task.id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "automatic retry scheduled"
                );
                self.retries.insert(task.id.clone(), PendingRetry::Waiting);
                let scheduler = self.self_ref.clone();
                let task_id = task.id.clone();
                let user_id = task.user_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = scheduler.upgrade() {
                        inner.run_auto_retry(&task_id, &user_id).await;
                    }
                });
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(task_id = %task.id, %reason, "no automatic retry");
            }
        }
    }

    /// Retries a failed task unless someone acted on it in the meantime.
    ///
    /// A retry refused for lack of a slot is deferred until a slot frees up.
    async fn run_auto_retry(&self, task_id: &str, user_id: &str) {
        if !self.retries.contains_key(task_id) || self.is_shut_down() {
            return;
        }
        let profile = match self.profile(user_id).await {
            Ok(profile) => profile,
            Err(error) => {
                self.retries.remove(task_id);
                debug!(task_id, error = %error, "automatic retry dropped");
                return;
            }
        };

        let _user_guard = self.user_locks.lock(user_id).await;
        let _task_guard = self.task_locks.lock(task_id).await;
        let Some(mut task) = self.store.get(task_id) else {
            self.retries.remove(task_id);
            return;
        };
        if task.status != TaskStatus::Failed {
            self.retries.remove(task_id);
            debug!(task_id, status = %task.status, "automatic retry no longer needed");
            return;
        }
        let now = Utc::now();
        if task.retry(now).is_err() {
            self.retries.remove(task_id);
            return;
        }
        let user_tasks = self.store.list_by_user(user_id);
        let decision = self
            .admission
            .try_acquire(task_id, &profile, &user_tasks, now);
        match decision.reason {
            Some(reason @ DenyReason::ConcurrencyLimit { .. }) => {
                info!(task_id, %reason, "automatic retry deferred");
                self.retries.insert(
                    task_id.to_string(),
                    PendingRetry::Deferred {
                        user_id: user_id.to_string(),
                    },
                );
                return;
            }
            Some(reason) => {
                self.retries.remove(task_id);
                info!(task_id, %reason, "automatic retry dropped");
                return;
            }
            None => {}
        }
        let stored = self.store.put(task.clone());
        // Removed only once the Downloading snapshot is visible.
        self.retries.remove(task_id);
        if stored.is_err() {
            self.admission.release(task_id);
            return;
        }
        self.persist(&task).await;
        self.start_worker(task_id);
        self.events.publish(TaskEventKind::Retried, &task);
        info!(task_id, retry_count = task.retry_count, "automatic retry started");
    }

    /// Starts deferred automatic retries, then pending tasks, highest
    /// priority and oldest first, while slots are free. Tasks over their
    /// owner's daily quota stay pending.
    pub(super) async fn promote_pending(&self) {
        if self.is_shut_down() || !self.admission.has_free_slot() {
            return;
        }
        let deferred: Vec<(String, String)> = self
            .retries
            .iter()
            .filter_map(|entry| match entry.value() {
                PendingRetry::Deferred { user_id } => Some((entry.key().clone(), user_id.clone())),
                PendingRetry::Waiting => None,
            })
            .collect();
        for (task_id, user_id) in deferred {
            if !self.admission.has_free_slot() {
                return;
            }
            self.run_auto_retry(&task_id, &user_id).await;
        }
        for candidate in self.store.list_by_status(TaskStatus::Pending) {
            match self.try_promote(&candidate).await {
                Promotion::Started | Promotion::Skipped => {}
                Promotion::NoSlot => return,
            }
        }
    }

    async fn try_promote(&self, candidate: &DownloadTask) -> Promotion {
        let Ok(profile) = self.profile(&candidate.user_id).await else {
            return Promotion::Skipped;
        };
        let _user_guard = self.user_locks.lock(&candidate.user_id).await;
        let _task_guard = self.task_locks.lock(&candidate.id).await;
        let Some(mut task) = self
            .store
            .get(&candidate.id)
            .filter(|task| task.status == TaskStatus::Pending)
        else {
            return Promotion::Skipped;
        };

        let now = Utc::now();
        let user_tasks = self.store.list_by_user(&task.user_id);
        let decision = self
            .admission
            .try_acquire(&task.id, &profile, &user_tasks, now);
        match decision.reason {
            Some(DenyReason::ConcurrencyLimit { .. }) => return Promotion::NoSlot,
            Some(reason) => {
                debug!(task_id = %task.id, %reason, "pending task stays queued");
                return Promotion::Skipped;
            }
            None => {}
        }
        if task.start(now).is_err() || self.store.put(task.clone()).is_err() {
            self.admission.release(&task.id);
            return Promotion::Skipped;
        }
        self.persist(&task).await;
        self.start_worker(&task.id);
        self.events.publish(TaskEventKind::Started, &task);
        info!(task_id = %task.id, priority = task.priority, "pending download started");
        Promotion::Started
    }
}
