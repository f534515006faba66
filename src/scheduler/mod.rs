//! Download scheduler: the orchestrator and only mutator of the task store.
//!
//! # Locking
//!
//! Every command that touches a task takes that task's FIFO command lock, so
//! commands on one task apply in submission order while different tasks run
//! in parallel. Commands that consult the daily quota (create, resume, retry,
//! promotion of pending tasks) first take the owning user's lock. The order
//! is always user lock, then task lock. Promotion of pending tasks runs only
//! after the triggering command has released its locks.
//!
//! Progress ticks take the same task lock and are ignored unless the task is
//! still `Downloading` and the ticking worker is the task's current one.

mod batch;
mod commands;
mod error;
mod history;
mod locks;
mod ticks;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

pub use batch::{BatchFailure, BatchOperation, BatchResult};
pub use error::{ErrorKind, SchedulerError};
pub use history::{DEFAULT_HISTORY_LIMIT, HistoryFilter, HistoryPage};

use self::locks::LockTable;
use self::ticks::PendingRetry;
use crate::admission::{AdmissionController, DenyReason};
use crate::collab::{ContentCatalog, FixedStorage, StorageProbe, UserDirectory, UserProfile};
use crate::config::{ConfigError, SchedulerConfig};
use crate::events::{EventBus, TaskEvent, TaskEventKind};
use crate::persist::{SinkError, TaskSink};
use crate::progress::{ProgressReporter, ProgressSink, SimulatedTransfer, Transfer};
use crate::retry::RetryPolicy;
use crate::stats::{DownloadStats, StatsAggregator};
use crate::store::TaskStore;
use crate::task::{CreateDownloadRequest, DownloadTask, TaskStatus, generate_task_id};

/// How a create request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateDisposition {
    /// A new task was admitted and is downloading.
    Created,
    /// The same variant was already in flight; that task is returned.
    Existing,
    /// A new task is waiting in `Pending` for a free slot.
    Queued,
    /// Admission refused the request; nothing was stored.
    Denied,
}

impl CreateDisposition {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Existing => "existing",
            Self::Queued => "queued",
            Self::Denied => "denied",
        }
    }
}

/// Result of [`Scheduler::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOutcome {
    /// The created or existing task; `None` when denied.
    pub task: Option<DownloadTask>,
    /// True when the download is not running because admission withheld a slot.
    pub requires_admission: bool,
    /// Human-readable summary.
    pub message: String,
    /// Why admission refused, for denied and queued requests.
    pub denied: Option<DenyReason>,
    pub disposition: CreateDisposition,
}

impl CreateOutcome {
    fn created(task: DownloadTask) -> Self {
        Self {
            task: Some(task),
            requires_admission: false,
            message: "download task created, starting shortly".to_string(),
            denied: None,
            disposition: CreateDisposition::Created,
        }
    }

    fn existing(task: DownloadTask) -> Self {
        Self {
            task: Some(task),
            requires_admission: false,
            message: "this title is already in the download queue".to_string(),
            denied: None,
            disposition: CreateDisposition::Existing,
        }
    }

    fn queued(task: DownloadTask, reason: DenyReason) -> Self {
        Self {
            task: Some(task),
            requires_admission: true,
            message: format!("download queued until a slot frees up ({reason})"),
            denied: Some(reason),
            disposition: CreateDisposition::Queued,
        }
    }

    fn denied(reason: DenyReason) -> Self {
        Self {
            task: None,
            requires_admission: true,
            message: format!("download refused: {reason}"),
            denied: Some(reason),
            disposition: CreateDisposition::Denied,
        }
    }

    /// Returns the task, or `AdmissionDenied` for a refused request.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AdmissionDenied`] when no task was stored.
    pub fn into_result(self) -> Result<DownloadTask, SchedulerError> {
        match (self.task, self.denied) {
            (Some(task), _) => Ok(task),
            (None, Some(reason)) => Err(SchedulerError::AdmissionDenied { reason }),
            (None, None) => Err(SchedulerError::InvalidRequest {
                reason: self.message,
            }),
        }
    }
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    catalog: Arc<dyn ContentCatalog>,
    users: Arc<dyn UserDirectory>,
    config: SchedulerConfig,
    transfer: Option<Arc<dyn Transfer>>,
    sink: Option<Arc<dyn TaskSink>>,
    storage: Option<Arc<dyn StorageProbe>>,
}

impl SchedulerBuilder {
    #[must_use]
    pub fn new(catalog: Arc<dyn ContentCatalog>, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            catalog,
            users,
            config: SchedulerConfig::default(),
            transfer: None,
            sink: None,
            storage: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default [`SimulatedTransfer`] backend.
    #[must_use]
    pub fn transfer(mut self, transfer: Arc<dyn Transfer>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    /// Persists task snapshots through `sink`.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn TaskSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replaces the default [`FixedStorage`] free-space source.
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn StorageProbe>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Validates the configuration and builds the scheduler.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for out-of-range settings.
    pub fn build(self) -> Result<Scheduler, ConfigError> {
        self.config.validate()?;
        let transfer = self
            .transfer
            .unwrap_or_else(|| Arc::new(SimulatedTransfer::new()));
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(FixedStorage::default()));
        let config = self.config;

        let inner = Arc::new_cyclic(|self_ref| SchedulerInner {
            store: TaskStore::new(),
            admission: AdmissionController::new(config.admission_policy()),
            reporter: ProgressReporter::new(
                transfer,
                config.tick_interval,
                config.attempt_timeout,
            ),
            retry_policy: config.retry_policy(),
            events: EventBus::new(config.event_capacity),
            catalog: self.catalog,
            users: self.users,
            storage,
            sink: self.sink,
            retries: DashMap::new(),
            task_locks: LockTable::new(),
            user_locks: LockTable::new(),
            shut_down: AtomicBool::new(false),
            self_ref: self_ref.clone(),
            config,
        });
        Ok(Scheduler { inner })
    }
}

/// Shared scheduler state. Progress workers and retry timers hold it weakly.
struct SchedulerInner {
    config: SchedulerConfig,
    store: TaskStore,
    admission: AdmissionController,
    reporter: ProgressReporter,
    retry_policy: RetryPolicy,
    events: EventBus,
    catalog: Arc<dyn ContentCatalog>,
    users: Arc<dyn UserDirectory>,
    storage: Arc<dyn StorageProbe>,
    sink: Option<Arc<dyn TaskSink>>,
    /// Automatic retries waiting for their delay or for a free slot.
    retries: DashMap<String, PendingRetry>,
    task_locks: LockTable,
    user_locks: LockTable,
    shut_down: AtomicBool,
    self_ref: Weak<SchedulerInner>,
}

/// Download task scheduler.
///
/// Dropping the scheduler stops every progress worker.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("tasks", &self.inner.store.len())
            .field("active_slots", &self.inner.admission.active_slots())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    #[must_use]
    pub fn builder(
        catalog: Arc<dyn ContentCatalog>,
        users: Arc<dyn UserDirectory>,
    ) -> SchedulerBuilder {
        SchedulerBuilder::new(catalog, users)
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Creates a download task, admitting it immediately when possible.
    ///
    /// A denied request is not an error: the outcome says why, and no task
    /// is stored unless `queue_when_busy` keeps it as `Pending`. Requests are
    /// also refused while the download volume has less free space than the
    /// download needs or than [`crate::admission::MIN_FREE_SPACE`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest`, `UnknownUser`, `AccountDisabled`,
    /// `ContentNotFound` or `VariantUnavailable` when the request cannot be
    /// served at all.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, content_id = %request.content_id))]
    pub async fn create(
        &self,
        request: CreateDownloadRequest,
    ) -> Result<CreateOutcome, SchedulerError> {
        let inner = &self.inner;
        if let Some(field) = request.first_blank_field() {
            return Err(SchedulerError::InvalidRequest {
                reason: format!("{field} must not be empty"),
            });
        }
        let profile = inner.profile(&request.user_id).await?;

        let content = inner
            .catalog
            .lookup(&request.content_id)
            .await
            .ok_or_else(|| SchedulerError::ContentNotFound {
                content_id: request.content_id.clone(),
            })?;
        let variant = content
            .variant(&request.quality, &request.format)
            .cloned()
            .ok_or_else(|| SchedulerError::VariantUnavailable {
                content_id: request.content_id.clone(),
                quality: request.quality.clone(),
                format: request.format.clone(),
            })?;

        let user_guard = inner.user_locks.lock(&request.user_id).await;
        let user_tasks = inner.store.list_by_user(&request.user_id);
        if let Some(existing) = user_tasks.iter().find(|task| {
            task.status.is_in_flight()
                && task.matches_variant(&request.content_id, &variant.quality, &variant.format)
        }) {
            debug!(task_id = %existing.id, "variant already in flight");
            return Ok(CreateOutcome::existing(existing.clone()));
        }

        let available = inner.storage.available_bytes().await;
        if let Err(reason) = AdmissionController::check_space(available, variant.size_bytes) {
            info!(%reason, "download refused");
            return Ok(CreateOutcome::denied(reason));
        }

        let now = Utc::now();
        let mut task = DownloadTask::new(
            generate_task_id(),
            &request,
            &content.title,
            &variant,
            inner.config.max_retries,
            now,
        );
        let task_guard = inner.task_locks.lock(&task.id).await;

        let decision = inner
            .admission
            .try_acquire(&task.id, &profile, &user_tasks, now);
        if let Some(reason) = decision.reason {
            let can_queue = matches!(reason, DenyReason::ConcurrencyLimit { .. })
                && inner.config.queue_when_busy
                && inner
                    .admission
                    .check_quota(&profile, &user_tasks, None, now)
                    .is_ok();
            if !can_queue {
                info!(%reason, "download refused");
                return Ok(CreateOutcome::denied(reason));
            }
            inner.store.insert(task.clone())?;
            inner.persist(&task).await;
            inner.events.publish(TaskEventKind::Queued, &task);
            info!(task_id = %task.id, "download queued");
            drop(task_guard);
            drop(user_guard);

            // A slot may have been released after the denial above.
            inner.promote_pending().await;
            let task = inner.store.get(&task.id).unwrap_or(task);
            return Ok(CreateOutcome::queued(task, reason));
        }

        if let Err(error) = task.start(now) {
            inner.admission.release(&task.id);
            return Err(SchedulerError::transition(&task.id, error));
        }
        if let Err(error) = inner.store.insert(task.clone()) {
            inner.admission.release(&task.id);
            return Err(error.into());
        }
        inner.persist(&task).await;
        inner.start_worker(&task.id);
        inner.events.publish(TaskEventKind::Created, &task);
        info!(task_id = %task.id, title = %task.content_title, "download started");
        Ok(CreateOutcome::created(task))
    }

    /// Returns the caller's task.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `Forbidden` for another user's task.
    pub fn get(&self, id: &str, user_id: &str) -> Result<DownloadTask, SchedulerError> {
        self.inner.owned_task(id, user_id)
    }

    /// Returns the user's tasks, highest priority first.
    #[must_use]
    pub fn list(&self, user_id: &str) -> Vec<DownloadTask> {
        self.inner.store.list_by_user(user_id)
    }

    /// Statistics for one user, or for every task when `user_id` is `None`.
    #[must_use]
    pub fn stats(&self, user_id: Option<&str>) -> DownloadStats {
        let tasks = match user_id {
            Some(user_id) => self.inner.store.list_by_user(user_id),
            None => self.inner.store.list_all(),
        };
        StatsAggregator::compute(&tasks)
    }

    /// Subscribes to task events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Number of occupied concurrency slots.
    #[must_use]
    pub fn active_slots(&self) -> usize {
        self.inner.admission.active_slots()
    }

    /// Number of running progress workers.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.inner.reporter.active_count()
    }

    /// True while an automatic retry of the task is waiting for its backoff
    /// delay or for a free slot.
    #[must_use]
    pub fn is_retry_scheduled(&self, id: &str) -> bool {
        self.inner.retries.contains_key(id)
    }

    /// Reloads tasks from the sink after a restart.
    ///
    /// Downloads that were running come back `Paused`; pending tasks are
    /// promoted as slots allow. Returns the number of restored tasks.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if the sink cannot be read.
    #[instrument(skip(self))]
    pub async fn restore_from_sink(&self) -> Result<usize, SinkError> {
        let inner = &self.inner;
        let Some(sink) = inner.sink.as_ref() else {
            return Ok(0);
        };
        let now = Utc::now();
        let mut restored = 0;
        for mut task in sink.load_all().await? {
            let interrupted = task.status == TaskStatus::Downloading;
            task.park_after_restart(now);
            if let Err(error) = inner.store.insert(task.clone()) {
                warn!(task_id = %task.id, error = %error, "skipping restored task");
                continue;
            }
            if interrupted {
                inner.persist(&task).await;
            }
            restored += 1;
        }
        info!(restored, "tasks restored");
        inner.promote_pending().await;
        Ok(restored)
    }

    /// Stops every progress worker and pending retry. Commands still work but
    /// no task advances afterwards.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl SchedulerInner {
    /// Looks up an active user.
    async fn profile(&self, user_id: &str) -> Result<UserProfile, SchedulerError> {
        let profile =
            self.users
                .lookup(user_id)
                .await
                .ok_or_else(|| SchedulerError::UnknownUser {
                    user_id: user_id.to_string(),
                })?;
        if !profile.is_active() {
            return Err(SchedulerError::AccountDisabled {
                user_id: user_id.to_string(),
            });
        }
        Ok(profile)
    }

    /// Returns the task if it exists and belongs to `user_id`.
    fn owned_task(&self, id: &str, user_id: &str) -> Result<DownloadTask, SchedulerError> {
        let task = self.store.get(id).ok_or_else(|| SchedulerError::NotFound {
            id: id.to_string(),
        })?;
        if task.user_id != user_id {
            return Err(SchedulerError::Forbidden { id: id.to_string() });
        }
        Ok(task)
    }

    /// Best-effort snapshot write.
    async fn persist(&self, task: &DownloadTask) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        if let Err(error) = sink.save(task).await {
            warn!(task_id = %task.id, status = %task.status, error = %error, "failed to persist task");
        }
    }

    /// Best-effort record deletion.
    async fn persist_removal(&self, task_id: &str) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        if let Err(error) = sink.delete(task_id).await {
            warn!(task_id, error = %error, "failed to delete persisted task");
        }
    }

    fn start_worker(&self, task_id: &str) {
        if self.is_shut_down() {
            debug!(task_id, "not starting worker after shutdown");
            return;
        }
        let sink: Weak<dyn ProgressSink> = self.self_ref.clone();
        self.reporter.start(task_id, sink);
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("scheduler shutting down");
        }
        self.retries.clear();
        self.reporter.stop_all();
    }
}
