//! Download task entity and status definitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CreateDownloadRequest;
use crate::collab::ContentVariant;

/// Lowest numeric priority.
pub const MIN_PRIORITY: u8 = 0;

/// Highest numeric priority.
pub const MAX_PRIORITY: u8 = 10;

/// Priority assigned when a request does not specify one.
pub const DEFAULT_PRIORITY: u8 = 5;

const COMPLETED_IS_FINAL: &str = "cannot modify completed task";
const CANCELLED_IS_FINAL: &str = "cannot modify cancelled task";

/// Status of a download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but waiting for a concurrency slot.
    Pending,
    /// Holding a slot; a progress worker is advancing it.
    Downloading,
    /// Stopped by the owner; keeps its transferred bytes.
    Paused,
    /// All bytes transferred.
    Completed,
    /// Last transfer attempt failed; may be retried within budget.
    Failed,
    /// Abandoned by the owner.
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Downloading,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Returns the storage string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true for states no automatic transition leaves.
    ///
    /// `Failed` is only terminal once its retry budget is spent, which
    /// depends on the task; see [`DownloadTask::is_permanently_failed`].
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Returns true while the download is still wanted and unfinished.
    ///
    /// Used by the duplicate-submission guard.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Downloading | Self::Paused)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid task status: {s}")),
        }
    }
}

/// A rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    /// Status the task was in.
    pub from: TaskStatus,
    /// Human-readable reason, distinct per rule.
    pub reason: &'static str,
}

impl TransitionError {
    fn new(from: TaskStatus, reason: &'static str) -> Self {
        Self { from, reason }
    }
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status: {})", self.reason, self.from)
    }
}

/// One download of one content variant for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Opaque unique identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Catalog content id.
    pub content_id: String,
    /// Display title captured at creation.
    pub content_title: String,
    /// Quality label.
    pub quality: String,
    /// Container format.
    pub format: String,
    /// Where the bytes come from.
    pub source_url: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Size known at creation time.
    pub total_bytes: u64,
    /// Bytes transferred so far; never exceeds `total_bytes`.
    pub transferred_bytes: u64,
    /// Most recent transfer speed estimate.
    pub speed_bytes_per_sec: u64,
    /// 0-10, higher is scheduled sooner.
    pub priority: u8,
    /// Retries consumed so far.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Last transfer error; only set while `Failed`.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// First transition into `Downloading`.
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set on Completed, Failed and Cancelled.
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadTask {
    /// Builds a new `Pending` task for a catalog variant.
    ///
    /// Quality and format are taken from the variant so that duplicate
    /// detection compares catalog spellings.
    #[must_use]
    pub(crate) fn new(
        id: String,
        request: &CreateDownloadRequest,
        title: &str,
        variant: &ContentVariant,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id: request.user_id.clone(),
            content_id: request.content_id.clone(),
            content_title: title.to_string(),
            quality: variant.quality.clone(),
            format: variant.format.clone(),
            source_url: variant.source_url.clone(),
            status: TaskStatus::Pending,
            total_bytes: variant.size_bytes,
            transferred_bytes: 0,
            speed_bytes_per_sec: 0,
            priority: request.priority.unwrap_or_default().value(),
            retry_count: 0,
            max_retries,
            error_message: None,
            created_at: now,
            started_at: None,
            paused_at: None,
            completed_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    /// Percentage of bytes transferred, rounded to two decimals.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let percent = (self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0;
        (percent.min(100.0) * 100.0).round() / 100.0
    }

    /// Bytes left to transfer.
    #[must_use]
    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.transferred_bytes)
    }

    /// Estimated seconds until completion at the current speed.
    ///
    /// `Some(0)` once everything is transferred, `None` while the speed is unknown.
    #[must_use]
    pub fn eta_secs(&self) -> Option<u64> {
        let remaining = self.remaining_bytes();
        if remaining == 0 {
            return Some(0);
        }
        if self.speed_bytes_per_sec == 0 {
            return None;
        }
        Some(remaining.div_ceil(self.speed_bytes_per_sec))
    }

    /// Returns true if this task downloads the given content variant.
    #[must_use]
    pub fn matches_variant(&self, content_id: &str, quality: &str, format: &str) -> bool {
        self.content_id == content_id && self.quality == quality && self.format == format
    }

    /// Returns true if an explicit retry would be accepted.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }

    /// Returns true for a failed task whose retry budget is spent.
    #[must_use]
    pub fn is_permanently_failed(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count >= self.max_retries
    }

    fn reject_finished(&self) -> Result<(), TransitionError> {
        match self.status {
            TaskStatus::Completed => Err(TransitionError::new(self.status, COMPLETED_IS_FINAL)),
            TaskStatus::Cancelled => Err(TransitionError::new(self.status, CANCELLED_IS_FINAL)),
            _ => Ok(()),
        }
    }

    /// Pending → Downloading, after admission.
    pub(crate) fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.reject_finished()?;
        if self.status != TaskStatus::Pending {
            return Err(TransitionError::new(
                self.status,
                "only pending tasks can be started",
            ));
        }
        self.enter_downloading(now);
        Ok(())
    }

    /// Downloading → Paused.
    pub(crate) fn pause(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.reject_finished()?;
        if self.status != TaskStatus::Downloading {
            return Err(TransitionError::new(
                self.status,
                "only downloading tasks can be paused",
            ));
        }
        self.status = TaskStatus::Paused;
        self.speed_bytes_per_sec = 0;
        self.paused_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Paused → Downloading. Transferred bytes are kept.
    pub(crate) fn resume(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.reject_finished()?;
        if self.status != TaskStatus::Paused {
            return Err(TransitionError::new(
                self.status,
                "only paused tasks can be resumed",
            ));
        }
        self.enter_downloading(now);
        Ok(())
    }

    /// Pending/Downloading/Paused/Failed → Cancelled.
    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.reject_finished()?;
        self.status = TaskStatus::Cancelled;
        self.speed_bytes_per_sec = 0;
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Failed → Downloading, consuming one retry.
    pub(crate) fn retry(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.reject_finished()?;
        if self.status != TaskStatus::Failed {
            return Err(TransitionError::new(
                self.status,
                "only failed tasks can be retried",
            ));
        }
        if self.retry_count >= self.max_retries {
            return Err(TransitionError::new(self.status, "retry budget exhausted"));
        }
        self.retry_count += 1;
        self.transferred_bytes = 0;
        self.error_message = None;
        self.finished_at = None;
        self.enter_downloading(now);
        Ok(())
    }

    /// Applies one progress chunk. Returns true when every byte has arrived.
    ///
    /// Callers must have checked that the task is `Downloading`.
    pub(crate) fn record_progress(
        &mut self,
        bytes: u64,
        speed_bytes_per_sec: u64,
        now: DateTime<Utc>,
    ) -> bool {
        debug_assert_eq!(self.status, TaskStatus::Downloading);
        self.transferred_bytes = self
            .transferred_bytes
            .saturating_add(bytes)
            .min(self.total_bytes);
        self.speed_bytes_per_sec = speed_bytes_per_sec;
        self.updated_at = now;
        self.transferred_bytes == self.total_bytes
    }

    /// Downloading → Completed.
    pub(crate) fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Downloading {
            return Err(TransitionError::new(
                self.status,
                "only downloading tasks can complete",
            ));
        }
        self.status = TaskStatus::Completed;
        self.transferred_bytes = self.total_bytes;
        self.speed_bytes_per_sec = 0;
        self.completed_at = Some(now);
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Downloading → Failed. The retry count is left unchanged.
    pub(crate) fn fail(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Downloading {
            return Err(TransitionError::new(
                self.status,
                "only downloading tasks can fail",
            ));
        }
        self.status = TaskStatus::Failed;
        self.speed_bytes_per_sec = 0;
        self.error_message = Some(message.into());
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Changes the scheduling priority, clamped to 0-10.
    pub(crate) fn set_priority(
        &mut self,
        priority: u8,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.reject_finished()?;
        self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        self.updated_at = now;
        Ok(())
    }

    /// Parks an interrupted download after a restart.
    pub(crate) fn park_after_restart(&mut self, now: DateTime<Utc>) {
        if self.status == TaskStatus::Downloading {
            self.status = TaskStatus::Paused;
            self.speed_bytes_per_sec = 0;
            self.paused_at = Some(now);
            self.updated_at = now;
        }
    }

    fn enter_downloading(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Downloading;
        self.started_at.get_or_insert(now);
        self.paused_at = None;
        self.updated_at = now;
    }
}

impl fmt::Display for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DownloadTask {{ id: {}, content: {} ({}/{}), status: {}, progress: {:.2}% }}",
            self.id,
            self.content_id,
            self.quality,
            self.format,
            self.status,
            self.progress_percent()
        )
    }
}
