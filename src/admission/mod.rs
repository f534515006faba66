//! Admission control: global concurrency slots and the free-tier daily quota.
//!
//! A slot is held by every `Downloading` task and by nothing else. The
//! controller only counts; the scheduler pairs each acquire and release with
//! the matching status transition while holding the task's command lock.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collab::UserProfile;
use crate::stats::format_bytes;
use crate::task::{DownloadTask, TaskStatus};

/// Default number of downloads that may run at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Default number of downloads a free-tier user may start per UTC day.
pub const DEFAULT_DAILY_LIMIT: usize = 5;

/// Free space a volume must keep for a download to be accepted (1 GiB).
pub const MIN_FREE_SPACE: u64 = 1024 * 1024 * 1024;

/// Why admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Every concurrency slot is taken.
    ConcurrencyLimit {
        /// Configured slot count.
        max: usize,
    },
    /// The user has used up today's quota.
    DailyQuota {
        /// Configured daily limit.
        limit: usize,
    },
    /// The download volume is short of free space.
    InsufficientSpace {
        /// Bytes free on the volume.
        available: u64,
        /// Bytes the download needs, never less than [`MIN_FREE_SPACE`].
        required: u64,
    },
}

impl DenyReason {
    /// Short stable label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConcurrencyLimit { .. } => "concurrency limit",
            Self::DailyQuota { .. } => "daily quota",
            Self::InsufficientSpace { .. } => "disk space",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConcurrencyLimit { max } => {
                write!(f, "concurrency limit: {max} downloads already running")
            }
            Self::DailyQuota { limit } => {
                write!(f, "daily quota: {limit} downloads per day on the free tier")
            }
            Self::InsufficientSpace {
                available,
                required,
            } => write!(
                f,
                "disk space: {} free, {} required",
                format_bytes(*available),
                format_bytes(*required)
            ),
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
}

impl AdmissionDecision {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionPolicy {
    pub max_concurrent: usize,
    pub daily_limit: usize,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            daily_limit: DEFAULT_DAILY_LIMIT,
        }
    }
}

/// Tracks which tasks hold a concurrency slot.
#[derive(Debug, Default)]
pub struct AdmissionController {
    policy: AdmissionPolicy,
    slots: Mutex<HashSet<String>>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self {
            policy,
            slots: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Checks both limits without reserving anything.
    ///
    /// `exclude` names a task being re-admitted; it neither counts against the
    /// quota nor needs a fresh slot if it already holds one.
    #[must_use]
    pub fn can_admit(
        &self,
        profile: &UserProfile,
        user_tasks: &[DownloadTask],
        exclude: Option<&str>,
        now: DateTime<Utc>,
    ) -> AdmissionDecision {
        let slots = self.lock_slots();
        let holds = exclude.is_some_and(|id| slots.contains(id));
        if !holds && slots.len() >= self.policy.max_concurrent {
            return AdmissionDecision::deny(DenyReason::ConcurrencyLimit {
                max: self.policy.max_concurrent,
            });
        }
        match self.check_quota(profile, user_tasks, exclude, now) {
            Ok(()) => AdmissionDecision::allow(),
            Err(reason) => AdmissionDecision::deny(reason),
        }
    }

    /// Checks only the daily quota.
    ///
    /// Counts the user's tasks whose first start fell on today's UTC date and
    /// that are Downloading, Paused or Completed. Tiers other than free are
    /// never limited.
    ///
    /// # Errors
    ///
    /// Returns [`DenyReason::DailyQuota`] when the limit is reached.
    pub fn check_quota(
        &self,
        profile: &UserProfile,
        user_tasks: &[DownloadTask],
        exclude: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), DenyReason> {
        if !profile.tier.is_unprivileged() {
            return Ok(());
        }
        let today = now.date_naive();
        let used = user_tasks
            .iter()
            .filter(|task| exclude != Some(task.id.as_str()))
            .filter(|task| {
                matches!(
                    task.status,
                    TaskStatus::Downloading | TaskStatus::Paused | TaskStatus::Completed
                )
            })
            .filter(|task| task.started_at.is_some_and(|at| at.date_naive() == today))
            .count();
        if used >= self.policy.daily_limit {
            debug!(used, limit = self.policy.daily_limit, "daily quota reached");
            return Err(DenyReason::DailyQuota {
                limit: self.policy.daily_limit,
            });
        }
        Ok(())
    }

    /// Checks that the volume can hold a download of `size_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`DenyReason::InsufficientSpace`] when `available` is below the
    /// download size or below [`MIN_FREE_SPACE`], whichever is larger.
    pub fn check_space(available: u64, size_bytes: u64) -> Result<(), DenyReason> {
        let required = size_bytes.max(MIN_FREE_SPACE);
        if available < required {
            debug!(available, required, "not enough free space");
            return Err(DenyReason::InsufficientSpace {
                available,
                required,
            });
        }
        Ok(())
    }

    /// Checks both limits and reserves a slot for `task_id` in one step.
    ///
    /// A task that already holds a slot is admitted again without taking a
    /// second one.
    #[must_use]
    pub fn try_acquire(
        &self,
        task_id: &str,
        profile: &UserProfile,
        user_tasks: &[DownloadTask],
        now: DateTime<Utc>,
    ) -> AdmissionDecision {
        let mut slots = self.lock_slots();
        if slots.contains(task_id) {
            return AdmissionDecision::allow();
        }
        if slots.len() >= self.policy.max_concurrent {
            debug!(
                task_id,
                active = slots.len(),
                "admission denied: no free slot"
            );
            return AdmissionDecision::deny(DenyReason::ConcurrencyLimit {
                max: self.policy.max_concurrent,
            });
        }
        if let Err(reason) = self.check_quota(profile, user_tasks, Some(task_id), now) {
            return AdmissionDecision::deny(reason);
        }
        slots.insert(task_id.to_string());
        debug!(task_id, active = slots.len(), "slot acquired");
        AdmissionDecision::allow()
    }

    /// Frees the task's slot. Returns false if it held none.
    pub fn release(&self, task_id: &str) -> bool {
        let released = self.lock_slots().remove(task_id);
        if released {
            debug!(task_id, "slot released");
        }
        released
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn active_slots(&self) -> usize {
        self.lock_slots().len()
    }

    #[must_use]
    pub fn holds_slot(&self, task_id: &str) -> bool {
        self.lock_slots().contains(task_id)
    }

    /// Returns true if at least one slot is free.
    #[must_use]
    pub fn has_free_slot(&self) -> bool {
        self.lock_slots().len() < self.policy.max_concurrent
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashSet<String>> {
        // Slot bookkeeping stays consistent even if a holder panicked.
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
