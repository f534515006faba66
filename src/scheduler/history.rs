//! Paged download history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Scheduler;
use crate::stats::{DownloadStats, StatsAggregator};
use crate::task::{DownloadTask, TaskStatus};

/// Page size used when a filter does not set one.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// History query. Date bounds are inclusive and apply to `created_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub status: Option<TaskStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Page size; `None` or zero means [`DEFAULT_HISTORY_LIMIT`].
    pub limit: Option<usize>,
    pub offset: usize,
}

impl HistoryFilter {
    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn created_between(mut self, after: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        self.created_after = Some(after);
        self.created_before = Some(before);
        self
    }

    #[must_use]
    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    fn matches(&self, task: &DownloadTask) -> bool {
        self.status.is_none_or(|status| task.status == status)
            && self.created_after.is_none_or(|after| task.created_at >= after)
            && self.created_before.is_none_or(|before| task.created_at <= before)
    }

    fn limit(&self) -> usize {
        match self.limit {
            Some(limit) if limit > 0 => limit,
            _ => DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// One page of history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Matching tasks, newest first.
    pub tasks: Vec<DownloadTask>,
    /// Number of matching tasks before paging.
    pub total: usize,
    /// Statistics over all of the user's tasks, ignoring the filter.
    pub stats: DownloadStats,
}

impl Scheduler {
    /// Returns the user's download history.
    #[must_use]
    pub fn history(&self, user_id: &str, filter: &HistoryFilter) -> HistoryPage {
        let all = self.inner.store.list_by_user(user_id);
        let stats = StatsAggregator::compute(&all);

        let mut matching: Vec<DownloadTask> =
            all.into_iter().filter(|task| filter.matches(task)).collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        let total = matching.len();
        let tasks = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit())
            .collect();

        HistoryPage {
            tasks,
            total,
            stats,
        }
    }
}
