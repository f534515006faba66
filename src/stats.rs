//! Aggregate statistics over task snapshots.

use serde::{Deserialize, Serialize};

use crate::task::{DownloadTask, TaskStatus};

/// Summary of a set of tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadStats {
    pub total: usize,
    pub pending: usize,
    pub downloading: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Mean bytes/sec over completed tasks with a measurable duration.
    pub average_speed: f64,
}

/// Computes [`DownloadStats`]. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsAggregator;

impl StatsAggregator {
    /// Summarizes the given snapshot. Computing twice over the same input
    /// gives the same result.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(tasks: &[DownloadTask]) -> DownloadStats {
        let mut stats = DownloadStats {
            total: tasks.len(),
            ..DownloadStats::default()
        };
        let mut speed_sum = 0.0_f64;
        let mut speed_samples = 0_u32;

        for task in tasks {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Downloading => stats.downloading += 1,
                TaskStatus::Paused => stats.paused += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
            stats.total_bytes += task.total_bytes;
            stats.transferred_bytes += task.transferred_bytes;

            if task.status != TaskStatus::Completed {
                continue;
            }
            let (Some(started), Some(completed)) = (task.started_at, task.completed_at) else {
                continue;
            };
            let elapsed_ms = (completed - started).num_milliseconds();
            if elapsed_ms <= 0 {
                continue;
            }
            speed_sum += task.transferred_bytes as f64 / (elapsed_ms as f64 / 1000.0);
            speed_samples += 1;
        }

        if speed_samples > 0 {
            stats.average_speed = speed_sum / f64::from(speed_samples);
        }
        stats
    }
}

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Formats a byte count with binary units, e.g. `1.5 GB`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    format_scaled(bytes as f64)
}

/// Formats a transfer rate, e.g. `1.5 MB/s`.
#[must_use]
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_scaled(bytes_per_sec.max(0.0)))
}

fn format_scaled(value: f64) -> String {
    let mut scaled = value;
    let mut unit = 0;
    while scaled >= 1024.0 && unit < UNITS.len() - 1 {
        scaled /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{scaled:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::collab::ContentVariant;
    use crate::task::CreateDownloadRequest;

    fn task(status: TaskStatus, total: u64, transferred: u64) -> DownloadTask {
        let request = CreateDownloadRequest::new("u1", "42", "HD", "mkv");
        let variant = ContentVariant::new("HD", "mkv", total, "https://example.com/x");
        let mut task = DownloadTask::new("t".to_string(), &request, "X", &variant, 3, Utc::now());
        task.status = status;
        task.transferred_bytes = transferred;
        task
    }

    #[test]
    fn test_compute_counts_each_status() {
        let tasks = vec![
            task(TaskStatus::Pending, 10, 0),
            task(TaskStatus::Downloading, 10, 5),
            task(TaskStatus::Paused, 10, 2),
            task(TaskStatus::Failed, 10, 1),
            task(TaskStatus::Cancelled, 10, 0),
        ];
        let stats = StatsAggregator::compute(&tasks);
        assert_eq!(stats.total, 5);
        assert_eq!(
            (stats.pending, stats.downloading, stats.paused, stats.failed, stats.cancelled),
            (1, 1, 1, 1, 1)
        );
        assert_eq!(stats.total_bytes, 50);
        assert_eq!(stats.transferred_bytes, 8);
        assert!(stats.average_speed.abs() < f64::EPSILON);
    }

    #[test]
    fn test_average_speed_over_completed_tasks() {
        let now = Utc::now();
        let mut fast = task(TaskStatus::Completed, 4000, 4000);
        fast.started_at = Some(now - Duration::seconds(2));
        fast.completed_at = Some(now);
        let mut slow = task(TaskStatus::Completed, 1000, 1000);
        slow.started_at = Some(now - Duration::seconds(1));
        slow.completed_at = Some(now);
        let mut instant = task(TaskStatus::Completed, 1000, 1000);
        instant.started_at = Some(now);
        instant.completed_at = Some(now);

        let stats = StatsAggregator::compute(&[fast, slow, instant]);
        assert_eq!(stats.completed, 3);
        assert!((stats.average_speed - 1500.0).abs() < 1e-6);
    }

    #[test]
    fn test_compute_is_idempotent() {
        let tasks = vec![task(TaskStatus::Downloading, 10, 5)];
        assert_eq!(
            StatsAggregator::compute(&tasks),
            StatsAggregator::compute(&tasks)
        );
        assert_eq!(StatsAggregator::compute(&[]), DownloadStats::default());
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_rate(1.5 * 1024.0 * 1024.0), "1.5 MB/s");
        assert_eq!(format_bytes(8 * 1024 * 1024 * 1024), "8 GB");
    }
}
