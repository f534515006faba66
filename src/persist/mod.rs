//! Persistence sink for task snapshots.
//!
//! The scheduler writes a snapshot after every lifecycle transition and
//! deletes the record on removal. Progress ticks are not persisted. Sink
//! failures are logged by the scheduler and never fail a command.

mod sqlite;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

pub use sqlite::SqliteTaskSink;

use crate::task::DownloadTask;

/// Errors from a [`TaskSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    /// The underlying database failed.
    #[error("task sink database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored record could not be turned back into a task.
    #[error("corrupt task record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Durable storage for task snapshots.
#[async_trait]
pub trait TaskSink: Send + Sync {
    /// Inserts or replaces the task's record.
    async fn save(&self, task: &DownloadTask) -> Result<(), SinkError>;

    /// Deletes the task's record. Deleting a missing record is not an error.
    async fn delete(&self, task_id: &str) -> Result<(), SinkError>;

    /// Loads every stored task.
    async fn load_all(&self) -> Result<Vec<DownloadTask>, SinkError>;
}

/// In-memory sink, mainly for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: DashMap<String, DownloadTask>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored snapshot of a task.
    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<DownloadTask> {
        self.records.get(task_id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TaskSink for MemorySink {
    async fn save(&self, task: &DownloadTask) -> Result<(), SinkError> {
        self.records.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn delete(&self, task_id: &str) -> Result<(), SinkError> {
        self.records.remove(task_id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<DownloadTask>, SinkError> {
        Ok(self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::collab::ContentVariant;
    use crate::task::CreateDownloadRequest;

    #[tokio::test]
    async fn test_memory_sink_save_replace_delete() {
        let sink = MemorySink::new();
        let request = CreateDownloadRequest::new("u1", "42", "HD", "mkv");
        let variant = ContentVariant::new("HD", "mkv", 100, "https://example.com/x");
        let mut task =
            DownloadTask::new("t1".to_string(), &request, "X", &variant, 3, Utc::now());

        sink.save(&task).await.unwrap();
        task.priority = 9;
        sink.save(&task).await.unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.get("t1").unwrap().priority, 9);

        sink.delete("t1").await.unwrap();
        sink.delete("t1").await.unwrap();
        assert!(sink.load_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_sink_error_corrupt_message() {
        let err = SinkError::Corrupt {
            id: "t1".to_string(),
            reason: "invalid task status: exploded".to_string(),
        };
        assert!(err.to_string().contains("corrupt task record t1"));
    }
}
