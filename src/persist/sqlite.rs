//! `SQLite` implementation of [`TaskSink`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::{debug, instrument};

use super::{SinkError, TaskSink};
use crate::db::Database;
use crate::task::{DownloadTask, TaskStatus};

/// Persists task snapshots into the `download_tasks` table.
#[derive(Debug, Clone)]
pub struct SqliteTaskSink {
    db: Database,
}

impl SqliteTaskSink {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }
}

/// Raw row; timestamps are RFC 3339 text and counters are `i64`.
#[derive(Debug, FromRow)]
struct TaskRow {
    id: String,
    user_id: String,
    content_id: String,
    content_title: String,
    quality: String,
    format: String,
    source_url: String,
    status: String,
    total_bytes: i64,
    transferred_bytes: i64,
    speed_bytes_per_sec: i64,
    priority: i64,
    retry_count: i64,
    max_retries: i64,
    error_message: Option<String>,
    created_at: String,
    started_at: Option<String>,
    paused_at: Option<String>,
    completed_at: Option<String>,
    finished_at: Option<String>,
    updated_at: String,
}

impl TryFrom<TaskRow> for DownloadTask {
    type Error = SinkError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| SinkError::Corrupt {
            id: row.id.clone(),
            reason,
        };
        let time = |value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("invalid timestamp {value}: {e}")))
        };
        let optional_time = |value: Option<&String>| value.map(|v| time(v.as_str())).transpose();
        let unsigned = |name: &str, value: i64| {
            u64::try_from(value).map_err(|_| corrupt(format!("negative {name}: {value}")))
        };
        let small = |name: &str, value: i64| {
            u32::try_from(value).map_err(|_| corrupt(format!("out of range {name}: {value}")))
        };

        let status: TaskStatus = row.status.parse().map_err(corrupt)?;
        let priority = u8::try_from(row.priority)
            .map_err(|_| corrupt(format!("out of range priority: {}", row.priority)))?;

        Ok(Self {
            status,
            total_bytes: unsigned("total_bytes", row.total_bytes)?,
            transferred_bytes: unsigned("transferred_bytes", row.transferred_bytes)?,
            speed_bytes_per_sec: unsigned("speed_bytes_per_sec", row.speed_bytes_per_sec)?,
            priority,
            retry_count: small("retry_count", row.retry_count)?,
            max_retries: small("max_retries", row.max_retries)?,
            created_at: time(row.created_at.as_str())?,
            started_at: optional_time(row.started_at.as_ref())?,
            paused_at: optional_time(row.paused_at.as_ref())?,
            completed_at: optional_time(row.completed_at.as_ref())?,
            finished_at: optional_time(row.finished_at.as_ref())?,
            updated_at: time(row.updated_at.as_str())?,
            error_message: row.error_message.clone(),
            id: row.id.clone(),
            user_id: row.user_id.clone(),
            content_id: row.content_id.clone(),
            content_title: row.content_title.clone(),
            quality: row.quality.clone(),
            format: row.format.clone(),
            source_url: row.source_url.clone(),
        })
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_text(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(|at| at.to_rfc3339())
}

#[async_trait]
impl TaskSink for SqliteTaskSink {
    #[instrument(skip(self, task), fields(task_id = %task.id, status = %task.status))]
    async fn save(&self, task: &DownloadTask) -> Result<(), SinkError> {
        sqlx::query(
            r"INSERT INTO download_tasks (
                id, user_id, content_id, content_title, quality, format, source_url,
                status, total_bytes, transferred_bytes, speed_bytes_per_sec, priority,
                retry_count, max_retries, error_message,
                created_at, started_at, paused_at, completed_at, finished_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                transferred_bytes = excluded.transferred_bytes,
                speed_bytes_per_sec = excluded.speed_bytes_per_sec,
                priority = excluded.priority,
                retry_count = excluded.retry_count,
                max_retries = excluded.max_retries,
                error_message = excluded.error_message,
                started_at = excluded.started_at,
                paused_at = excluded.paused_at,
                completed_at = excluded.completed_at,
                finished_at = excluded.finished_at,
                updated_at = excluded.updated_at",
        )
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(&task.content_id)
        .bind(&task.content_title)
        .bind(&task.quality)
        .bind(&task.format)
        .bind(&task.source_url)
        .bind(task.status.as_str())
        .bind(to_i64(task.total_bytes))
        .bind(to_i64(task.transferred_bytes))
        .bind(to_i64(task.speed_bytes_per_sec))
        .bind(i64::from(task.priority))
        .bind(i64::from(task.retry_count))
        .bind(i64::from(task.max_retries))
        .bind(task.error_message.as_deref())
        .bind(task.created_at.to_rfc3339())
        .bind(to_text(task.started_at))
        .bind(to_text(task.paused_at))
        .bind(to_text(task.completed_at))
        .bind(to_text(task.finished_at))
        .bind(task.updated_at.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        debug!("task saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, task_id: &str) -> Result<(), SinkError> {
        let result = sqlx::query(r"DELETE FROM download_tasks WHERE id = ?")
            .bind(task_id)
            .execute(self.db.pool())
            .await?;
        debug!(rows = result.rows_affected(), "task deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_all(&self) -> Result<Vec<DownloadTask>, SinkError> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r"SELECT * FROM download_tasks ORDER BY priority DESC, created_at ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        let tasks = rows
            .into_iter()
            .map(DownloadTask::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = tasks.len(), "tasks loaded");
        Ok(tasks)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collab::ContentVariant;
    use crate::task::CreateDownloadRequest;

    async fn sink() -> SqliteTaskSink {
        SqliteTaskSink::new(Database::new_in_memory().await.unwrap())
    }

    fn task(id: &str) -> DownloadTask {
        let request = CreateDownloadRequest::new("u1", "42", "HD", "mkv");
        let variant = ContentVariant::new("HD", "mkv", 1000, "https://example.com/42.mkv");
        DownloadTask::new(id.to_string(), &request, "Sample", &variant, 3, Utc::now())
    }

    #[tokio::test]
    async fn test_save_and_load_preserves_fields() {
        let sink = sink().await;
        let mut task = task("t1");
        task.start(Utc::now()).unwrap();
        task.record_progress(400, 100, Utc::now());
        task.pause(Utc::now()).unwrap();

        sink.save(&task).await.unwrap();
        let loaded = sink.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);

        let restored = &loaded[0];
        assert_eq!(restored.status, TaskStatus::Paused);
        assert_eq!(restored.transferred_bytes, 400);
        assert_eq!(restored.content_title, "Sample");
        assert_eq!(
            restored.started_at.map(|t| t.timestamp_millis()),
            task.started_at.map(|t| t.timestamp_millis())
        );
        assert!(restored.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_save_upserts() {
        let sink = sink().await;
        let mut task = task("t1");
        sink.save(&task).await.unwrap();
        task.start(Utc::now()).unwrap();
        sink.save(&task).await.unwrap();

        let loaded = sink.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, TaskStatus::Downloading);
    }

    #[tokio::test]
    async fn test_delete_removes_row() {
        let sink = sink().await;
        sink.save(&task("t1")).await.unwrap();
        sink.save(&task("t2")).await.unwrap();
        sink.delete("t1").await.unwrap();
        sink.delete("missing").await.unwrap();

        let ids: Vec<String> = sink
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["t2"]);
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_reported() {
        let sink = sink().await;
        sink.save(&task("t1")).await.unwrap();
        sqlx::query("UPDATE download_tasks SET created_at = 'yesterday' WHERE id = 't1'")
            .execute(sink.database().pool())
            .await
            .unwrap();

        let err = sink.load_all().await.unwrap_err();
        assert!(matches!(err, SinkError::Corrupt { ref id, .. } if id == "t1"));
    }
}
