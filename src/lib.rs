//! Download Scheduler Library
//!
//! This library provides the download task scheduler behind a movie/photo
//! catalog: it accepts download requests, enforces concurrency and daily quota
//! limits, drives per-task progress, and retries failed transfers with backoff.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`task`] - Download task model and lifecycle transitions
//! - [`store`] - In-process task store keyed by task id
//! - [`admission`] - Concurrency slots and per-user daily quota
//! - [`progress`] - One cancellable progress worker per downloading task
//! - [`scheduler`] - Orchestrator; the only component that mutates the store
//! - [`stats`] - Aggregate statistics derived from task snapshots
//! - [`persist`] - Persistence sink seam with a `SQLite` implementation
//! - [`retry`] - Backoff policy for automatic retries
//! - [`events`] - Broadcast notifications for a presentation layer
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use download_scheduler::{
//!     ContentInfo, ContentVariant, CreateDownloadRequest, Scheduler, StaticCatalog,
//!     StaticUserDirectory, SubscriptionTier,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = StaticCatalog::new().with_content(
//!     "1",
//!     ContentInfo::new("Avatar: The Way of Water").with_variant(ContentVariant::new(
//!         "HD",
//!         "mkv",
//!         8 * 1024 * 1024 * 1024,
//!         "https://example.com/avatar2-hd.mkv",
//!     )),
//! );
//! let users = StaticUserDirectory::allow_all(SubscriptionTier::Premium);
//! let scheduler = Scheduler::builder(Arc::new(catalog), Arc::new(users)).build()?;
//!
//! let outcome = scheduler
//!     .create(CreateDownloadRequest::new("user-1", "1", "HD", "mkv"))
//!     .await?;
//! println!("{}", outcome.message);
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admission;
pub mod collab;
pub mod config;
pub mod db;
pub mod events;
pub mod persist;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod task;

// Re-export commonly used types
pub use admission::{
    AdmissionController, AdmissionDecision, AdmissionPolicy, DenyReason, MIN_FREE_SPACE,
};
pub use collab::{
    AccountStatus, ContentCatalog, ContentInfo, ContentVariant, FixedStorage, StaticCatalog,
    StaticUserDirectory, StorageProbe, SubscriptionTier, UserDirectory, UserProfile,
};
pub use config::{ConfigError, SchedulerConfig};
pub use db::{Database, DatabaseOptions, DbError};
pub use events::{TaskEvent, TaskEventKind};
pub use persist::{MemorySink, SinkError, SqliteTaskSink, TaskSink};
pub use progress::{
    Chunk, ProgressReporter, ProgressSink, SimulatedTransfer, TickControl, TickOutcome, Transfer,
    TransferError,
};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy};
pub use scheduler::{
    BatchFailure, BatchOperation, BatchResult, CreateDisposition, CreateOutcome, ErrorKind,
    DEFAULT_HISTORY_LIMIT, HistoryFilter, HistoryPage, Scheduler, SchedulerBuilder, SchedulerError,
};
pub use stats::{DownloadStats, StatsAggregator, format_bytes, format_rate};
pub use store::{StoreError, TaskStore};
pub use task::{CreateDownloadRequest, DownloadTask, Priority, TaskStatus, TransitionError};
