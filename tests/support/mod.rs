//! Shared fixtures for scheduler integration tests.
//!
//! Provides a small catalog, user directories, and deterministic transfer
//! backends so tests never depend on the random simulated speed.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use download_scheduler::{
    Chunk, ContentInfo, ContentVariant, CreateDownloadRequest, DownloadTask, Scheduler,
    SchedulerConfig, StaticCatalog, StaticUserDirectory, SubscriptionTier, TaskSink, TaskStatus,
    Transfer, TransferError,
};

/// Size of every catalog variant.
pub const CONTENT_SIZE: u64 = 1_000;

/// Premium user; never subject to the daily quota.
pub const USER: &str = "user-1";

/// Another premium user.
pub const OTHER_USER: &str = "user-2";

/// Catalog with ids "1" to "8", each offering HD/mkv and 4K/mp4.
pub fn catalog() -> StaticCatalog {
    let catalog = StaticCatalog::new();
    for id in 1..=8 {
        catalog.insert(
            id.to_string(),
            ContentInfo::new(format!("Title {id}"))
                .with_variant(ContentVariant::new(
                    "HD",
                    "mkv",
                    CONTENT_SIZE,
                    format!("https://cdn.example.com/{id}-hd.mkv"),
                ))
                .with_variant(ContentVariant::new(
                    "4K",
                    "mp4",
                    CONTENT_SIZE * 4,
                    format!("https://cdn.example.com/{id}-4k.mp4"),
                )),
        );
    }
    catalog
}

/// Config with fast ticks and no automatic retry.
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: Duration::from_millis(10),
        attempt_timeout: Duration::from_millis(500),
        auto_retry: false,
        retry_base_delay: Duration::from_millis(20),
        retry_max_delay: Duration::from_millis(100),
        ..SchedulerConfig::default()
    }
}

/// Scheduler over the test catalog with premium users.
pub fn scheduler(config: SchedulerConfig, transfer: Arc<dyn Transfer>) -> Scheduler {
    Scheduler::builder(
        Arc::new(catalog()),
        Arc::new(StaticUserDirectory::allow_all(SubscriptionTier::Premium)),
    )
    .config(config)
    .transfer(transfer)
    .build()
    .expect("valid test config")
}

/// Scheduler that persists through `sink`.
pub fn scheduler_with_sink(
    config: SchedulerConfig,
    transfer: Arc<dyn Transfer>,
    sink: Arc<dyn TaskSink>,
) -> Scheduler {
    Scheduler::builder(
        Arc::new(catalog()),
        Arc::new(StaticUserDirectory::allow_all(SubscriptionTier::Premium)),
    )
    .config(config)
    .transfer(transfer)
    .sink(sink)
    .build()
    .expect("valid test config")
}

pub fn request(content_id: &str) -> CreateDownloadRequest {
    CreateDownloadRequest::new(USER, content_id, "HD", "mkv")
}

/// Creates a download that must be admitted and returns it.
pub async fn create_running(scheduler: &Scheduler, content_id: &str) -> DownloadTask {
    scheduler
        .create(request(content_id))
        .await
        .expect("create succeeds")
        .into_result()
        .expect("download admitted")
}

/// Polls until the task reaches `status` or two seconds pass.
pub async fn wait_for_status(
    scheduler: &Scheduler,
    id: &str,
    user_id: &str,
    status: TaskStatus,
) -> DownloadTask {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let task = scheduler.get(id, user_id).expect("task exists");
        if task.status == status {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {id} stuck in {} waiting for {status}",
            task.status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Delivers a fixed number of bytes per tick.
#[derive(Debug)]
pub struct FixedTransfer {
    pub bytes_per_tick: u64,
}

impl FixedTransfer {
    pub fn new(bytes_per_tick: u64) -> Arc<Self> {
        Arc::new(Self { bytes_per_tick })
    }
}

#[async_trait]
impl Transfer for FixedTransfer {
    async fn advance(&self, _task: &DownloadTask, _tick: Duration) -> Result<Chunk, TransferError> {
        Ok(Chunk {
            bytes: self.bytes_per_tick,
            speed_bytes_per_sec: self.bytes_per_tick * 100,
        })
    }
}

/// Never makes progress; tasks stay `Downloading` until told otherwise.
#[derive(Debug)]
pub struct StalledTransfer;

impl StalledTransfer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Transfer for StalledTransfer {
    async fn advance(&self, _task: &DownloadTask, _tick: Duration) -> Result<Chunk, TransferError> {
        Ok(Chunk {
            bytes: 0,
            speed_bytes_per_sec: 0,
        })
    }
}

/// Fails the first `failures` attempts, then delivers `bytes_per_tick`.
#[derive(Debug)]
pub struct FlakyTransfer {
    failures_left: AtomicUsize,
    bytes_per_tick: u64,
    pub attempts: AtomicUsize,
}

impl FlakyTransfer {
    pub fn new(failures: usize, bytes_per_tick: u64) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(failures),
            bytes_per_tick,
            attempts: AtomicUsize::new(0),
        })
    }

    /// Always fails.
    pub fn always_failing() -> Arc<Self> {
        Self::new(usize::MAX, 0)
    }
}

#[async_trait]
impl Transfer for FlakyTransfer {
    async fn advance(&self, task: &DownloadTask, _tick: Duration) -> Result<Chunk, TransferError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransferError::Network {
                url: task.source_url.clone(),
                message: "connection reset by peer".to_string(),
            });
        }
        Ok(Chunk {
            bytes: self.bytes_per_tick,
            speed_bytes_per_sec: self.bytes_per_tick * 100,
        })
    }
}

/// Sleeps longer than any test attempt timeout.
#[derive(Debug)]
pub struct HangingTransfer;

#[async_trait]
impl Transfer for HangingTransfer {
    async fn advance(&self, _task: &DownloadTask, _tick: Duration) -> Result<Chunk, TransferError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Chunk {
            bytes: 0,
            speed_bytes_per_sec: 0,
        })
    }
}

/// Fails the first attempt on one title; every other attempt stalls.
#[derive(Debug)]
pub struct FailOnceTransfer {
    content_id: String,
    failed: AtomicBool,
}

impl FailOnceTransfer {
    pub fn new(content_id: &str) -> Arc<Self> {
        Arc::new(Self {
            content_id: content_id.to_string(),
            failed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transfer for FailOnceTransfer {
    async fn advance(&self, task: &DownloadTask, _tick: Duration) -> Result<Chunk, TransferError> {
        if task.content_id == self.content_id && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(TransferError::Network {
                url: task.source_url.clone(),
                message: "connection reset by peer".to_string(),
            });
        }
        Ok(Chunk {
            bytes: 0,
            speed_bytes_per_sec: 0,
        })
    }
}
