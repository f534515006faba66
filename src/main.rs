//! CLI entry point for the download scheduler simulation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use download_scheduler::{
    ContentInfo, ContentVariant, CreateDisposition, CreateDownloadRequest, Database, Scheduler,
    SimulatedTransfer, SqliteTaskSink, StaticCatalog, StaticUserDirectory, TaskEvent,
    TaskEventKind, TaskSink, TaskStatus, format_bytes, format_rate,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use app_config::{Settings, Verbosity};
use cli::Args;

const MIB: u64 = 1024 * 1024;

/// Formats offered for every generated title.
const VARIANTS: [(&str, &str); 2] = [("HD", "mkv"), ("4K", "mp4")];

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = app_config::load_default_file_config()?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > info
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config
                .as_ref()
                .and_then(|(_, cfg)| cfg.verbosity)
                .unwrap_or(Verbosity::Default)
                .filter(),
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    if let Some((path, _)) = &file_config {
        info!(path = %path.display(), "Loaded config file");
    }
    let settings = app_config::resolve_settings(&args, file_config.as_ref().map(|(_, cfg)| cfg))?;

    run(&args, settings).await
}

async fn run(args: &Args, settings: Settings) -> Result<()> {
    let transfer = SimulatedTransfer::new()
        .with_failure_rate(settings.failure_rate)
        .map_err(|rate| anyhow!("failure rate {rate} is not in 0.0..=1.0"))?;
    let catalog = build_catalog(args.tasks, args.size_mib * MIB);
    let users = StaticUserDirectory::allow_all(settings.tier);

    let mut builder = Scheduler::builder(Arc::new(catalog), Arc::new(users))
        .config(settings.scheduler.clone())
        .transfer(Arc::new(transfer));
    if let Some(path) = &settings.db_path {
        let db = Database::new_with_options(path, settings.db_options)
            .await
            .with_context(|| format!("Failed to open task database '{}'", path.display()))?;
        let sink: Arc<dyn TaskSink> = Arc::new(SqliteTaskSink::new(db));
        builder = builder.sink(sink);
    }
    let scheduler = builder.build()?;

    let restored = scheduler
        .restore_from_sink()
        .await
        .context("Failed to restore tasks")?;
    if restored > 0 {
        info!(restored, "Restored tasks from previous run");
    }

    let mut events = scheduler.subscribe();
    info!(
        user = %args.user,
        tier = %settings.tier,
        tasks = args.tasks,
        max_concurrent = settings.scheduler.max_concurrent,
        "Simulation starting"
    );

    let mut watched = HashSet::new();
    for content in 1..=args.tasks {
        let (quality, format) = VARIANTS[usize::from(content) % VARIANTS.len()];
        let request = CreateDownloadRequest::new(&args.user, content.to_string(), quality, format);
        let outcome = scheduler.create(request).await?;
        match (&outcome.disposition, &outcome.task) {
            (CreateDisposition::Denied, _) | (_, None) => {
                println!("[refused]   title {content}: {}", outcome.message);
            }
            (_, Some(task)) => {
                println!("[{:<9}] {} {}", outcome.disposition.as_str(), task.id, task.content_title);
                watched.insert(task.id.clone());
            }
        }
    }

    let idle_limit = idle_limit(&settings);
    loop {
        if all_settled(&scheduler, &args.user, &watched) {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping downloads");
                break;
            }
            received = tokio::time::timeout(idle_limit, events.recv()) => match received {
                Ok(Ok(event)) => print_event(&event),
                Ok(Err(RecvError::Lagged(skipped))) => debug!(skipped, "Event stream lagged"),
                Ok(Err(RecvError::Closed)) => break,
                Err(_) => {
                    warn!(idle_secs = idle_limit.as_secs(), "No task activity, stopping");
                    break;
                }
            },
        }
    }

    scheduler.shutdown();
    print_summary(&scheduler, &args.user, args.json)
}

fn build_catalog(titles: u16, size_bytes: u64) -> StaticCatalog {
    let catalog = StaticCatalog::new();
    for content in 1..=titles {
        let mut info = ContentInfo::new(format!("Episode {content}"));
        for (multiplier, (quality, format)) in (1..).zip(VARIANTS) {
            info = info.with_variant(ContentVariant::new(
                quality,
                format,
                size_bytes * multiplier,
                format!(
                    "https://cdn.example.com/content/{content}/{}.{format}",
                    quality.to_ascii_lowercase()
                ),
            ));
        }
        catalog.insert(content.to_string(), info);
    }
    catalog
}

/// Longest quiet period before the simulation gives up waiting.
fn idle_limit(settings: &Settings) -> Duration {
    let config = &settings.scheduler;
    config.tick_interval + config.attempt_timeout + config.retry_max_delay
}

/// True once no watched task can make further progress on its own.
fn all_settled(scheduler: &Scheduler, user: &str, watched: &HashSet<String>) -> bool {
    scheduler
        .list(user)
        .iter()
        .filter(|task| watched.contains(&task.id))
        .all(|task| match task.status {
            TaskStatus::Pending | TaskStatus::Downloading => false,
            // Re-read: a retry may have started since the list was taken.
            TaskStatus::Failed => {
                !scheduler.is_retry_scheduled(&task.id)
                    && scheduler
                        .get(&task.id, user)
                        .is_ok_and(|current| current.status == TaskStatus::Failed)
            }
            TaskStatus::Paused | TaskStatus::Completed | TaskStatus::Cancelled => true,
        })
}

fn print_event(event: &TaskEvent) {
    let task = &event.task;
    match event.kind {
        TaskEventKind::Progress => debug!(
            task_id = %task.id,
            percent = task.progress_percent(),
            speed = %format_rate(task.speed_bytes_per_sec as f64),
            "progress"
        ),
        TaskEventKind::Failed => println!(
            "[failed]    {} {} ({})",
            task.id,
            task.content_title,
            task.error_message.as_deref().unwrap_or("unknown error")
        ),
        TaskEventKind::Retried => println!(
            "[retried]   {} attempt {}/{}",
            task.id, task.retry_count, task.max_retries
        ),
        kind => println!(
            "[{:<9}] {} {} {}",
            kind.as_str(),
            task.id,
            task.content_title,
            format_bytes(task.transferred_bytes)
        ),
    }
}

fn print_summary(scheduler: &Scheduler, user: &str, json: bool) -> Result<()> {
    let stats = scheduler.stats(Some(user));
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!();
    println!(
        "{} tasks: {} completed, {} failed, {} paused, {} pending, {} cancelled",
        stats.total, stats.completed, stats.failed, stats.paused, stats.pending, stats.cancelled
    );
    println!(
        "transferred {} of {}, average speed {}",
        format_bytes(stats.transferred_bytes),
        format_bytes(stats.total_bytes),
        format_rate(stats.average_speed)
    );
    Ok(())
}
