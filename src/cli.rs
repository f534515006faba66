//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use download_scheduler::SubscriptionTier;

/// Simulate a batch of catalog downloads through the scheduler.
///
/// Creates one download per generated title for a single user, prints task
/// events as they happen, and finishes with aggregate statistics. Values not
/// given on the command line fall back to the config file, then to defaults.
#[derive(Parser, Debug)]
#[command(name = "download-scheduler")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// User the downloads are created for
    #[arg(short, long, default_value = "demo-user")]
    pub user: String,

    /// Subscription tier of the user (free users have a daily quota)
    #[arg(long, value_enum)]
    pub tier: Option<TierArg>,

    /// Number of downloads to create (1-50)
    #[arg(short = 'n', long, default_value_t = 5, value_parser = clap::value_parser!(u16).range(1..=50))]
    pub tasks: u16,

    /// Size of each simulated title in MiB (1-10240)
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u64).range(1..=10240))]
    pub size_mib: u64,

    /// Maximum concurrent downloads (1-10)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_concurrent: Option<u8>,

    /// Downloads a free-tier user may start per day (1-1000)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub daily_limit: Option<u16>,

    /// Retry budget per download (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Progress tick interval in milliseconds (10-60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(10..=60000))]
    pub tick_ms: Option<u64>,

    /// Probability that a progress tick fails (0.0-1.0)
    #[arg(long, value_parser = parse_probability)]
    pub failure_rate: Option<f64>,

    /// Keep refused downloads pending until a slot frees up
    #[arg(long)]
    pub queue_when_busy: bool,

    /// Do not retry failed downloads automatically
    #[arg(long)]
    pub no_auto_retry: bool,

    /// Persist tasks to this SQLite file and restore them on start
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Print the final statistics as JSON
    #[arg(long)]
    pub json: bool,
}

/// Subscription tier accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TierArg {
    Free,
    Premium,
    Vip,
}

impl From<TierArg> for SubscriptionTier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Free => Self::Free,
            TierArg::Premium => Self::Premium,
            TierArg::Vip => Self::Vip,
        }
    }
}

fn parse_probability(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{value} is not in 0.0..=1.0"));
    }
    Ok(value)
}
