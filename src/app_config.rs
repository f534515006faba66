//! File configuration and merging with command-line flags.
//!
//! The config file is a flat list of `key = value` lines. Strings are double
//! quoted, `#` starts a comment outside of strings, unknown keys are errors.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use download_scheduler::{DatabaseOptions, SchedulerConfig, SubscriptionTier};

use crate::cli::Args;

const APP_DIR: &str = "download-scheduler";
const CONFIG_FILE: &str = "config.toml";

const ATTEMPT_TIMEOUT_RANGE: RangeInclusive<u64> = 1..=3600;
const RETRY_DELAY_MS_RANGE: RangeInclusive<u64> = 1..=600_000;
const DB_MAX_CONNECTIONS_RANGE: RangeInclusive<u32> = 1..=20;
const DB_BUSY_TIMEOUT_MS_RANGE: RangeInclusive<u64> = 0..=120_000;

/// Values read from the config file. `None` means not set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileConfig {
    pub max_concurrent: Option<u8>,
    pub daily_limit: Option<u16>,
    pub max_retries: Option<u8>,
    pub tick_ms: Option<u64>,
    pub attempt_timeout_secs: Option<u64>,
    pub auto_retry: Option<bool>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub queue_when_busy: Option<bool>,
    pub failure_rate: Option<f64>,
    pub tier: Option<SubscriptionTier>,
    pub db_path: Option<PathBuf>,
    pub db_max_connections: Option<u32>,
    pub db_busy_timeout_ms: Option<u64>,
    pub verbosity: Option<Verbosity>,
}

/// Log verbosity that can be set in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Default,
    Verbose,
    Quiet,
}

impl Verbosity {
    /// Default tracing filter for this verbosity.
    #[must_use]
    pub fn filter(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
        }
    }
}

impl FromStr for Verbosity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Self::Default),
            "verbose" => Ok(Self::Verbose),
            "quiet" => Ok(Self::Quiet),
            _ => bail!("Expected one of: default, verbose, quiet"),
        }
    }
}

/// Settings for one run after merging flags, file values and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub scheduler: SchedulerConfig,
    pub tier: SubscriptionTier,
    pub failure_rate: f64,
    pub db_path: Option<PathBuf>,
    pub db_options: DatabaseOptions,
}

/// Merges command-line flags over file values over defaults.
///
/// # Errors
///
/// Fails when the merged scheduler config is invalid, e.g. a retry max delay
/// shorter than the base delay.
pub fn resolve_settings(args: &Args, file: Option<&FileConfig>) -> Result<Settings> {
    let file = file.cloned().unwrap_or_default();
    let defaults = SchedulerConfig::default();
    let mut db_options = DatabaseOptions::default();
    if let Some(max) = file.db_max_connections {
        db_options.max_connections = max;
    }
    if let Some(busy) = file.db_busy_timeout_ms {
        db_options.busy_timeout_ms = busy;
    }

    let scheduler = SchedulerConfig {
        max_concurrent: args
            .max_concurrent
            .or(file.max_concurrent)
            .map_or(defaults.max_concurrent, usize::from),
        daily_limit: args
            .daily_limit
            .or(file.daily_limit)
            .map_or(defaults.daily_limit, usize::from),
        max_retries: args
            .max_retries
            .or(file.max_retries)
            .map_or(defaults.max_retries, u32::from),
        tick_interval: args
            .tick_ms
            .or(file.tick_ms)
            .map_or(defaults.tick_interval, Duration::from_millis),
        attempt_timeout: file
            .attempt_timeout_secs
            .map_or(defaults.attempt_timeout, Duration::from_secs),
        auto_retry: !args.no_auto_retry && file.auto_retry.unwrap_or(defaults.auto_retry),
        retry_base_delay: file
            .retry_base_delay_ms
            .map_or(defaults.retry_base_delay, Duration::from_millis),
        retry_max_delay: file
            .retry_max_delay_ms
            .map_or(defaults.retry_max_delay, Duration::from_millis),
        queue_when_busy: args.queue_when_busy || file.queue_when_busy.unwrap_or(false),
        event_capacity: defaults.event_capacity,
    };
    scheduler
        .validate()
        .context("Invalid scheduler configuration")?;

    Ok(Settings {
        scheduler,
        tier: args
            .tier
            .map(SubscriptionTier::from)
            .or(file.tier)
            .unwrap_or(SubscriptionTier::Premium),
        failure_rate: args.failure_rate.or(file.failure_rate).unwrap_or(0.0),
        db_path: args.db.clone().or(file.db_path),
        db_options,
    })
}

/// Default config path: `$XDG_CONFIG_HOME/download-scheduler/config.toml`,
/// else `$HOME/.config/download-scheduler/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    config_path_from(non_empty_var("XDG_CONFIG_HOME"), non_empty_var("HOME"))
}

fn config_path_from(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    let base = match xdg_config_home {
        Some(xdg) => PathBuf::from(xdg),
        None => PathBuf::from(home?).join(".config"),
    };
    Some(base.join(APP_DIR).join(CONFIG_FILE))
}

fn non_empty_var(name: &str) -> Option<OsString> {
    env::var_os(name).filter(|value| !value.is_empty())
}

/// Loads the config file from the default path. A missing file is not an error.
///
/// # Errors
///
/// Fails when the file exists but cannot be read or parsed.
pub fn load_default_file_config() -> Result<Option<(PathBuf, FileConfig)>> {
    let Some(path) = default_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    let config = load_file_config(&path)?;
    Ok(Some((path, config)))
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (index, raw_line) in raw.lines().enumerate() {
        let line_no = index + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let entry = Entry {
            key: key.trim(),
            value: value.trim(),
            line_no,
        };

        match entry.key {
            "max_concurrent" => cfg.max_concurrent = Some(entry.integer(1..=10)?),
            "daily_limit" => cfg.daily_limit = Some(entry.integer(1..=1000)?),
            "max_retries" => cfg.max_retries = Some(entry.integer(0..=10)?),
            "tick_ms" => cfg.tick_ms = Some(entry.integer(10..=60_000)?),
            "attempt_timeout_secs" => {
                cfg.attempt_timeout_secs = Some(entry.integer(ATTEMPT_TIMEOUT_RANGE)?);
            }
            "auto_retry" => cfg.auto_retry = Some(entry.boolean()?),
            "retry_base_delay_ms" => {
                cfg.retry_base_delay_ms = Some(entry.integer(RETRY_DELAY_MS_RANGE)?);
            }
            "retry_max_delay_ms" => {
                cfg.retry_max_delay_ms = Some(entry.integer(RETRY_DELAY_MS_RANGE)?);
            }
            "queue_when_busy" => cfg.queue_when_busy = Some(entry.boolean()?),
            "failure_rate" => cfg.failure_rate = Some(entry.probability()?),
            "tier" => cfg.tier = Some(entry.parsed()?),
            "db_path" => cfg.db_path = Some(PathBuf::from(entry.string()?)),
            "db_max_connections" => {
                cfg.db_max_connections = Some(entry.integer(DB_MAX_CONNECTIONS_RANGE)?);
            }
            "db_busy_timeout_ms" => {
                cfg.db_busy_timeout_ms = Some(entry.integer(DB_BUSY_TIMEOUT_MS_RANGE)?);
            }
            "verbosity" => cfg.verbosity = Some(entry.parsed()?),
            unknown => bail!("Unknown configuration key: '{unknown}' on line {line_no}"),
        }
    }
    Ok(cfg)
}

/// One `key = value` line.
struct Entry<'a> {
    key: &'a str,
    value: &'a str,
    line_no: usize,
}

impl Entry<'_> {
    fn integer<T>(&self, range: RangeInclusive<T>) -> Result<T>
    where
        T: FromStr + PartialOrd + std::fmt::Display,
    {
        let value: T = self.value.parse().map_err(|_| self.invalid("an integer"))?;
        if !range.contains(&value) {
            bail!(
                "Invalid config value for `{}` on line {}: {value}. Expected range: {}..={}",
                self.key,
                self.line_no,
                range.start(),
                range.end()
            );
        }
        Ok(value)
    }

    fn boolean(&self) -> Result<bool> {
        match self.value {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(self.invalid("'true' or 'false'")),
        }
    }

    fn probability(&self) -> Result<f64> {
        let value: f64 = self.value.parse().map_err(|_| self.invalid("a number"))?;
        if !(0.0..=1.0).contains(&value) {
            return Err(self.invalid("a number from 0.0 to 1.0"));
        }
        Ok(value)
    }

    fn string(&self) -> Result<&str> {
        self.value
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .ok_or_else(|| self.invalid("a double-quoted string"))
    }

    fn parsed<T>(&self) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let text = self.string()?;
        text.parse()
            .map_err(|e| anyhow!("Invalid `{}` value '{text}' on line {}: {e}", self.key, self.line_no))
    }

    fn invalid(&self, expected: &str) -> anyhow::Error {
        anyhow!(
            "Invalid `{}` value on line {}: expected {expected}",
            self.key,
            self.line_no
        )
    }
}

fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '#' if !quoted => return &line[..index],
            _ => {}
        }
    }
    line
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["download-scheduler"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
max_concurrent = 4
tier = "free"
verbosity = "verbose"
"#,
        )
        .unwrap();
        assert_eq!(cfg.max_concurrent, Some(4));
        assert_eq!(cfg.tier, Some(SubscriptionTier::Free));
        assert_eq!(cfg.verbosity, Some(Verbosity::Verbose));
        assert!(cfg.db_path.is_none());
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r#"
daily_limit = 3 # free tier
db_path = "/tmp/tasks#1.db" # hash inside string is kept
"#,
        )
        .unwrap();
        assert_eq!(cfg.daily_limit, Some(3));
        assert_eq!(cfg.db_path, Some(PathBuf::from("/tmp/tasks#1.db")));
    }

    #[test]
    fn test_parse_config_rejects_out_of_range_values() {
        let err = parse_config_str("max_concurrent = 11").unwrap_err();
        assert!(err.to_string().contains("max_concurrent"));
        assert!(err.to_string().contains("1..=10"));

        let err = parse_config_str("failure_rate = 2.0").unwrap_err();
        assert!(err.to_string().contains("failure_rate"));
    }

    #[test]
    fn test_parse_config_rejects_trailing_tokens() {
        let err = parse_config_str("max_retries = 4 trailing").unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_boolean() {
        let err = parse_config_str("auto_retry = yes").unwrap_err();
        assert!(err.to_string().contains("auto_retry"));
    }

    #[test]
    fn test_parse_config_rejects_unquoted_string() {
        let err = parse_config_str("tier = free").unwrap_err();
        assert!(err.to_string().contains("double-quoted"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys_and_bad_syntax() {
        let err = parse_config_str("concurrency = 3").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"));

        let err = parse_config_str("\n\nmax_retries").unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_config_path_prefers_xdg() {
        let path = config_path_from(Some("/xdg".into()), Some("/home/me".into())).unwrap();
        assert_eq!(path, PathBuf::from("/xdg/download-scheduler/config.toml"));

        let path = config_path_from(None, Some("/home/me".into())).unwrap();
        assert_eq!(
            path,
            PathBuf::from("/home/me/.config/download-scheduler/config.toml")
        );
        assert!(config_path_from(None, None).is_none());
    }

    #[test]
    fn test_load_file_config_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "tick_ms = 1").unwrap();
        let err = load_file_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }

    // ==================== Merging ====================

    #[test]
    fn test_resolve_settings_defaults() {
        let settings = resolve_settings(&args(&[]), None).unwrap();
        assert_eq!(settings.scheduler, SchedulerConfig::default());
        assert_eq!(settings.tier, SubscriptionTier::Premium);
        assert!(settings.failure_rate.abs() < f64::EPSILON);
        assert!(settings.db_path.is_none());
    }

    #[test]
    fn test_resolve_settings_flags_override_file() {
        let file = FileConfig {
            max_concurrent: Some(2),
            daily_limit: Some(9),
            tier: Some(SubscriptionTier::Free),
            queue_when_busy: Some(true),
            ..FileConfig::default()
        };
        let settings = resolve_settings(&args(&["-c", "5", "--tier", "vip"]), Some(&file)).unwrap();
        assert_eq!(settings.scheduler.max_concurrent, 5);
        assert_eq!(settings.scheduler.daily_limit, 9);
        assert!(settings.scheduler.queue_when_busy);
        assert_eq!(settings.tier, SubscriptionTier::Vip);
    }

    #[test]
    fn test_resolve_settings_no_auto_retry_flag_wins() {
        let file = FileConfig {
            auto_retry: Some(true),
            ..FileConfig::default()
        };
        let settings = resolve_settings(&args(&["--no-auto-retry"]), Some(&file)).unwrap();
        assert!(!settings.scheduler.auto_retry);
    }

    #[test]
    fn test_resolve_settings_rejects_inverted_retry_delays() {
        let file = FileConfig {
            retry_base_delay_ms: Some(5_000),
            retry_max_delay_ms: Some(1_000),
            ..FileConfig::default()
        };
        let err = resolve_settings(&args(&[]), Some(&file)).unwrap_err();
        assert!(format!("{err:#}").contains("retry_max_delay"));
    }

    #[test]
    fn test_verbosity_filters() {
        assert_eq!(Verbosity::Default.filter(), "info");
        assert_eq!(Verbosity::Verbose.filter(), "debug");
        assert_eq!(Verbosity::Quiet.filter(), "error");
        assert!("loud".parse::<Verbosity>().is_err());
    }
}
