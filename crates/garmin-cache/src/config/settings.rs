//! Runtime settings loaded from the environment (and an optional `.env` file)

use std::env;
use std::path::PathBuf;

use chrono::NaiveDate;

use crate::error::{CacheError, Result};
use crate::storage::default_db_path;

/// Largest day count accepted for a fetch window or retention period
pub const MAX_WINDOW_DAYS: u32 = 36_500;

/// How far back the first sync of a user reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillPolicy {
    /// The last N days
    Days(u32),
    /// Everything since a fixed date
    Since(NaiveDate),
}

/// Fetch-window policy for the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Window for a user with no cached activities
    pub backfill: BackfillPolicy,
    /// Window for every later sync; wider than the sync interval so a missed
    /// run does not leave a gap
    pub incremental_days: u32,
    /// Records starting before this date are never stored
    pub min_start_date: Option<NaiveDate>,
    /// Upper bound on activities read per user when recomputing rollups
    pub rollup_scan_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backfill: BackfillPolicy::Days(90),
            incremental_days: 7,
            min_start_date: None,
            rollup_scan_limit: 10_000,
        }
    }
}

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Cache database file
    pub db_path: PathBuf,
    /// Directory with one token directory per user
    pub tokens_dir: PathBuf,
    /// Garmin Connect domain (garmin.com or garmin.cn)
    pub domain: String,
    pub sync: SyncConfig,
    /// Delete activities older than this many days after each daily run
    pub retention_days: Option<u32>,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
}

impl Settings {
    /// Load settings from environment variables, reading `.env` first if present
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = SyncConfig::default();

        let since = get("GARMIN_CACHE_BACKFILL_SINCE");
        let backfill = match (since, get("GARMIN_CACHE_BACKFILL_DAYS")) {
            (Some(since), _) => BackfillPolicy::Since(parse_date(&since)?),
            (None, Some(days)) => {
                BackfillPolicy::Days(parse_days("GARMIN_CACHE_BACKFILL_DAYS", &days)?)
            }
            (None, None) => defaults.backfill,
        };

        let incremental_days = match get("GARMIN_CACHE_INCREMENTAL_DAYS") {
            Some(v) => parse_days("GARMIN_CACHE_INCREMENTAL_DAYS", &v)?,
            None => defaults.incremental_days,
        };
        if incremental_days == 0 {
            return Err(CacheError::config("GARMIN_CACHE_INCREMENTAL_DAYS must be at least 1"));
        }

        let min_start_date = get("GARMIN_CACHE_MIN_START_DATE")
            .map(|v| parse_date(&v))
            .transpose()?;

        let rollup_scan_limit = match get("GARMIN_CACHE_ROLLUP_SCAN_LIMIT") {
            Some(v) => parse_number("GARMIN_CACHE_ROLLUP_SCAN_LIMIT", &v)?,
            None => defaults.rollup_scan_limit,
        };

        let retention_days = get("GARMIN_CACHE_RETENTION_DAYS")
            .map(|v| parse_days("GARMIN_CACHE_RETENTION_DAYS", &v))
            .transpose()?
            .filter(|days| *days > 0);

        let tokens_dir = match get("GARMIN_CACHE_TOKENS_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => super::default_tokens_dir()?,
        };

        Ok(Self {
            db_path: get("GARMIN_CACHE_DB")
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            tokens_dir,
            domain: get("GARMIN_DOMAIN").unwrap_or_else(|| "garmin.com".to_string()),
            sync: SyncConfig {
                backfill,
                incremental_days,
                min_start_date,
                rollup_scan_limit,
            },
            retention_days,
            log_json: get("GARMIN_CACHE_LOG_FORMAT")
                .is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| CacheError::InvalidDateFormat(value.to_string()))
}

fn parse_days(key: &str, value: &str) -> Result<u32> {
    let days: u32 = parse_number(key, value)?;
    if days > MAX_WINDOW_DAYS {
        return Err(CacheError::config(format!(
            "{} must be at most {} days, got {}",
            key, MAX_WINDOW_DAYS, days
        )));
    }
    Ok(days)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CacheError::config(format!("{} must be a number, got '{}'", key, value)))
}
