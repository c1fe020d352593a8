//! SQLite-backed activity cache
//!
//! Holds the three record kinds of the cache:
//! - users: one row per tracked user, with the sync watermark
//! - cached_activities: one row per remote activity, deduplicated per user
//! - weekly_rollups: one row per user and ISO week
//!
//! Every multi-row mutation runs inside a single transaction. Readers that need
//! to run alongside a sync open their own `CacheStore` on the same file; WAL
//! journaling gives them a consistent snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{
    CachedActivity, NewActivity, RetentionReport, RollupTotals, User, WeeklyRollup,
};
use crate::error::{CacheError, Result};

use super::schema;

/// Storage format for activity start times (local, no offset)
const START_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Storage format for period keys
const DATE_FORMAT: &str = "%Y-%m-%d";

const ACTIVITY_COLUMNS: &str = "user_name, remote_activity_id, activity_type, distance_m,
     elevation_gain_m, duration_s, calories, start_time, payload, fetched_at";

const ROLLUP_COLUMNS: &str = "user_name, period_start, total_distance_m, total_duration_s,
     total_calories, total_activities, computed_at";

/// Persistent cache of users, activities and weekly rollups
pub struct CacheStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl CacheStore {
    /// Open or create the cache database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| CacheError::db("Failed to open cache database", e))?;

        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| CacheError::db("Failed to enable WAL", e))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| CacheError::db("Failed to set busy timeout", e))?;

        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CacheError::db("Failed to open in-memory database", e))?;

        let store = Self { conn, path: None };
        store.migrate()?;
        Ok(store)
    }

    /// Location of the database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn migrate(&self) -> Result<()> {
        schema::migrate(&self.conn)
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Insert or update a user.
    ///
    /// Email and display name are overwritten unconditionally. The watermark is
    /// only replaced when `last_synced_at` is `Some`, so a known sync time never
    /// regresses to null.
    pub fn upsert_user(
        &self,
        user_name: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        last_synced_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let synced = last_synced_at.map(format_timestamp);

        self.conn
            .execute(
                "INSERT INTO users (user_name, email, display_name, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_name) DO UPDATE SET
                     email = excluded.email,
                     display_name = excluded.display_name,
                     last_synced_at = COALESCE(excluded.last_synced_at, users.last_synced_at)",
                params![user_name, email, display_name, synced],
            )
            .map_err(|e| CacheError::db("Failed to upsert user", e))?;

        Ok(())
    }

    /// Get a user by name
    pub fn get_user(&self, user_name: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT user_name, email, display_name, created_at, last_synced_at
                 FROM users WHERE user_name = ?1",
                params![user_name],
                row_to_user,
            )
            .optional()
            .map_err(|e| CacheError::db("Failed to get user", e))
    }

    /// Get a user by account email
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT user_name, email, display_name, created_at, last_synced_at
                 FROM users WHERE email = ?1",
                params![email],
                row_to_user,
            )
            .optional()
            .map_err(|e| CacheError::db("Failed to get user by email", e))
    }

    /// All registered users, ordered by name
    pub fn get_all_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT user_name, email, display_name, created_at, last_synced_at
                 FROM users ORDER BY user_name",
            )
            .map_err(|e| CacheError::db("Failed to prepare query", e))?;

        let rows = stmt
            .query_map([], row_to_user)
            .map_err(|e| CacheError::db("Failed to query users", e))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CacheError::db("Failed to read user row", e))
    }

    /// Delete a user with all of their activities and rollups.
    ///
    /// The three deletions commit together or not at all. Returns whether the
    /// user row existed.
    pub fn delete_user(&self, user_name: &str) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| CacheError::db("Failed to begin transaction", e))?;

        let activities = tx
            .execute("DELETE FROM cached_activities WHERE user_name = ?1", params![user_name])
            .map_err(|e| CacheError::db("Failed to delete activities", e))?;
        let rollups = tx
            .execute("DELETE FROM weekly_rollups WHERE user_name = ?1", params![user_name])
            .map_err(|e| CacheError::db("Failed to delete rollups", e))?;
        let users = tx
            .execute("DELETE FROM users WHERE user_name = ?1", params![user_name])
            .map_err(|e| CacheError::db("Failed to delete user", e))?;

        tx.commit()
            .map_err(|e| CacheError::db("Failed to commit user deletion", e))?;

        tracing::info!(user = user_name, activities, rollups, "Deleted user");
        Ok(users > 0)
    }

    // =========================================================================
    // Activities
    // =========================================================================

    /// Insert or update activities for a user in one transaction.
    ///
    /// Records without a remote id are skipped. On conflict with an existing
    /// `(user_name, remote_activity_id)` every non-key column is overwritten with
    /// the new values. Returns how many records were true inserts; the count comes
    /// from the insert statement's own row count, not a separate lookup.
    pub fn upsert_activities(&self, user_name: &str, records: &[NewActivity]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| CacheError::db("Failed to begin transaction", e))?;

        let mut inserted = 0usize;
        let mut skipped = 0usize;
        {
            let mut insert = tx
                .prepare_cached(
                    "INSERT INTO cached_activities
                         (user_name, remote_activity_id, activity_type, distance_m,
                          elevation_gain_m, duration_s, calories, start_time, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT (user_name, remote_activity_id) DO NOTHING",
                )
                .map_err(|e| CacheError::db("Failed to prepare insert", e))?;

            let mut update = tx
                .prepare_cached(
                    "UPDATE cached_activities SET
                         activity_type = ?3,
                         distance_m = ?4,
                         elevation_gain_m = ?5,
                         duration_s = ?6,
                         calories = ?7,
                         start_time = ?8,
                         payload = ?9,
                         fetched_at = datetime('now')
                     WHERE user_name = ?1 AND remote_activity_id = ?2",
                )
                .map_err(|e| CacheError::db("Failed to prepare update", e))?;

            for record in records {
                let Some(remote_id) = record.remote_activity_id else {
                    skipped += 1;
                    continue;
                };

                let start_time = record
                    .start_time
                    .map(|t| t.format(START_TIME_FORMAT).to_string());
                let payload = serde_json::to_string(&record.payload)?;
                let values = params![
                    user_name,
                    remote_id,
                    record.activity_type,
                    record.distance_m,
                    record.elevation_gain_m,
                    record.duration_s,
                    record.calories,
                    start_time,
                    payload,
                ];

                let changed = insert
                    .execute(values)
                    .map_err(|e| CacheError::db("Failed to insert activity", e))?;

                if changed > 0 {
                    inserted += 1;
                } else {
                    update
                        .execute(values)
                        .map_err(|e| CacheError::db("Failed to update activity", e))?;
                }
            }
        }

        tx.commit()
            .map_err(|e| CacheError::db("Failed to commit activities", e))?;

        if skipped > 0 {
            tracing::debug!(user = user_name, skipped, "Dropped records without a remote id");
        }
        Ok(inserted)
    }

    /// Cached activities, newest first, at most `limit` rows.
    ///
    /// Rows without a start time are included after all dated rows.
    pub fn get_cached_activities(
        &self,
        user_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CachedActivity>> {
        let limit = limit as i64;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM cached_activities
                 WHERE ?1 IS NULL OR user_name = ?1
                 ORDER BY start_time IS NULL, start_time DESC, remote_activity_id DESC
                 LIMIT ?2",
                ACTIVITY_COLUMNS
            ))
            .map_err(|e| CacheError::db("Failed to prepare query", e))?;

        let rows = stmt
            .query_map(params![user_name, limit], row_to_activity)
            .map_err(|e| CacheError::db("Failed to query activities", e))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CacheError::db("Failed to read activity row", e))
    }

    /// Total cached activities for a user
    pub fn get_activity_count(&self, user_name: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM cached_activities WHERE user_name = ?1",
                params![user_name],
                |row| row.get(0),
            )
            .map_err(|e| CacheError::db("Failed to count activities", e))
    }

    /// Delete activities that started before `cutoff`, and rollups whose whole
    /// week lies before it, in one transaction.
    ///
    /// Activities without a start time are kept. A week that straddles the
    /// cutoff keeps its rollup, since some of its activities survive.
    pub fn delete_activities_before(&self, cutoff: NaiveDate) -> Result<RetentionReport> {
        let cutoff_str = cutoff.format(DATE_FORMAT).to_string();

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| CacheError::db("Failed to begin transaction", e))?;

        let activities = tx
            .execute(
                "DELETE FROM cached_activities
                 WHERE start_time IS NOT NULL AND start_time < ?1",
                params![cutoff_str],
            )
            .map_err(|e| CacheError::db("Failed to delete old activities", e))?;
        let rollups = tx
            .execute(
                "DELETE FROM weekly_rollups WHERE date(period_start, '+7 days') <= ?1",
                params![cutoff_str],
            )
            .map_err(|e| CacheError::db("Failed to delete old rollups", e))?;

        tx.commit()
            .map_err(|e| CacheError::db("Failed to commit retention sweep", e))?;

        tracing::info!(%cutoff, activities, rollups, "Retention sweep complete");
        Ok(RetentionReport { activities, rollups })
    }

    // =========================================================================
    // Weekly rollups
    // =========================================================================

    /// Store the rollup for one period, replacing any previous totals
    pub fn upsert_weekly_rollup(
        &self,
        user_name: &str,
        period_start: NaiveDate,
        totals: &RollupTotals,
    ) -> Result<()> {
        write_rollup(&self.conn, user_name, period_start, totals)
    }

    /// Store several rollups in one transaction, each replacing its period's totals
    pub fn upsert_weekly_rollups(
        &self,
        user_name: &str,
        periods: &BTreeMap<NaiveDate, RollupTotals>,
    ) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| CacheError::db("Failed to begin transaction", e))?;

        for (period_start, totals) in periods {
            write_rollup(&tx, user_name, *period_start, totals)?;
        }

        tx.commit()
            .map_err(|e| CacheError::db("Failed to commit rollups", e))?;
        Ok(periods.len())
    }

    /// Most recent `count` rollups, newest period first
    pub fn get_weekly_rollups(
        &self,
        user_name: Option<&str>,
        count: usize,
    ) -> Result<Vec<WeeklyRollup>> {
        let count = count as i64;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM weekly_rollups
                 WHERE ?1 IS NULL OR user_name = ?1
                 ORDER BY period_start DESC, user_name
                 LIMIT ?2",
                ROLLUP_COLUMNS
            ))
            .map_err(|e| CacheError::db("Failed to prepare query", e))?;

        let rows = stmt
            .query_map(params![user_name, count], row_to_rollup)
            .map_err(|e| CacheError::db("Failed to query rollups", e))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CacheError::db("Failed to read rollup row", e))
    }

    /// Delete a user's rollups for weeks that no longer contain any cached
    /// activity. Returns the number of rows removed.
    pub fn prune_stale_rollups(&self, user_name: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM weekly_rollups
                 WHERE user_name = ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM cached_activities a
                       WHERE a.user_name = weekly_rollups.user_name
                         AND a.start_time >= weekly_rollups.period_start
                         AND a.start_time < date(weekly_rollups.period_start, '+7 days')
                   )",
                params![user_name],
            )
            .map_err(|e| CacheError::db("Failed to prune stale rollups", e))
    }
}

fn write_rollup(
    conn: &Connection,
    user_name: &str,
    period_start: NaiveDate,
    totals: &RollupTotals,
) -> Result<()> {
    conn.execute(
        "INSERT INTO weekly_rollups
             (user_name, period_start, total_distance_m, total_duration_s,
              total_calories, total_activities)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (user_name, period_start) DO UPDATE SET
             total_distance_m = excluded.total_distance_m,
             total_duration_s = excluded.total_duration_s,
             total_calories = excluded.total_calories,
             total_activities = excluded.total_activities,
             computed_at = datetime('now')",
        params![
            user_name,
            period_start.format(DATE_FORMAT).to_string(),
            totals.distance_m,
            totals.duration_s,
            totals.calories,
            totals.activities,
        ],
    )
    .map_err(|e| CacheError::db("Failed to upsert weekly rollup", e))?;

    Ok(())
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_name: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        created_at: row.get::<_, Option<String>>(3)?.as_deref().and_then(parse_timestamp),
        last_synced_at: row.get::<_, Option<String>>(4)?.as_deref().and_then(parse_timestamp),
    })
}

fn row_to_activity(row: &Row<'_>) -> rusqlite::Result<CachedActivity> {
    Ok(CachedActivity {
        user_name: row.get(0)?,
        remote_activity_id: row.get(1)?,
        activity_type: row.get(2)?,
        distance_m: row.get(3)?,
        elevation_gain_m: row.get(4)?,
        duration_s: row.get(5)?,
        calories: row.get(6)?,
        start_time: row.get::<_, Option<String>>(7)?.as_deref().and_then(parse_start_time),
        payload: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        fetched_at: row.get::<_, Option<String>>(9)?.as_deref().and_then(parse_timestamp),
    })
}

fn row_to_rollup(row: &Row<'_>) -> rusqlite::Result<WeeklyRollup> {
    let period: String = row.get(1)?;
    let period_start = NaiveDate::parse_from_str(&period, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(WeeklyRollup {
        user_name: row.get(0)?,
        period_start,
        total_distance_m: row.get(2)?,
        total_duration_s: row.get(3)?,
        total_calories: row.get(4)?,
        total_activities: row.get(5)?,
        computed_at: row.get::<_, Option<String>>(6)?.as_deref().and_then(parse_timestamp),
    })
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse either an RFC 3339 timestamp or SQLite's `datetime('now')` output (UTC)
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

fn parse_start_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, START_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}
