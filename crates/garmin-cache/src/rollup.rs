//! Weekly rollups recomputed from the cache
//!
//! Every run rebuilds a user's weekly totals from scratch out of the cached
//! activities, so the stored rollups are always an exact function of the cache.
//! Weeks start Monday 00:00 in the activity's recorded local time.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::db::models::{CachedActivity, RollupTotals};
use crate::error::Result;
use crate::storage::CacheStore;

/// Outcome of one recomputation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollupSummary {
    /// Weeks written
    pub weeks: usize,
    /// Activities counted into some week
    pub bucketed: usize,
    /// Activities without a start time
    pub skipped: usize,
}

/// Monday on or before the activity's local start date
pub fn week_start(start: NaiveDateTime) -> NaiveDate {
    let date = start.date();
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Sum activities into weekly buckets. Returns the buckets and how many
/// activities were left out for lack of a start time.
pub fn bucket_weekly(activities: &[CachedActivity]) -> (BTreeMap<NaiveDate, RollupTotals>, usize) {
    let mut weeks: BTreeMap<NaiveDate, RollupTotals> = BTreeMap::new();
    let mut skipped = 0;

    for activity in activities {
        match activity.start_time {
            Some(start) => weeks.entry(week_start(start)).or_default().add(activity),
            None => skipped += 1,
        }
    }

    (weeks, skipped)
}

/// Recompute every weekly rollup for a user.
///
/// Reads up to `scan_limit` of the user's cached activities, newest first, and
/// overwrites the stored row of each week that has at least one of them. When
/// the limit cuts through the dated activities, the oldest week read may be
/// missing some of its activities, so it is left untouched rather than
/// overwritten with a partial sum. Rows for weeks that no longer have
/// activities are left alone; see [`CacheStore::prune_stale_rollups`].
pub fn compute_weekly_rollups(
    store: &CacheStore,
    user_name: &str,
    scan_limit: usize,
) -> Result<RollupSummary> {
    let activities = store.get_cached_activities(Some(user_name), scan_limit)?;
    // Undated rows sort last, so one at the tail means every dated row was read
    let truncated = activities.len() >= scan_limit
        && activities.last().is_some_and(|a| a.start_time.is_some());

    let (mut weeks, skipped) = bucket_weekly(&activities);
    let mut bucketed = activities.len() - skipped;
    if truncated {
        if let Some((oldest, partial)) = weeks.pop_first() {
            bucketed -= partial.activities as usize;
            tracing::warn!(
                user = user_name,
                scan_limit,
                week = %oldest,
                "rollup scan hit its limit, weeks from this one back were not recomputed"
            );
        }
    }

    let written = store.upsert_weekly_rollups(user_name, &weeks)?;

    let summary = RollupSummary {
        weeks: written,
        bucketed,
        skipped,
    };
    tracing::debug!(
        user = user_name,
        weeks = summary.weeks,
        bucketed = summary.bucketed,
        skipped = summary.skipped,
        "weekly rollups recomputed"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewActivity;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn activity(id: i64, distance_m: f64, start_time: Option<NaiveDateTime>) -> NewActivity {
        NewActivity {
            remote_activity_id: Some(id),
            activity_type: "running".to_string(),
            distance_m,
            elevation_gain_m: 0.0,
            duration_s: 600.0,
            calories: 100,
            start_time,
            payload: json!({ "activityId": id }),
        }
    }

    #[test]
    fn test_week_start() {
        // 2026-03-02 is a Monday
        assert_eq!(week_start(at(2026, 3, 2, 0, 0, 0)), date(2026, 3, 2));
        assert_eq!(week_start(at(2026, 3, 4, 12, 0, 0)), date(2026, 3, 2));
        assert_eq!(week_start(at(2026, 3, 8, 23, 59, 59)), date(2026, 3, 2));
        assert_eq!(week_start(at(2026, 3, 9, 0, 0, 0)), date(2026, 3, 9));
        // Across a year boundary
        assert_eq!(week_start(at(2026, 1, 1, 9, 0, 0)), date(2025, 12, 29));
    }

    #[test]
    fn test_sunday_night_and_monday_morning_split() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .upsert_activities(
                "pat",
                &[
                    activity(1, 1000.0, Some(at(2026, 3, 8, 23, 59, 0))),
                    activity(2, 2000.0, Some(at(2026, 3, 9, 0, 0, 0))),
                ],
            )
            .unwrap();

        let summary = compute_weekly_rollups(&store, "pat", 10_000).unwrap();
        assert_eq!(summary.weeks, 2);

        let rollups = store.get_weekly_rollups(Some("pat"), 10).unwrap();
        assert_eq!(rollups[0].period_start, date(2026, 3, 9));
        assert_eq!(rollups[0].total_distance_m, 2000.0);
        assert_eq!(rollups[1].period_start, date(2026, 3, 2));
        assert_eq!(rollups[1].total_distance_m, 1000.0);
    }

    #[test]
    fn test_rollups_match_cache_exactly() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .upsert_activities(
                "pat",
                &[
                    activity(101, 5000.0, Some(at(2026, 3, 3, 7, 0, 0))),
                    activity(102, 0.0, Some(at(2026, 3, 3, 12, 0, 0))),
                    activity(103, 8000.0, Some(at(2026, 3, 3, 18, 0, 0))),
                    activity(104, 1234.5, None),
                ],
            )
            .unwrap();

        let summary = compute_weekly_rollups(&store, "pat", 10_000).unwrap();
        assert_eq!(
            summary,
            RollupSummary {
                weeks: 1,
                bucketed: 3,
                skipped: 1
            }
        );

        let rollups = store.get_weekly_rollups(Some("pat"), 10).unwrap();
        assert_eq!(rollups.len(), 1);
        let totals = rollups[0].totals();
        assert_eq!(totals.distance_m, 13000.0);
        assert_eq!(totals.duration_s, 1800.0);
        assert_eq!(totals.calories, 300);
        assert_eq!(totals.activities, 3);
    }

    #[test]
    fn test_recompute_is_idempotent_and_overwrites() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .upsert_activities("pat", &[activity(1, 1000.0, Some(at(2026, 3, 3, 7, 0, 0)))])
            .unwrap();

        compute_weekly_rollups(&store, "pat", 10_000).unwrap();
        compute_weekly_rollups(&store, "pat", 10_000).unwrap();
        let rollups = store.get_weekly_rollups(Some("pat"), 10).unwrap();
        assert_eq!(rollups.len(), 1);
        assert_eq!(rollups[0].total_distance_m, 1000.0);
        assert_eq!(rollups[0].total_activities, 1);

        // Re-fetched with corrected distance
        store
            .upsert_activities("pat", &[activity(1, 1500.0, Some(at(2026, 3, 3, 7, 0, 0)))])
            .unwrap();
        compute_weekly_rollups(&store, "pat", 10_000).unwrap();
        let rollups = store.get_weekly_rollups(Some("pat"), 10).unwrap();
        assert_eq!(rollups[0].total_distance_m, 1500.0);
        assert_eq!(rollups[0].total_activities, 1);
    }

    #[test]
    fn test_recompute_leaves_stale_weeks() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .upsert_activities("pat", &[activity(1, 1000.0, Some(at(2026, 3, 3, 7, 0, 0)))])
            .unwrap();
        compute_weekly_rollups(&store, "pat", 10_000).unwrap();

        // Timestamp corrected into the following week
        store
            .upsert_activities("pat", &[activity(1, 1000.0, Some(at(2026, 3, 10, 7, 0, 0)))])
            .unwrap();
        compute_weekly_rollups(&store, "pat", 10_000).unwrap();
        assert_eq!(store.get_weekly_rollups(Some("pat"), 10).unwrap().len(), 2);

        assert_eq!(store.prune_stale_rollups("pat").unwrap(), 1);
        let rollups = store.get_weekly_rollups(Some("pat"), 10).unwrap();
        assert_eq!(rollups.len(), 1);
        assert_eq!(rollups[0].period_start, date(2026, 3, 9));
    }

    #[test]
    fn test_users_are_isolated() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .upsert_activities("pat", &[activity(1, 1000.0, Some(at(2026, 3, 3, 7, 0, 0)))])
            .unwrap();
        store
            .upsert_activities("sam", &[activity(1, 9000.0, Some(at(2026, 3, 3, 7, 0, 0)))])
            .unwrap();

        compute_weekly_rollups(&store, "pat", 10_000).unwrap();

        assert_eq!(store.get_weekly_rollups(Some("pat"), 10).unwrap()[0].total_distance_m, 1000.0);
        assert!(store.get_weekly_rollups(Some("sam"), 10).unwrap().is_empty());
    }

    #[test]
    fn test_scan_limit_leaves_partial_oldest_week_alone() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .upsert_activities(
                "pat",
                &[
                    activity(1, 1000.0, Some(at(2026, 3, 3, 7, 0, 0))),
                    activity(2, 2000.0, Some(at(2026, 3, 4, 7, 0, 0))),
                    activity(3, 4000.0, Some(at(2026, 3, 10, 7, 0, 0))),
                ],
            )
            .unwrap();
        // Full totals for the older week from an earlier, complete run
        let full = RollupTotals {
            distance_m: 3000.0,
            duration_s: 1200.0,
            calories: 200,
            activities: 2,
        };
        store.upsert_weekly_rollup("pat", date(2026, 3, 2), &full).unwrap();

        // Reads activities 3 and 2; the week of 2026-03-02 is only half seen
        let summary = compute_weekly_rollups(&store, "pat", 2).unwrap();
        assert_eq!(
            summary,
            RollupSummary {
                weeks: 1,
                bucketed: 1,
                skipped: 0
            }
        );

        let rollups = store.get_weekly_rollups(Some("pat"), 10).unwrap();
        assert_eq!(rollups.len(), 2);
        assert_eq!(rollups[0].period_start, date(2026, 3, 9));
        assert_eq!(rollups[0].total_distance_m, 4000.0);
        assert_eq!(rollups[1].period_start, date(2026, 3, 2));
        assert_eq!(rollups[1].total_distance_m, 3000.0);
        assert_eq!(rollups[1].total_activities, 2);
    }

    #[test]
    fn test_scan_limit_reached_by_undated_rows_keeps_all_weeks() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .upsert_activities(
                "pat",
                &[
                    activity(1, 1000.0, Some(at(2026, 3, 3, 7, 0, 0))),
                    activity(2, 500.0, None),
                ],
            )
            .unwrap();

        let summary = compute_weekly_rollups(&store, "pat", 2).unwrap();
        assert_eq!(summary.weeks, 1);
        assert_eq!(store.get_weekly_rollups(Some("pat"), 10).unwrap()[0].total_distance_m, 1000.0);
    }

    #[test]
    fn test_empty_cache_writes_nothing() {
        let store = CacheStore::open_in_memory().unwrap();
        let summary = compute_weekly_rollups(&store, "pat", 10_000).unwrap();
        assert_eq!(summary, RollupSummary::default());
    }
}
