//! Row models for the cache tables

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked user, keyed by a lowercase slug
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_name: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// High-water mark of the most recent successful sync
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Activity normalized from a raw remote record, ready for storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActivity {
    /// Remote identifier. Records without one are never stored.
    pub remote_activity_id: Option<i64>,
    pub activity_type: String,
    pub distance_m: f64,
    pub elevation_gain_m: f64,
    pub duration_s: f64,
    pub calories: i64,
    /// Local start time as recorded by the device; `None` when unparseable
    pub start_time: Option<NaiveDateTime>,
    /// The full original record
    pub payload: serde_json::Value,
}

/// Activity as stored in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedActivity {
    pub user_name: String,
    pub remote_activity_id: i64,
    pub activity_type: String,
    pub distance_m: f64,
    pub elevation_gain_m: f64,
    pub duration_s: f64,
    pub calories: i64,
    pub start_time: Option<NaiveDateTime>,
    pub payload: Option<serde_json::Value>,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Summed metrics for one period
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RollupTotals {
    pub distance_m: f64,
    pub duration_s: f64,
    pub calories: i64,
    pub activities: i64,
}

impl RollupTotals {
    /// Add one activity's metrics
    pub fn add(&mut self, activity: &CachedActivity) {
        self.distance_m += activity.distance_m;
        self.duration_s += activity.duration_s;
        self.calories += activity.calories;
        self.activities += 1;
    }
}

/// Stored weekly rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyRollup {
    pub user_name: String,
    /// Monday of the ISO week
    pub period_start: NaiveDate,
    pub total_distance_m: f64,
    pub total_duration_s: f64,
    pub total_calories: i64,
    pub total_activities: i64,
    pub computed_at: Option<DateTime<Utc>>,
}

impl WeeklyRollup {
    pub fn totals(&self) -> RollupTotals {
        RollupTotals {
            distance_m: self.total_distance_m,
            duration_s: self.total_duration_s,
            calories: self.total_calories,
            activities: self.total_activities,
        }
    }
}

/// Rows removed by an age-based retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub activities: usize,
    pub rollups: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(distance_m: f64, duration_s: f64, calories: i64) -> CachedActivity {
        CachedActivity {
            user_name: "pat".to_string(),
            remote_activity_id: 1,
            activity_type: "running".to_string(),
            distance_m,
            elevation_gain_m: 0.0,
            duration_s,
            calories,
            start_time: None,
            payload: None,
            fetched_at: None,
        }
    }

    #[test]
    fn test_rollup_totals_accumulate() {
        let mut totals = RollupTotals::default();
        totals.add(&activity(5000.0, 1500.0, 350));
        totals.add(&activity(0.0, 600.0, 40));

        assert_eq!(totals.distance_m, 5000.0);
        assert_eq!(totals.duration_s, 2100.0);
        assert_eq!(totals.calories, 390);
        assert_eq!(totals.activities, 2);
    }

    #[test]
    fn test_weekly_rollup_totals() {
        let rollup = WeeklyRollup {
            user_name: "pat".to_string(),
            period_start: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            total_distance_m: 13000.0,
            total_duration_s: 4000.0,
            total_calories: 900,
            total_activities: 3,
            computed_at: None,
        };

        let totals = rollup.totals();
        assert_eq!(totals.distance_m, 13000.0);
        assert_eq!(totals.activities, 3);
    }
}
