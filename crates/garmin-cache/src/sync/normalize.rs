//! Normalization of raw activity records
//!
//! The activity list endpoint and older exports disagree on field names
//! (`activityId` vs `activity_id`, nested `activityType.typeKey` vs a plain
//! string, ...). Everything is folded into [`NewActivity`] here so storage never
//! sees the variants.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::db::models::NewActivity;

const ID_KEYS: &[&str] = &["activityId", "activity_id", "id"];
const DISTANCE_KEYS: &[&str] = &["distance", "distance_m"];
const DURATION_KEYS: &[&str] = &["duration", "duration_s", "elapsedDuration"];
const CALORIE_KEYS: &[&str] = &["calories"];
const ELEVATION_KEYS: &[&str] = &["elevationGain", "elevation_gain", "elevation_gain_m"];
const START_KEYS: &[&str] = &[
    "startTimeLocal",
    "start_time_local",
    "start_time",
    "startTimeGMT",
];

/// Fold a raw record into the fixed storage shape.
///
/// Missing numeric fields default to zero and a missing category to
/// `"unknown"`. The start time comes from the first key whose value parses; when
/// none does it becomes `None` and the record is still returned.
pub fn normalize_activity(raw: &Value) -> NewActivity {
    NewActivity {
        remote_activity_id: first(raw, ID_KEYS).and_then(as_id),
        activity_type: activity_type(raw),
        distance_m: number(raw, DISTANCE_KEYS),
        elevation_gain_m: number(raw, ELEVATION_KEYS),
        duration_s: number(raw, DURATION_KEYS),
        calories: number(raw, CALORIE_KEYS).round() as i64,
        start_time: start_time(raw),
        payload: raw.clone(),
    }
}

/// Whether a normalized record may be stored under a hard lower bound.
/// Records without a start time are kept.
pub fn within_lower_bound(activity: &NewActivity, min_start: Option<NaiveDate>) -> bool {
    match (min_start, activity.start_time) {
        (Some(min), Some(start)) => start.date() >= min,
        _ => true,
    }
}

/// Parse the timestamp formats Garmin uses for activity start times.
///
/// Offsets are dropped rather than converted: the value is kept as the
/// wall-clock time the record carries.
pub fn parse_garmin_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    for format in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }

    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.naive_local())
        .ok()
}

fn start_time(raw: &Value) -> Option<NaiveDateTime> {
    START_KEYS
        .iter()
        .filter_map(|key| raw.get(key).and_then(Value::as_str))
        .find_map(parse_garmin_datetime)
}

fn first<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| raw.get(key))
        .find(|v| !v.is_null())
}

fn number(raw: &Value, keys: &[&str]) -> f64 {
    first(raw, keys)
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn activity_type(raw: &Value) -> String {
    let key = match raw.get("activityType") {
        Some(Value::Object(map)) => map.get("typeKey").and_then(|v| v.as_str()),
        Some(Value::String(s)) => Some(s.as_str()),
        _ => raw.get("activity_type").and_then(|v| v.as_str()),
    };

    key.map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string()
}
