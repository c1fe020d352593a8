//! Fetch-window planning

use chrono::{Days, NaiveDate};

use crate::client::{FetchWindow, SyncKind};
use crate::config::{BackfillPolicy, SyncConfig};

/// Pick the window for a user's next sync.
///
/// A user with nothing cached gets the backfill window; everyone else gets the
/// short incremental window ending today. A configured minimum start date
/// clamps the window's start but never pushes it past `today`. Day counts that
/// reach past the calendar's range clamp to its first date.
pub fn plan_window(config: &SyncConfig, existing_count: i64, today: NaiveDate) -> FetchWindow {
    let (kind, mut start_date) = if existing_count <= 0 {
        let start = match config.backfill {
            BackfillPolicy::Days(days) => days_before(today, days),
            BackfillPolicy::Since(date) => date.min(today),
        };
        (SyncKind::Backfill, start)
    } else {
        (SyncKind::Incremental, days_before(today, config.incremental_days))
    };

    if let Some(min) = config.min_start_date {
        if start_date < min {
            start_date = min.min(today);
        }
    }

    FetchWindow {
        kind,
        start_date,
        end_date: today,
    }
}

fn days_before(today: NaiveDate, days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}
