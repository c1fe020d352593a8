//! Sync orchestration
//!
//! Pulls each user's recent activities from an [`ActivitySource`] and merges
//! them into the [`CacheStore`]:
//! - Backfill window for users with nothing cached, short overlapping window
//!   afterwards
//! - Record normalization before anything reaches storage
//! - Watermark advanced only after the merge committed
//! - Fail-one-continue batches and the daily sync + rollup job

pub mod normalize;
pub mod window;

use chrono::{Local, NaiveDate, Utc};

use crate::client::{ActivitySource, SyncKind};
use crate::config::{is_valid_user_name, SyncConfig};
use crate::db::models::NewActivity;
use crate::error::{CacheError, Result};
use crate::rollup::{self, RollupSummary};
use crate::storage::CacheStore;

pub use normalize::{normalize_activity, parse_garmin_datetime, within_lower_bound};
pub use window::plan_window;

/// Summary of one successful user sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSyncResult {
    pub user: String,
    pub display_name: Option<String>,
    pub kind: SyncKind,
    /// Raw records returned by the source
    pub fetched: usize,
    /// Records dropped for starting before the configured minimum date
    pub out_of_range: usize,
    /// Records that were not cached before
    pub new: usize,
    /// Cached activities for the user after the merge
    pub cached: i64,
}

impl std::fmt::Display for UserSyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}): fetched={}, new={}, total={}",
            self.user, self.kind, self.fetched, self.new, self.cached
        )
    }
}

/// Per-user result of a batch run
#[derive(Debug, Clone, PartialEq)]
pub enum UserSyncOutcome {
    Synced {
        result: UserSyncResult,
        rollups: Option<RollupSummary>,
    },
    Failed {
        user: String,
        error: String,
    },
}

impl UserSyncOutcome {
    pub fn user(&self) -> &str {
        match self {
            UserSyncOutcome::Synced { result, .. } => &result.user,
            UserSyncOutcome::Failed { user, .. } => user,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UserSyncOutcome::Synced { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            UserSyncOutcome::Synced { .. } => None,
            UserSyncOutcome::Failed { error, .. } => Some(error),
        }
    }

    fn failed(user: &str, error: &CacheError) -> Self {
        UserSyncOutcome::Failed {
            user: user.to_string(),
            error: error.to_string(),
        }
    }
}

/// Result of the daily job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyReport {
    pub outcomes: Vec<UserSyncOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    /// Stale rollup rows removed across all users
    pub pruned_rollups: usize,
}

impl DailyReport {
    /// At least one user was attempted and none succeeded
    pub fn all_failed(&self) -> bool {
        self.failed > 0 && self.succeeded == 0
    }

    fn push(&mut self, outcome: UserSyncOutcome) {
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }
}

impl std::fmt::Display for DailyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded, self.failed)
    }
}

/// Sync engine bound to one cache and one remote source
pub struct SyncEngine<S: ActivitySource> {
    store: CacheStore,
    source: S,
    config: SyncConfig,
}

impl<S: ActivitySource> SyncEngine<S> {
    pub fn new(store: CacheStore, source: S, config: SyncConfig) -> Self {
        Self { store, source, config }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Give back the store, e.g. for a final maintenance pass
    pub fn into_store(self) -> CacheStore {
        self.store
    }

    /// Sync one user using today's local date for the window
    pub async fn sync_user(&self, user_name: &str) -> Result<UserSyncResult> {
        self.sync_user_on(user_name, Local::now().date_naive()).await
    }

    /// Sync one user with the window ending on `today`.
    ///
    /// Nothing is written to the activity table until the source call has
    /// returned, and the watermark moves only after the merge committed, so an
    /// error at any step leaves the next run to retry the same window.
    pub async fn sync_user_on(&self, user_name: &str, today: NaiveDate) -> Result<UserSyncResult> {
        if !is_valid_user_name(user_name) {
            return Err(CacheError::invalid_param(format!(
                "user name must be a lowercase slug: '{}'",
                user_name
            )));
        }

        let session = self.source.resume(user_name).await?;

        let existing = self.store.get_user(user_name)?;
        let email = existing.as_ref().and_then(|u| u.email.clone());
        let display_name = match self.source.display_name(&session).await {
            Ok(Some(name)) => Some(name),
            Ok(None) => existing.as_ref().and_then(|u| u.display_name.clone()),
            Err(e) => {
                tracing::warn!(user = user_name, error = %e, "could not refresh display name");
                existing.as_ref().and_then(|u| u.display_name.clone())
            }
        };
        self.store
            .upsert_user(user_name, email.as_deref(), display_name.as_deref(), None)?;

        let existing_count = self.store.get_activity_count(user_name)?;
        let window = plan_window(&self.config, existing_count, today);
        tracing::info!(
            user = user_name,
            kind = %window.kind,
            start = %window.start_date,
            end = %window.end_date,
            existing = existing_count,
            "fetching activities"
        );

        let raw = self.source.fetch_activities(&session, &window).await?;
        let fetched = raw.len();

        let records: Vec<NewActivity> = raw
            .iter()
            .map(normalize_activity)
            .filter(|a| within_lower_bound(a, self.config.min_start_date))
            .collect();
        let out_of_range = fetched - records.len();

        let new = self.store.upsert_activities(user_name, &records)?;
        self.store.upsert_user(
            user_name,
            email.as_deref(),
            display_name.as_deref(),
            Some(Utc::now()),
        )?;
        let cached = self.store.get_activity_count(user_name)?;

        let result = UserSyncResult {
            user: user_name.to_string(),
            display_name,
            kind: window.kind,
            fetched,
            out_of_range,
            new,
            cached,
        };
        tracing::info!(
            user = user_name,
            fetched,
            out_of_range,
            new,
            cached,
            "sync complete"
        );
        Ok(result)
    }

    /// Sync users one after another. A failing user is recorded and the loop
    /// moves on.
    pub async fn sync_all_users<U: AsRef<str>>(&self, users: &[U]) -> Vec<UserSyncOutcome> {
        let today = Local::now().date_naive();
        let mut outcomes = Vec::with_capacity(users.len());

        for user in users {
            let user = user.as_ref();
            let outcome = match self.sync_user_on(user, today).await {
                Ok(result) => UserSyncOutcome::Synced { result, rollups: None },
                Err(e) => {
                    tracing::error!(user, error = %e, "sync failed");
                    UserSyncOutcome::failed(user, &e)
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Recompute a user's weekly rollups from the cache
    pub fn recompute_rollups(&self, user_name: &str) -> Result<RollupSummary> {
        rollup::compute_weekly_rollups(&self.store, user_name, self.config.rollup_scan_limit)
    }
}

/// The daily job: sync each user, then rebuild their weekly rollups and drop
/// rollups for weeks that no longer hold activities.
///
/// A user counts as failed if either the sync or the rollup step fails; the
/// remaining users are still processed.
pub async fn run_daily<S, U>(engine: &SyncEngine<S>, users: &[U]) -> DailyReport
where
    S: ActivitySource,
    U: AsRef<str>,
{
    let today = Local::now().date_naive();
    let mut report = DailyReport::default();

    if users.is_empty() {
        tracing::warn!("no connected users found");
        return report;
    }
    tracing::info!(users = users.len(), "starting daily sync");

    for user in users {
        let user = user.as_ref();
        let result = match engine.sync_user_on(user, today).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(user, error = %e, "sync failed");
                report.push(UserSyncOutcome::failed(user, &e));
                continue;
            }
        };

        let rollups = engine.recompute_rollups(user).and_then(|summary| {
            let pruned = engine.store().prune_stale_rollups(user)?;
            Ok((summary, pruned))
        });

        match rollups {
            Ok((summary, pruned)) => {
                tracing::info!(user, weeks = summary.weeks, pruned, "weekly rollups updated");
                report.pruned_rollups += pruned;
                report.push(UserSyncOutcome::Synced {
                    result,
                    rollups: Some(summary),
                });
            }
            Err(e) => {
                tracing::error!(user, error = %e, "rollup recomputation failed");
                report.push(UserSyncOutcome::failed(user, &e));
            }
        }
    }

    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        "daily sync complete"
    );
    report
}
