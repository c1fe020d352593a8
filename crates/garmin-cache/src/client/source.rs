//! Remote activity sources
//!
//! The sync engine talks to the remote service only through [`ActivitySource`],
//! so tests can substitute an in-memory fake for [`GarminSource`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::client::rate_limiter::RateLimiter;
use crate::client::{GarminClient, OAuth2Token};
use crate::config::CredentialStore;
use crate::error::{CacheError, Result};

/// Activities requested per page
pub const PAGE_SIZE: u32 = 100;

/// Which policy produced a fetch window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// First sync of a user with nothing cached
    Backfill,
    /// Routine sync of a user with cached activities
    Incremental,
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncKind::Backfill => write!(f, "backfill"),
            SyncKind::Incremental => write!(f, "incremental"),
        }
    }
}

/// Date range handed to a source, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub kind: SyncKind,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl FetchWindow {
    /// Number of days the window reaches back from its end date
    pub fn days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }
}

/// A remote service that can list a user's activities
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Authenticated handle for one user
    type Session: Send + Sync;

    /// Resume the stored session for `user_name`
    async fn resume(&self, user_name: &str) -> Result<Self::Session>;

    /// Human-readable name for the session's account, if the service has one
    async fn display_name(&self, session: &Self::Session) -> Result<Option<String>>;

    /// Raw activity records whose start falls inside `window`
    async fn fetch_activities(
        &self,
        session: &Self::Session,
        window: &FetchWindow,
    ) -> Result<Vec<Value>>;
}

/// Resumed Garmin Connect session
#[derive(Debug, Clone)]
pub struct GarminSession {
    pub user_name: String,
    token: OAuth2Token,
}

/// [`ActivitySource`] backed by the Garmin Connect API
pub struct GarminSource {
    client: GarminClient,
    credentials: CredentialStore,
    rate_limiter: Mutex<RateLimiter>,
    page_size: u32,
}

impl GarminSource {
    pub fn new(client: GarminClient, credentials: CredentialStore) -> Self {
        Self {
            client,
            credentials,
            rate_limiter: Mutex::new(RateLimiter::new()),
            page_size: PAGE_SIZE,
        }
    }

    /// Override request pacing
    pub fn with_pacing(mut self, min_delay: Duration, base_backoff: Duration) -> Self {
        self.rate_limiter = Mutex::new(RateLimiter::with_delays(min_delay, base_backoff));
        self
    }

    /// Override the page size
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// GET with pacing; 429 responses are retried with backoff until the
    /// limiter gives up
    async fn get_paced(&self, token: &OAuth2Token, path: &str) -> Result<Value> {
        let mut limiter = self.rate_limiter.lock().await;
        loop {
            limiter.wait().await;
            match self.client.get_json::<Value>(token, path).await {
                Ok(value) => {
                    limiter.on_success();
                    return Ok(value);
                }
                Err(CacheError::RateLimited) => {
                    limiter.on_rate_limit();
                    if limiter.should_pause() {
                        return Err(CacheError::RateLimited);
                    }
                    tracing::warn!(
                        backoff_ms = limiter.current_backoff().as_millis() as u64,
                        "rate limited, backing off"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ActivitySource for GarminSource {
    type Session = GarminSession;

    async fn resume(&self, user_name: &str) -> Result<GarminSession> {
        let token = self
            .credentials
            .load_oauth2(user_name)?
            .ok_or(CacheError::NotAuthenticated)?;
        if token.is_expired() {
            return Err(CacheError::auth(format!(
                "stored session for '{}' has expired",
                user_name
            )));
        }
        Ok(GarminSession {
            user_name: user_name.to_string(),
            token,
        })
    }

    async fn display_name(&self, session: &GarminSession) -> Result<Option<String>> {
        let profile = self
            .get_paced(&session.token, "/userprofile-service/socialProfile")
            .await?;

        let name = ["fullName", "displayName"]
            .iter()
            .filter_map(|key| profile.get(key).and_then(|v| v.as_str()))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string);
        Ok(name)
    }

    async fn fetch_activities(
        &self,
        session: &GarminSession,
        window: &FetchWindow,
    ) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        let mut start = 0u32;

        loop {
            let path = format!(
                "/activitylist-service/activities/search/activities\
                 ?startDate={}&endDate={}&start={}&limit={}",
                window.start_date, window.end_date, start, self.page_size
            );
            let page = match self.get_paced(&session.token, &path).await? {
                Value::Array(items) => items,
                other => {
                    return Err(CacheError::invalid_response(format!(
                        "expected an activity list, got {}",
                        json_kind(&other)
                    )))
                }
            };

            let count = page.len();
            records.extend(page);
            tracing::debug!(user = %session.user_name, start, count, "fetched activity page");

            if count < self.page_size as usize {
                break;
            }
            start += self.page_size;
        }

        Ok(records)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
