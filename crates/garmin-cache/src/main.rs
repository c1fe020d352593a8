//! Daily sync job: refresh every connected user's cache and weekly rollups.
//!
//! Configuration comes from the environment (see `Settings::from_env`). The
//! process exits non-zero when every attempted user failed.

use std::process::ExitCode;

use chrono::{Duration, Local};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use garmin_cache::client::{GarminClient, GarminSource};
use garmin_cache::config::{CredentialStore, Settings};
use garmin_cache::sync::{run_daily, DailyReport, SyncEngine};
use garmin_cache::{CacheStore, Result};

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(settings.log_json);

    match run(settings).await {
        Ok(report) if report.all_failed() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "daily sync aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<DailyReport> {
    let store = CacheStore::open(&settings.db_path)?;
    let credentials = CredentialStore::with_dir(settings.tokens_dir.clone())?;
    let users = credentials.connected_users()?;

    let client = GarminClient::new(&settings.domain)?;
    let source = GarminSource::new(client, credentials);
    let engine = SyncEngine::new(store, source, settings.sync.clone());

    let report = run_daily(&engine, &users).await;

    if let Some(days) = settings.retention_days {
        let cutoff = Local::now().date_naive() - Duration::days(days as i64);
        engine.store().delete_activities_before(cutoff)?;
    }

    tracing::info!(db = %settings.db_path.display(), "{}", report);
    Ok(report)
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,garmin_cache=info"));

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(true)
            .flatten_event(true)
    });
    let plain_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(plain_layer)
        .init();
}
