//! Cache schema and migrations
//!
//! The schema version lives in `PRAGMA user_version`. Each migration runs in its
//! own transaction together with the version bump, and checks for existing
//! columns first so a database created by an older build upgrades cleanly.

use rusqlite::{params, Connection};

use crate::error::{CacheError, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Run all pending migrations
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| CacheError::db("Failed to read schema version", e))?;

    if current_version < 1 {
        apply(conn, 1, migration_v1)?;
    }
    if current_version < 2 {
        apply(conn, 2, migration_v2)?;
    }
    if current_version < 3 {
        apply(conn, 3, migration_v3)?;
    }

    Ok(())
}

/// Read the schema version of an open connection
pub fn schema_version(conn: &Connection) -> Result<i32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| CacheError::db("Failed to read schema version", e))
}

fn apply(conn: &Connection, version: i32, migration: fn(&Connection) -> Result<()>) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CacheError::db("Failed to begin migration", e))?;

    migration(&tx)?;

    tx.pragma_update(None, "user_version", version)
        .map_err(|e| CacheError::db("Failed to bump schema version", e))?;
    tx.commit()
        .map_err(|e| CacheError::db("Failed to commit migration", e))?;

    tracing::debug!(version, "Applied cache schema migration");
    Ok(())
}

/// Migration v1: users, cached activities and weekly rollups
fn migration_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_name TEXT PRIMARY KEY NOT NULL,
            email TEXT UNIQUE,
            display_name TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS cached_activities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_name TEXT NOT NULL,
            remote_activity_id INTEGER NOT NULL,
            activity_type TEXT NOT NULL DEFAULT 'unknown',
            distance_m REAL NOT NULL DEFAULT 0,
            duration_s REAL NOT NULL DEFAULT 0,
            calories INTEGER NOT NULL DEFAULT 0,
            start_time TEXT,
            payload TEXT,
            fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (user_name, remote_activity_id)
        );

        CREATE INDEX IF NOT EXISTS idx_cached_activities_start
        ON cached_activities(user_name, start_time);

        CREATE TABLE IF NOT EXISTS weekly_rollups (
            user_name TEXT NOT NULL,
            period_start TEXT NOT NULL,
            total_distance_m REAL NOT NULL DEFAULT 0,
            total_duration_s REAL NOT NULL DEFAULT 0,
            total_calories INTEGER NOT NULL DEFAULT 0,
            total_activities INTEGER NOT NULL DEFAULT 0,
            computed_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_name, period_start)
        );
        "#,
    )
    .map_err(|e| CacheError::db("Failed to create base tables", e))
}

/// Migration v2: sync watermark on users
fn migration_v2(conn: &Connection) -> Result<()> {
    if !has_column(conn, "users", "last_synced_at")? {
        conn.execute("ALTER TABLE users ADD COLUMN last_synced_at TEXT", [])
            .map_err(|e| CacheError::db("Failed to add last_synced_at", e))?;
    }
    Ok(())
}

/// Migration v3: elevation gain, backfilled from stored payloads
fn migration_v3(conn: &Connection) -> Result<()> {
    if has_column(conn, "cached_activities", "elevation_gain_m")? {
        return Ok(());
    }

    conn.execute(
        "ALTER TABLE cached_activities ADD COLUMN elevation_gain_m REAL NOT NULL DEFAULT 0",
        [],
    )
    .map_err(|e| CacheError::db("Failed to add elevation_gain_m", e))?;

    let backfilled = conn
        .execute(
            "UPDATE cached_activities
             SET elevation_gain_m = COALESCE(json_extract(payload, '$.elevationGain'), 0)
             WHERE payload IS NOT NULL AND json_valid(payload)",
            params![],
        )
        .map_err(|e| CacheError::db("Failed to backfill elevation_gain_m", e))?;

    tracing::info!(backfilled, "Backfilled elevation gain from stored payloads");
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )
    .map_err(|e| CacheError::db("Failed to inspect table columns", e))
}
