//! Storage layer for cached Garmin data
//!
//! A single SQLite database holds everything:
//!
//! ```text
//! ~/.local/share/garmin-cache/
//! ├── garmin.db          # users, cached_activities, weekly_rollups
//! └── tokens/
//!     └── <user_name>/   # stored session per user
//! ```
//!
//! Dashboards and other read-only consumers open their own [`CacheStore`] on
//! the same file and query it while a sync is running.

mod cache_db;
pub mod schema;

pub use cache_db::CacheStore;

use std::path::PathBuf;

/// Database file name inside the storage directory
pub const DB_FILE_NAME: &str = "garmin.db";

/// Get the default storage path, the same directory that holds `tokens/`
pub fn default_storage_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("garmin-cache")
}

/// Get the default cache database path
pub fn default_db_path() -> PathBuf {
    default_storage_path().join(DB_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_db_path() {
        let path = default_db_path();
        assert!(path.ends_with("garmin-cache/garmin.db"));
    }

    #[test]
    fn test_database_and_tokens_share_a_directory() {
        let data_dir = crate::config::data_dir().unwrap();
        assert_eq!(default_storage_path(), data_dir);
        assert_eq!(
            crate::config::default_tokens_dir().unwrap().parent(),
            default_db_path().parent()
        );
    }
}
