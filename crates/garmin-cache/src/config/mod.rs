mod credentials;
mod settings;

pub use credentials::{is_valid_user_name, CredentialStore};
pub use settings::{BackfillPolicy, Settings, SyncConfig};

use crate::error::{CacheError, Result};
use std::path::{Path, PathBuf};

/// Default configuration directory name
const CONFIG_DIR_NAME: &str = "garmin-cache";

/// Get the data directory path for storing tokens
/// Returns ~/.local/share/garmin-cache on Unix, ~/Library/Application Support/garmin-cache on macOS
pub fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|p| p.join(CONFIG_DIR_NAME))
        .ok_or_else(|| CacheError::config("Could not determine data directory"))
}

/// Default directory holding one token directory per user
pub fn default_tokens_dir() -> Result<PathBuf> {
    data_dir().map(|p| p.join("tokens"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
