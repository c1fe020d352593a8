use crate::client::OAuth2Token;
use crate::error::{CacheError, Result};
use std::fs;
use std::path::PathBuf;

const OAUTH2_FILENAME: &str = "oauth2_token.json";

/// Check that a user name is a lowercase slug (`[a-z0-9_-]+`).
/// User names double as directory names, so nothing else is accepted.
pub fn is_valid_user_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Per-user session storage.
///
/// Each user gets a directory under the tokens root holding the tokens written
/// when they first authenticated. This store only reads and writes those files;
/// acquiring the tokens happens elsewhere.
pub struct CredentialStore {
    base_dir: PathBuf,
}

impl CredentialStore {
    /// Create a credential store rooted at `base_dir`
    pub fn with_dir(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        super::ensure_dir(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn user_dir(&self, user_name: &str) -> Result<PathBuf> {
        if !is_valid_user_name(user_name) {
            return Err(CacheError::invalid_param(format!(
                "user name must be a lowercase slug: '{}'",
                user_name
            )));
        }
        Ok(self.base_dir.join(user_name))
    }

    /// Save a user's OAuth2 token
    pub fn save_oauth2(&self, user_name: &str, token: &OAuth2Token) -> Result<()> {
        let dir = self.user_dir(user_name)?;
        super::ensure_dir(&dir)?;

        let path = dir.join(OAUTH2_FILENAME);
        let json = serde_json::to_string_pretty(token)?;
        fs::write(&path, json)?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Load a user's OAuth2 token
    pub fn load_oauth2(&self, user_name: &str) -> Result<Option<OAuth2Token>> {
        let path = self.user_dir(user_name)?.join(OAUTH2_FILENAME);
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path)?;
        let token: OAuth2Token = serde_json::from_str(&json)?;
        Ok(Some(token))
    }

    /// Check if a user has a stored session
    pub fn has_credentials(&self, user_name: &str) -> bool {
        self.user_dir(user_name)
            .map(|dir| dir.join(OAUTH2_FILENAME).exists())
            .unwrap_or(false)
    }

    /// Remove a user's stored session
    pub fn clear(&self, user_name: &str) -> Result<()> {
        let path = self.user_dir(user_name)?.join(OAUTH2_FILENAME);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Users with a stored session, sorted by name
    pub fn connected_users(&self) -> Result<Vec<String>> {
        let mut users = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.has_credentials(&name) {
                users.push(name);
            }
        }
        users.sort();
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_token() -> OAuth2Token {
        OAuth2Token {
            scope: "test".to_string(),
            jti: "jti".to_string(),
            token_type: "Bearer".to_string(),
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_in: 3600,
            expires_at: Utc::now().timestamp() + 3600,
            refresh_token_expires_in: 86400,
            refresh_token_expires_at: Utc::now().timestamp() + 86400,
        }
    }

    #[test]
    fn test_save_and_load_oauth2() {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::with_dir(temp.path()).unwrap();

        assert!(!store.has_credentials("pat"));
        assert!(store.load_oauth2("pat").unwrap().is_none());

        let token = test_token();
        store.save_oauth2("pat", &token).unwrap();

        assert!(store.has_credentials("pat"));
        assert_eq!(store.load_oauth2("pat").unwrap(), Some(token));
    }

    #[test]
    fn test_clear_removes_session() {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::with_dir(temp.path()).unwrap();
        store.save_oauth2("pat", &test_token()).unwrap();

        store.clear("pat").unwrap();
        assert!(!store.has_credentials("pat"));
        store.clear("pat").unwrap();
    }

    #[test]
    fn test_connected_users_skips_empty_dirs() {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::with_dir(temp.path()).unwrap();
        store.save_oauth2("sam", &test_token()).unwrap();
        store.save_oauth2("pat", &test_token()).unwrap();
        fs::create_dir_all(temp.path().join("empty")).unwrap();
        fs::write(temp.path().join("stray.txt"), "x").unwrap();

        assert_eq!(store.connected_users().unwrap(), vec!["pat", "sam"]);
    }

    #[test]
    fn test_rejects_path_like_user_names() {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::with_dir(temp.path()).unwrap();

        assert!(matches!(
            store.save_oauth2("../pat", &test_token()),
            Err(CacheError::InvalidParameter(_))
        ));
        assert!(!store.has_credentials("Pat"));
    }

    #[test]
    fn test_user_name_slugs() {
        assert!(is_valid_user_name("pat"));
        assert!(is_valid_user_name("pat_2-run"));
        assert!(!is_valid_user_name(""));
        assert!(!is_valid_user_name("Pat"));
        assert!(!is_valid_user_name("pat/../x"));
    }
}
