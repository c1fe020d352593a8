use thiserror::Error;

/// Main error type for garmin-cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authentication required. No stored session for this user.")]
    NotAuthenticated,

    #[error("Rate limited. Please wait before retrying.")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid date format: {0}. Expected YYYY-MM-DD")]
    InvalidDateFormat(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Create an authentication error from a message
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a configuration error from a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid response error from a message
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create an invalid parameter error from a message
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Wrap a SQLite error with the operation that failed
    pub(crate) fn db(context: &str, err: rusqlite::Error) -> Self {
        Self::Database(format!("{}: {}", context, err))
    }

    /// Errors raised by the remote source rather than by local storage
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_)
                | Self::NotAuthenticated
                | Self::RateLimited
                | Self::Api { .. }
                | Self::Http(_)
                | Self::InvalidResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::Authentication("Invalid credentials".to_string());
        assert_eq!(err.to_string(), "Authentication error: Invalid credentials");
    }

    #[test]
    fn test_not_authenticated_error() {
        let err = CacheError::NotAuthenticated;
        assert!(err.to_string().contains("No stored session"));
    }

    #[test]
    fn test_invalid_date_format_error() {
        let err = CacheError::InvalidDateFormat("not-a-date".to_string());
        assert!(err.to_string().contains("not-a-date"));
        assert!(err.to_string().contains("YYYY-MM-DD"));
    }

    #[test]
    fn test_db_error_carries_context() {
        let err = CacheError::db("Failed to count activities", rusqlite::Error::InvalidQuery);
        assert!(matches!(err, CacheError::Database(_)));
        assert!(err.to_string().starts_with("Database error: Failed to count activities"));
    }

    #[test]
    fn test_remote_classification() {
        assert!(CacheError::RateLimited.is_remote());
        assert!(CacheError::NotAuthenticated.is_remote());
        assert!(CacheError::Api { status: 500, message: "boom".into() }.is_remote());
        assert!(!CacheError::Database("disk full".into()).is_remote());
        assert!(!CacheError::config("bad").is_remote());
    }
}
