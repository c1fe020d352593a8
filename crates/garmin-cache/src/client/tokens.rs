use chrono::Utc;
use serde::{Deserialize, Serialize};

/// OAuth2 Bearer token for API requests, stored per user when they first
/// authenticate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuth2Token {
    pub scope: String,
    pub jti: String,
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub expires_at: i64,
    pub refresh_token_expires_in: i64,
    #[serde(default)]
    pub refresh_token_expires_at: i64,
}

impl OAuth2Token {
    /// Check if the access token has expired.
    pub fn is_expired(&self) -> bool {
        let now = Utc::now().timestamp();
        self.expires_at < now
    }

    /// Returns the Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_at: i64) -> OAuth2Token {
        OAuth2Token {
            scope: "test".to_string(),
            jti: "jti123".to_string(),
            token_type: "Bearer".to_string(),
            access_token: "my_access_token".to_string(),
            refresh_token: "refresh123".to_string(),
            expires_in: 3600,
            expires_at,
            refresh_token_expires_in: 86400,
            refresh_token_expires_at: Utc::now().timestamp() + 86400,
        }
    }

    #[test]
    fn test_oauth2_token_expiry() {
        assert!(token(0).is_expired());
        assert!(!token(Utc::now().timestamp() + 3600).is_expired());
    }

    #[test]
    fn test_oauth2_token_authorization_header() {
        let t = token(Utc::now().timestamp() + 3600);
        assert_eq!(t.authorization_header(), "Bearer my_access_token");
    }

    #[test]
    fn test_missing_expiry_defaults_to_expired() {
        let json = r#"{
            "scope": "s", "jti": "j", "token_type": "Bearer",
            "access_token": "a", "refresh_token": "r",
            "expires_in": 3600, "refresh_token_expires_in": 86400
        }"#;
        let t: OAuth2Token = serde_json::from_str(json).unwrap();
        assert_eq!(t.expires_at, 0);
        assert!(t.is_expired());
    }
}
