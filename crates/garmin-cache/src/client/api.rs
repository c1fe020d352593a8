//! Garmin Connect API client for authenticated requests
//!
//! Thin wrapper over `reqwest` that attaches the user's bearer token and maps
//! HTTP status codes onto [`CacheError`] variants.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::client::tokens::OAuth2Token;
use crate::error::{CacheError, Result};

/// User agent for Connect API requests
const API_USER_AGENT: &str = "GCM-iOS-5.7.2.1";

/// Per-request timeout; bounds how long one stuck call can hold a user's sync
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Garmin Connect API client
#[derive(Clone)]
pub struct GarminClient {
    client: Client,
    base_url: String,
}

impl GarminClient {
    /// Create a new API client for the given domain
    pub fn new(domain: &str) -> Result<Self> {
        Self::new_with_base_url(&format!("https://connectapi.{}", domain))
    }

    /// Create a new API client with a custom base URL (for testing)
    pub fn new_with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build the full URL for a given path
    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Build headers with authorization
    fn build_headers(&self, token: &OAuth2Token) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(API_USER_AGENT));
        let auth = HeaderValue::from_str(&token.authorization_header())
            .map_err(|_| CacheError::auth("Stored token is not a valid header value"))?;
        headers.insert(AUTHORIZATION, auth);
        Ok(headers)
    }

    /// Make an authenticated GET request and return the response
    pub async fn get(&self, token: &OAuth2Token, path: &str) -> Result<Response> {
        let url = self.build_url(path);
        let headers = self.build_headers(token)?;

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(CacheError::Http)?;

        self.handle_response_status(response).await
    }

    /// Make an authenticated GET request and deserialize JSON response
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        token: &OAuth2Token,
        path: &str,
    ) -> Result<T> {
        let response = self.get(token, path).await?;
        response.json().await.map_err(|e| {
            CacheError::invalid_response(format!("Failed to parse JSON response: {}", e))
        })
    }

    /// Handle response status codes and convert to errors
    async fn handle_response_status(&self, response: Response) -> Result<Response> {
        let status = response.status();

        match status {
            StatusCode::OK
            | StatusCode::CREATED
            | StatusCode::ACCEPTED
            | StatusCode::NO_CONTENT => Ok(response),
            StatusCode::UNAUTHORIZED => Err(CacheError::NotAuthenticated),
            StatusCode::TOO_MANY_REQUESTS => Err(CacheError::RateLimited),
            StatusCode::NOT_FOUND => Err(CacheError::NotFound(response.url().path().to_string())),
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(CacheError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url() {
        let client = GarminClient::new("garmin.com").unwrap();
        assert_eq!(
            client.build_url("/activitylist-service/activities/search/activities"),
            "https://connectapi.garmin.com/activitylist-service/activities/search/activities"
        );
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = GarminClient::new_with_base_url("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }
}
