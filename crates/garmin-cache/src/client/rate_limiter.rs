//! Request pacing with exponential backoff on HTTP 429

use std::time::{Duration, Instant};

/// Rate limiter for sequential API requests
pub struct RateLimiter {
    /// Minimum delay between requests
    min_delay: Duration,
    /// Backoff applied after the first 429
    base_backoff: Duration,
    /// Current backoff delay
    backoff: Duration,
    /// Maximum backoff delay
    max_backoff: Duration,
    /// Last request time
    last_request: Option<Instant>,
    /// Consecutive rate limit hits
    consecutive_429s: u32,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Create a new rate limiter with conservative defaults (~30 req/min)
    pub fn new() -> Self {
        Self::with_delays(Duration::from_millis(2000), Duration::from_secs(1))
    }

    /// Create a rate limiter with custom pacing
    pub fn with_delays(min_delay: Duration, base_backoff: Duration) -> Self {
        Self {
            min_delay,
            base_backoff,
            backoff: Duration::ZERO,
            max_backoff: Duration::from_secs(300),
            last_request: None,
            consecutive_429s: 0,
        }
    }

    /// Wait before making the next request
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            let required_delay = self.min_delay + self.backoff;

            if elapsed < required_delay {
                tokio::time::sleep(required_delay - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    /// Handle a successful request
    pub fn on_success(&mut self) {
        self.backoff = Duration::ZERO;
        self.consecutive_429s = 0;
    }

    /// Handle a rate limit (HTTP 429) response
    pub fn on_rate_limit(&mut self) {
        self.consecutive_429s += 1;
        self.backoff = (self.backoff * 2).max(self.base_backoff).min(self.max_backoff);
    }

    /// Check if we should give up due to repeated rate limits
    pub fn should_pause(&self) -> bool {
        self.consecutive_429s >= 5
    }

    /// Get the current backoff duration
    pub fn current_backoff(&self) -> Duration {
        self.backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_defaults() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.min_delay, Duration::from_millis(2000));
        assert_eq!(limiter.current_backoff(), Duration::ZERO);
    }

    #[test]
    fn test_exponential_backoff() {
        let mut limiter = RateLimiter::new();

        limiter.on_rate_limit();
        assert_eq!(limiter.current_backoff(), Duration::from_secs(1));

        limiter.on_rate_limit();
        assert_eq!(limiter.current_backoff(), Duration::from_secs(2));

        limiter.on_rate_limit();
        assert_eq!(limiter.current_backoff(), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_max() {
        let mut limiter = RateLimiter::new();

        for _ in 0..20 {
            limiter.on_rate_limit();
        }

        assert!(limiter.current_backoff() <= limiter.max_backoff);
    }

    #[test]
    fn test_reset_on_success() {
        let mut limiter = RateLimiter::new();

        limiter.on_rate_limit();
        limiter.on_rate_limit();
        assert!(limiter.current_backoff() > Duration::ZERO);

        limiter.on_success();
        assert_eq!(limiter.current_backoff(), Duration::ZERO);
        assert_eq!(limiter.consecutive_429s, 0);
    }

    #[test]
    fn test_should_pause() {
        let mut limiter = RateLimiter::new();

        for _ in 0..4 {
            limiter.on_rate_limit();
            assert!(!limiter.should_pause());
        }

        limiter.on_rate_limit();
        assert!(limiter.should_pause());
    }

    #[tokio::test]
    async fn test_wait_without_delay_is_immediate() {
        let mut limiter = RateLimiter::with_delays(Duration::ZERO, Duration::ZERO);
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
