//! Bounded exponential-backoff retry for binary payload downloads.

use std::time::Duration;

use tracing::{info, warn};

use super::{ApiClient, ApiError};

/// Retry schedule: `max_attempts` tries, waiting `base_delay * 2^(k-1)`
/// after the k-th failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// All delays a fully failing run would sleep through.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|a| self.delay_after(a)).collect()
    }
}

impl ApiClient {
    /// Download a payload, retrying failed attempts with exponential backoff.
    /// Every attempt re-downloads the full body; the last error is returned.
    pub async fn download_with_retry(
        &self,
        url: &str,
        policy: &RetryPolicy,
    ) -> Result<Vec<u8>, ApiError> {
        let mut attempt = 1;
        loop {
            match self.download(url).await {
                Ok(bytes) => {
                    if attempt > 1 {
                        info!("Download succeeded on attempt {}", attempt);
                    }
                    return Ok(bytes);
                }
                Err(e) if attempt < policy.max_attempts => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        "Failed to download image (attempt {}/{}): {} - retrying in {:?}",
                        attempt, policy.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to download image (attempt {}/{}): {}",
                        attempt, policy.max_attempts, e
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.schedule(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_longer_schedule() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500));
        assert_eq!(
            policy.schedule(),
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ]
        );
    }

    #[test]
    fn test_single_attempt_never_sleeps() {
        assert!(RetryPolicy::new(0, Duration::from_secs(1)).schedule().is_empty());
        assert!(RetryPolicy::new(1, Duration::from_secs(1)).schedule().is_empty());
    }
}
