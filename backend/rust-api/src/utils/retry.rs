use std::future::Future;
use std::time::Duration;

/// Backoff schedule for store writes that may hit transient conflicts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    /// Longer schedule for certificate issuance, where giving up fails the request.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 7,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1000),
            jitter_max: Some(Duration::from_millis(100)),
        }
    }

    /// Wait before retry number `retry` (1-based): doubled per retry, capped,
    /// plus up to `jitter_max` of random slack.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let backoff = self
            .base_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff));

        let jitter = match self.jitter_max {
            Some(max) if !max.is_zero() => {
                Duration::from_millis(rand::random_range(0..=max.as_millis() as u64))
            }
            _ => Duration::ZERO,
        };
        backoff + jitter
    }
}

/// Runs `op` until it succeeds, fails with an error `should_retry` rejects,
/// or `max_attempts` calls have been made.
pub async fn retry_when<F, Fut, T, E, P>(config: RetryConfig, should_retry: P, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                let delay = config.delay_for(attempt as u32);
                tracing::debug!(
                    "Retrying store operation (attempt {}/{}) in {:?}",
                    attempt + 1,
                    max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
