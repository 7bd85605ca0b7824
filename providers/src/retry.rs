//! HTTP retry policy for the *initial connection* of a round. Mid-stream reads are never retried - only `start`
//! is, and only up to a small bounded budget, so this does not reach into
//! the Non-goal "provider-side retries beyond the model's own": it is
//! a client-side connection retry, not a provider-side one.

use std::time::Duration;

use rand::Rng;
use reqwest::{RequestBuilder, Response, StatusCode};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Down-jitter factor; delay is multiplied by a value in
    /// `[1.0 - jitter_factor, 1.0]`.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

#[must_use]
pub fn should_retry(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        408 | 409 | 429 | 500 | 502 | 503 | 504 | 520..=599
    )
}

#[must_use]
pub fn calculate_retry_delay(backoff_step: u32, config: &RetryConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2f64.powi(backoff_step as i32);
    let capped = base.min(config.max_delay.as_secs_f64());
    let jitter = rand::rng().random_range(1.0 - config.jitter_factor..=1.0);
    Duration::from_secs_f64(capped * jitter)
}

/// Issue a request, retrying transport errors and retryable statuses up to
/// `config.max_retries` times. Returns the first response whose status is
/// not retryable (including the final attempt, retryable or not).
pub async fn send_with_retry(
    build: impl Fn() -> RequestBuilder,
    config: &RetryConfig,
) -> Result<Response, reqwest::Error> {
    let mut attempt = 0u32;
    loop {
        match build().send().await {
            Ok(response) if attempt < config.max_retries && should_retry(response.status()) => {
                tokio::time::sleep(calculate_retry_delay(attempt, config)).await;
                attempt += 1;
            }
            Ok(response) => return Ok(response),
            Err(err) if attempt < config.max_retries && !err.is_builder() => {
                tokio::time::sleep(calculate_retry_delay(attempt, config)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
