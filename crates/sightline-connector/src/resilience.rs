//! Retry and rate-limit policies for vendor calls.
//!
//! The two are independent. [`RetryPolicy`] reacts to failures
//! and gives up after a fixed number of attempts. [`RateLimitPolicy`]
//! reacts to a server telling us to slow down: it sleeps for the hinted
//! duration and reissues the same request, up to `max_waits` times.

use chrono::Utc;
use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ConnectorError, ConnectorResult};

/// Transient-failure retry with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each failure.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter (0.0 disables it).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Policy with short delays for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter_factor: 0.0,
        }
    }

    /// Delay to sleep after failed attempt `attempt` (0-indexed):
    /// `base_delay * 2^attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let delay_ms = delay.as_millis() as f64;
        let jitter = rand::thread_rng().gen_range(0.0..=delay_ms * self.jitter_factor);
        Duration::from_millis((delay_ms + jitter) as u64)
    }

    /// Run `operation`, retrying retryable failures.
    ///
    /// Once the budget is spent the last error is wrapped in
    /// [`ConnectorError::RetriesExhausted`] naming `call`. Errors that a
    /// retry cannot fix are returned as-is on first occurrence.
    pub async fn run<F, Fut, T>(&self, call: &str, mut operation: F) -> ConnectorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConnectorResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        warn!(
                            call = %call,
                            attempts = attempt,
                            error = %e,
                            "Retry budget exhausted"
                        );
                        return Err(ConnectorError::RetriesExhausted {
                            call: call.to_string(),
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }

                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        call = %call,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Vendor call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Synchronous [`run`](Self::run) for blocking clients; sleeps the
    /// calling thread between attempts.
    pub fn run_blocking<F, T>(&self, call: &str, mut operation: F) -> ConnectorResult<T>
    where
        F: FnMut() -> ConnectorResult<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        warn!(call = %call, attempts = attempt, error = %e, "Retry budget exhausted");
                        return Err(ConnectorError::RetriesExhausted {
                            call: call.to_string(),
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }

                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        call = %call,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Blocking vendor call failed, retrying"
                    );
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

/// Server-directed throttling policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitPolicy {
    /// Throttled responses tolerated for one request before giving up.
    pub max_waits: u32,
    /// Upper bound on a single server-requested wait.
    pub max_wait: Duration,
    /// Wait used when the server gives no hint.
    pub default_wait: Duration,
    /// Treat every 403 as throttling (some vendors never send 429).
    pub throttle_on_403: bool,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_waits: 10,
            max_wait: Duration::from_secs(300),
            default_wait: Duration::from_secs(60),
            throttle_on_403: false,
        }
    }
}

impl RateLimitPolicy {
    /// Policy with short waits for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_waits: 3,
            max_wait: Duration::from_millis(20),
            default_wait: Duration::from_millis(5),
            throttle_on_403: false,
        }
    }

    /// Whether a response signals throttling.
    ///
    /// 429 always does. 403 does when the policy says so, or when the
    /// vendor reports an exhausted quota via `X-RateLimit-Remaining: 0`.
    #[must_use]
    pub fn is_throttled(&self, status: StatusCode, headers: &HeaderMap) -> bool {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return true;
        }
        if status == StatusCode::FORBIDDEN {
            return self.throttle_on_403
                || header_u64(headers, "x-ratelimit-remaining") == Some(0);
        }
        false
    }

    /// Run `operation`, waiting out [`ConnectorError::RateLimited`] signals.
    ///
    /// Each signal sleeps for its hint (or `default_wait`), capped at
    /// `max_wait`, and reissues the call. After `max_waits` waits the next
    /// signal becomes [`ConnectorError::RateLimitExceeded`]. Any other
    /// outcome is returned unchanged.
    pub async fn run<F, Fut, T>(&self, call: &str, mut operation: F) -> ConnectorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConnectorResult<T>>,
    {
        let mut waits = 0u32;
        loop {
            match operation().await {
                Err(ConnectorError::RateLimited { message, retry_after }) => {
                    if waits >= self.max_waits {
                        warn!(call = %call, waits, "Rate limit wait budget exhausted");
                        return Err(ConnectorError::RateLimitExceeded {
                            call: call.to_string(),
                            waits,
                        });
                    }
                    let wait = retry_after.unwrap_or(self.default_wait).min(self.max_wait);
                    waits += 1;
                    warn!(
                        call = %call,
                        wait_ms = wait.as_millis() as u64,
                        waits,
                        reason = %message,
                        "Vendor throttled request, waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }

    /// Wait hint from `Retry-After` (seconds) or `X-RateLimit-Reset`
    /// (epoch seconds), clamped to `max_wait`.
    #[must_use]
    pub fn wait_hint(&self, headers: &HeaderMap) -> Duration {
        let hinted = if let Some(secs) = header_u64(headers, "retry-after") {
            Some(Duration::from_secs(secs))
        } else if let Some(reset_at) = header_u64(headers, "x-ratelimit-reset") {
            let now = Utc::now().timestamp().max(0) as u64;
            Some(Duration::from_secs(reset_at.saturating_sub(now)))
        } else {
            None
        };

        let wait = hinted.unwrap_or(self.default_wait);
        if wait > self.max_wait {
            debug!(
                requested_ms = wait.as_millis() as u64,
                capped_ms = self.max_wait.as_millis() as u64,
                "Server wait hint exceeds cap"
            );
            return self.max_wait;
        }
        wait
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Per-connector retry settings as they appear in a config block.
///
/// ```yaml
/// rate_limit_retry:
///   max_attempts: 5
///   base_delay: 1.0
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds.
    #[serde(default = "default_base_delay")]
    pub base_delay: f64,
    /// Seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
    /// Seconds.
    #[serde(default = "default_max_rate_limit_wait")]
    pub max_rate_limit_wait: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    60.0
}

fn default_max_rate_limit_waits() -> u32 {
    10
}

fn default_max_rate_limit_wait() -> f64 {
    300.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
            max_rate_limit_wait: default_max_rate_limit_wait(),
        }
    }
}

impl RetrySettings {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: secs(self.base_delay),
            max_delay: secs(self.max_delay),
            jitter_factor: 0.0,
        }
    }

    #[must_use]
    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_waits: self.max_rate_limit_waits,
            max_wait: secs(self.max_rate_limit_wait),
            ..RateLimitPolicy::default()
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}
