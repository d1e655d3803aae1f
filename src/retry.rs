//! Bounded retry combinator for eventual-consistency lag.
//!
//! The only core caller is profile resolution after sign-in, where the
//! directory's provisioning hook may not have created the profile row yet.
//! The hosted adapter reuses the same policy type for transport retries.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Backoff {
    Fixed,
    Exponential {
        #[serde(rename = "maxDelayMs")]
        max_delay_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub delay_ms: u64,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Three retries, one second apart.
    pub fn profile_resolution() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 1_000,
            backoff: Backoff::Fixed,
        }
    }

    pub fn transport() -> Self {
        Self {
            max_retries: 2,
            delay_ms: 250,
            backoff: Backoff::Exponential {
                max_delay_ms: 2_000,
            },
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
            backoff: Backoff::Fixed,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Exponential { max_delay_ms } => {
                let exponent = 2u64.saturating_pow(retry.saturating_sub(1));
                self.delay_ms.saturating_mul(exponent).min(max_delay_ms)
            }
        };
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::profile_resolution()
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the policy
/// is exhausted. The last error is returned on exhaustion.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_transient<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    is_transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                log::debug!(
                    "{} retry {}/{} after: {} (sleep {:?})",
                    label,
                    attempt,
                    policy.max_retries,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if attempt > 1 {
                    log::warn!("{} gave up after {} attempts: {}", label, attempt, err);
                }
                return Err(err);
            }
        }
    }
}
