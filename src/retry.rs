//! Exponential backoff with jitter, tracked per execution context.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::ProviderError;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub base_timeout: Duration,
    pub base: f64,
    pub max_backoff: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(1),
            base: 2.0,
            max_backoff: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// `min(base_timeout * base^(attempt-1), max_backoff)`, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_timeout.as_secs_f64() * self.base.powi(exp);
        let capped = if secs.is_finite() {
            secs.min(self.max_backoff.as_secs_f64())
        } else {
            self.max_backoff.as_secs_f64()
        };
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Base delay plus uniform jitter in `[0, base/2]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let half = base.as_secs_f64() / 2.0;
        let jitter = if half > 0.0 {
            rand::thread_rng().gen_range(0.0..=half)
        } else {
            0.0
        };
        base + Duration::from_secs_f64(jitter)
    }
}

/// Attempt counters keyed by context id. `None` is the single-session context.
#[derive(Debug, Default)]
pub struct RetryLadder {
    attempts: Mutex<HashMap<Option<String>, u32>>,
}

impl RetryLadder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attempt(&self, context_id: Option<&str>) -> u32 {
        let map = self.attempts.lock().await;
        map.get(&context_id.map(str::to_owned)).copied().unwrap_or(1)
    }

    /// Increment after a transient failure and return the new value.
    pub async fn bump(&self, context_id: Option<&str>) -> u32 {
        let mut map = self.attempts.lock().await;
        let n = map.entry(context_id.map(str::to_owned)).or_insert(1);
        *n += 1;
        *n
    }

    pub async fn reset(&self, context_id: Option<&str>) {
        let mut map = self.attempts.lock().await;
        map.insert(context_id.map(str::to_owned), 1);
    }

    /// Drop a finished context.
    pub async fn forget(&self, context_id: Option<&str>) {
        let mut map = self.attempts.lock().await;
        map.remove(&context_id.map(str::to_owned));
    }
}

/// Run `op` until it succeeds, sleeping per `policy` between failures.
///
/// Only the calling task sleeps. Decode errors are returned immediately; every
/// other error is treated as transient.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    ladder: &RetryLadder,
    context_id: Option<&str>,
    label: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut tries: u32 = 0;
    loop {
        tries += 1;
        match op().await {
            Ok(v) => {
                ladder.reset(context_id).await;
                return Ok(v);
            }
            Err(e @ ProviderError::Decode(_)) => return Err(e),
            Err(e) => {
                if let Some(max) = policy.max_attempts {
                    if tries >= max {
                        warn!(agent = label, context_id = ?context_id, error = %e, "giving up");
                        return Err(ProviderError::RetriesExhausted(tries));
                    }
                }
                let attempt = ladder.attempt(context_id).await;
                let wait = policy.delay(attempt);
                warn!(
                    agent = label,
                    context_id = ?context_id,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "provider call failed, backing off"
                );
                ladder.bump(context_id).await;
                tokio::time::sleep(wait).await;
            }
        }
    }
}
