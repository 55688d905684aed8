//! Deadlock retry policy.
//!
//! Only deadlocks are retried, with a fixed pause between attempts. Any other
//! failure, and the first success, end the loop immediately. The policy does not
//! impose a timeout of its own; callers wrap the whole loop in theirs, so a
//! pending retry sleep is cancelled together with the call.

use crate::config::Config;
use crate::error::DbResult;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    enabled: bool,
    retries: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(enabled: bool, retries: u32, delay: Duration) -> Self {
        Self {
            enabled,
            retries,
            delay,
        }
    }

    /// A policy that attempts exactly once.
    pub fn disabled() -> Self {
        Self::new(false, 0, Duration::ZERO)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.retry_on_deadlock,
            config.retry_on_deadlock_count,
            config.retry_on_deadlock_delay,
        )
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Run `op`, retrying it while it fails with a deadlock.
    ///
    /// Returns the first success, the first non-deadlock failure, or the last
    /// deadlock once attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, sql: &str, mut op: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_deadlock() && attempt < max_attempts => {
                    warn!(
                        sql = %sql,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        "Deadlock, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
