//! Fixed-interval bounded polling

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded retry with a fixed interval between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, at least 1
    pub max_attempts: u32,
    /// Pause between two attempts
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// Readiness wait after container creation: 30 x 2s
    pub fn container_start() -> Self {
        Self::new(30, Duration::from_secs(2))
    }

    /// Liveness probing: 10 x 3s
    pub fn liveness() -> Self {
        Self::new(10, Duration::from_secs(3))
    }

    /// Polls `probe` until it yields `Ok`, sleeping `interval` between attempts.
    ///
    /// Returns the successful value with the attempt number, or the last
    /// observation after `max_attempts` tries. No sleep follows the final
    /// attempt.
    pub async fn poll<T, E, F, Fut>(&self, what: &str, mut probe: F) -> (Result<T, E>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match probe(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if attempt >= max_attempts => return (Err(e), attempt),
                Err(_) => {
                    debug!(
                        what = %what,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        interval_ms = self.interval.as_millis() as u64,
                        "Not ready yet, retrying"
                    );
                    tokio::time::sleep(self.interval).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::container_start()
    }
}
