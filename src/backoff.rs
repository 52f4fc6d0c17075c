use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::Result;

/// Exponential backoff whose delay is a pure function of the attempt count.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            attempt: 0,
        }
    }

    /// 100ms doubling up to 1s, used while a schema is transitioning.
    pub fn schema_wait() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(1))
    }

    /// `2^attempt` seconds, capped.
    pub fn reconnect(cap: Duration) -> Self {
        Self::new(Duration::from_secs(1), cap)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.cap)
    }

    pub fn next(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Polls `check` until it yields a value or `timeout` elapses.
///
/// Returns `Ok(None)` on timeout; check errors are propagated immediately.
pub async fn poll_until<T, F, Fut>(timeout: Duration, mut backoff: Backoff, mut check: F) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await? {
            return Ok(Some(value));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }

        let delay = backoff.next().min(deadline - now);
        tokio::time::sleep(delay).await;
    }
}
