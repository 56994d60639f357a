//! Exponential backoff with jitter around remote inference calls.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{InvokeError, TransportError};

/// Whether repeating an operation is safe. Non-idempotent calls get one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    Idempotent,
    NonIdempotent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added to each delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub trait JitterSource: Send + Sync {
    /// A duration in `[0, max)`; zero when `max` is zero.
    fn jitter(&self, max: Duration) -> Duration;
}

/// Uniform jitter seeded from the std hasher's per-process random keys.
#[derive(Debug, Default)]
pub struct RandomJitter {
    state: RandomState,
    counter: AtomicU64,
}

impl RandomJitter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JitterSource for RandomJitter {
    fn jitter(&self, max: Duration) -> Duration {
        let max_ms = max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut hasher = self.state.build_hasher();
        hasher.write_u64(self.counter.fetch_add(1, Ordering::Relaxed));
        Duration::from_millis(hasher.finish() % max_ms)
    }
}

/// Delay before retrying after failed attempt number `attempt` (1-based):
/// `base * 2^(attempt-1) + jitter`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, jitter: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    policy.base_delay.saturating_mul(1u32 << exp) + jitter
}

/// Retry executor with injectable sleeping and jitter.
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn JitterSource>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(ThreadSleeper),
            jitter: Arc::new(RandomJitter::new()),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    pub fn invoke<T, F>(
        &self,
        name: &str,
        idempotency: Idempotency,
        mut operation: F,
    ) -> Result<T, InvokeError>
    where
        F: FnMut() -> Result<T, TransportError>,
    {
        let max_attempts = match idempotency {
            Idempotency::Idempotent => self.policy.max_retries.max(1),
            Idempotency::NonIdempotent => 1,
        };

        let mut attempt = 1;
        loop {
            let error = match operation() {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            tracing::warn!(
                target: "nexus::retry",
                operation = name,
                attempt,
                status = ?error.status,
                message = %error.message,
                "Attempt {} failed for {}", attempt, name
            );

            if !error.is_retryable() {
                tracing::error!(target: "nexus::retry", operation = name, "Non-retryable error for {}", name);
                return Err(InvokeError::Permanent {
                    operation: name.to_string(),
                    source: error,
                });
            }

            if attempt >= max_attempts {
                tracing::error!(target: "nexus::retry", operation = name, attempts = attempt, "All retries exhausted for {}", name);
                return Err(InvokeError::Exhausted {
                    operation: name.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = backoff_delay(
                &self.policy,
                attempt,
                self.jitter.jitter(self.policy.max_jitter),
            );
            self.sleeper.sleep(delay);
            attempt += 1;
        }
    }
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// Retry an idempotent `operation` with the thread sleeper and random jitter.
pub fn invoke_with_retry<T, F>(
    operation: F,
    name: &str,
    policy: RetryPolicy,
) -> Result<T, InvokeError>
where
    F: FnMut() -> Result<T, TransportError>,
{
    Retrier::new(policy).invoke(name, Idempotency::Idempotent, operation)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records requested delays instead of sleeping.
    #[derive(Default)]
    pub struct RecordingSleeper {
        pub delays: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.delays.lock().push(duration);
        }
    }

    pub struct FixedJitter(pub Duration);

    impl JitterSource for FixedJitter {
        fn jitter(&self, max: Duration) -> Duration {
            self.0.min(max.saturating_sub(Duration::from_millis(1)))
        }
    }
}
