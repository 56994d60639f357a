//! Transport resilience: retry with backoff, plus a bounded response cache.

mod cache;
mod retry;

pub use cache::{cache_key, Clock, ResponseCache, SystemClock};
pub use retry::{
    backoff_delay, invoke_with_retry, Idempotency, JitterSource, RandomJitter, Retrier,
    RetryPolicy, Sleeper, ThreadSleeper,
};
