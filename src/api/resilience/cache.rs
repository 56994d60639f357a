//! Short-lived response cache for plain-text prompts.
//!
//! Entries expire `ttl` after insertion. The map is bounded: once `capacity`
//! is reached the least recently used entry is evicted, and expired entries
//! are reclaimed on read or via [`ResponseCache::purge_expired`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::retry::{Idempotency, Retrier};
use crate::api::types::Prompt;
use crate::config::CacheConfig;
use crate::error::{InvokeError, TransportError};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: String,
    created_at: Instant,
    last_used: u64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

/// `model + ":" + prompt` for plain-text prompts; structured prompts are never cached.
pub fn cache_key(model: &str, prompt: &Prompt) -> Option<String> {
    prompt.as_text().map(|text| format!("{}:{}", model, text))
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self::with_clock(ttl, capacity, Arc::new(SystemClock))
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl(), config.capacity)
    }

    pub fn with_clock(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
            ttl,
            capacity: capacity.max(1),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fresh entry for `key`, if any. Expired entries are dropped.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        let expired = match inner.entries.get_mut(key) {
            None => return None,
            Some(entry) if now.saturating_duration_since(entry.created_at) < self.ttl => {
                entry.last_used = tick;
                return Some(entry.response.clone());
            }
            Some(_) => true,
        };
        if expired {
            inner.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: String, response: String) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let ttl = self.ttl;
            inner
                .entries
                .retain(|_, e| now.saturating_duration_since(e.created_at) < ttl);
            if inner.entries.len() >= self.capacity {
                if let Some(lru) = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(k, _)| k.clone())
                {
                    tracing::debug!(target: "nexus::cache", key = %lru, "evicting least recently used entry");
                    inner.entries.remove(&lru);
                }
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                response,
                created_at: now,
                last_used: tick,
            },
        );
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, e| now.saturating_duration_since(e.created_at) < ttl);
        before - inner.entries.len()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Serve `model`/`prompt` from the cache, or run `fetcher` under `retrier`
    /// and remember a successful result.
    ///
    /// The lock is not held while fetching, so concurrent misses for the same
    /// key may both fetch; the last write wins.
    pub fn get_cached_or_fetch<F>(
        &self,
        retrier: &Retrier,
        operation: &str,
        model: &str,
        prompt: &Prompt,
        fetcher: F,
    ) -> Result<String, InvokeError>
    where
        F: FnMut() -> Result<String, TransportError>,
    {
        let key = cache_key(model, prompt);

        if let Some(key) = &key {
            if let Some(cached) = self.get(key) {
                tracing::debug!(target: "nexus::cache", model, "Using cached response");
                return Ok(cached);
            }
        }

        let response = retrier.invoke(operation, Idempotency::Idempotent, fetcher)?;

        if let Some(key) = key {
            self.insert(key, response.clone());
        }
        Ok(response)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Manually advanced clock.
    pub struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        pub fn advance(&self, by: Duration) {
            *self.offset.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock()
        }
    }
}
