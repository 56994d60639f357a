use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry/backoff settings for request-response inference calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_jitter_ms: 1000,
        }
    }
}

/// Response cache settings. Only plain-text prompts are cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 5 * 60,
            capacity: 256,
        }
    }
}

/// Live duplex audio session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Samples per outbound frame (matches a 4096-sample capture block)
    pub frame_samples: usize,
    /// How long to wait for `setupComplete` before giving up
    pub setup_timeout_secs: u64,
    /// I/O loop tick
    pub poll_interval_ms: u64,
    /// Average output level (0..255) above which the remote side counts as speaking
    pub speaking_threshold: f32,
    /// Number of level samples in the moving average
    pub speaking_window: usize,
}

impl LiveConfig {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            frame_samples: 4096,
            setup_timeout_secs: 30,
            poll_interval_ms: 10,
            speaking_threshold: 10.0,
            speaking_window: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
            json: false,
        }
    }
}
