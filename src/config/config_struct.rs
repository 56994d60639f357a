use serde::{Deserialize, Serialize};

use super::types::{CacheConfig, LiveConfig, LoggingConfig, RetryConfig};
use crate::error::ConfigError;

/// Default persona sent as system instruction with text, JSON, grounding and live requests.
pub const NEXUS_SYSTEM_INSTRUCTION: &str = "You are GraTech Nexus, an AI orchestration console. \
You route each request to the most suitable specialised model (fast text, deep reasoning, \
image, video, speech) and answer in a professional, confident tone. \
You are a proprietary GraTech product and do not present yourself as any other assistant.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    pub api_key: String,
    pub api_base_url: String,
    pub live_url: String,
    pub text_model: String,
    pub smart_model: String,
    pub live_model: String,
    pub live_voice: String,
    pub speech_voice: String,
    pub system_instruction: String,
    pub video_poll_interval_secs: u64,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub live: LiveConfig,
    pub logging: LoggingConfig,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            live_url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            smart_model: "gemini-3-pro-preview".to_string(),
            live_model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            live_voice: "Zephyr".to_string(),
            speech_voice: "Kore".to_string(),
            system_instruction: NEXUS_SYSTEM_INSTRUCTION.to_string(),
            video_poll_interval_secs: 5,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            live: LiveConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl NexusConfig {
    /// The configured API key, or an error when none is set.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        let key = self.api_key.trim();
        if key.is_empty() {
            tracing::error!(target: "nexus::config", "API key missing");
            return Err(ConfigError::MissingApiKey);
        }
        Ok(key)
    }

    /// Fill an empty `api_key` from `GEMINI_API_KEY`, then `API_KEY`.
    pub fn apply_env_overrides(&mut self) {
        if !self.api_key.trim().is_empty() {
            return;
        }
        for var in ["GEMINI_API_KEY", "API_KEY"] {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    self.api_key = value.trim().to_string();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_api_key_is_rejected() {
        let config = NexusConfig {
            api_key: "   ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.api_key(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn api_key_is_trimmed() {
        let config = NexusConfig {
            api_key: " abc ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.api_key().unwrap(), "abc");
    }

    #[test]
    fn explicit_key_wins_over_env() {
        let mut config = NexusConfig {
            api_key: "from-file".to_string(),
            ..Default::default()
        };
        config.apply_env_overrides();
        assert_eq!(config.api_key, "from-file");
    }
}
