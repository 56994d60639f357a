//! Error types shared by the inference client and the live audio pipeline.

use std::fmt;

/// Failure reported by a single remote inference call.
///
/// Carries the HTTP-ish status code when the remote side produced one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Network-level failure without a status code.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    /// Rate limits, timeouts, server errors and status-less failures are transient.
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(408) | Some(429) => true,
            Some(code) => code >= 500,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Terminal outcome of [`crate::api::resilience::invoke_with_retry`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvokeError {
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("{operation} failed with a non-retryable error: {source}")]
    Permanent {
        operation: String,
        #[source]
        source: TransportError,
    },
}

impl InvokeError {
    pub fn operation(&self) -> &str {
        match self {
            InvokeError::Exhausted { operation, .. } | InvokeError::Permanent { operation, .. } => {
                operation
            }
        }
    }

    pub fn last_error(&self) -> &TransportError {
        match self {
            InvokeError::Exhausted { source, .. } | InvokeError::Permanent { source, .. } => source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Gemini API key is required")]
    MissingApiKey,
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors surfaced by the request/response generation API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("invalid response from model: {0}")]
    Decode(String),
    #[error("empty response: {0}")]
    EmptyResponse(String),
    #[error("video generation failed or no URI returned")]
    VideoFailed,
}

/// Malformed inbound PCM payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PcmError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(String),
    #[error("PCM16 payload has odd byte length {0}")]
    OddLength(usize),
}

/// Errors of the live duplex audio session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiveError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("live connection failed: {0}")]
    Connect(String),
    #[error("live protocol error: {0}")]
    Protocol(String),
    #[error("no setup acknowledgement within {0}s")]
    SetupTimeout(u64),
    #[error("a live session is already active")]
    AlreadyActive,
    #[error("live transport error: {0}")]
    Transport(String),
    #[error("live channel closed by remote: {0}")]
    ChannelClosed(String),
    #[error("illegal session transition from {from:?} on {event:?}")]
    IllegalTransition {
        from: crate::api::realtime_audio::SessionState,
        event: crate::api::realtime_audio::SessionEvent,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(TransportError::network("reset").is_retryable());
        assert!(TransportError::new(Some(429), "rate limited").is_retryable());
        assert!(TransportError::new(Some(503), "unavailable").is_retryable());
        assert!(TransportError::new(Some(408), "timeout").is_retryable());
        assert!(!TransportError::new(Some(400), "bad request").is_retryable());
        assert!(!TransportError::new(Some(401), "unauthorized").is_retryable());
    }

    #[test]
    fn invoke_error_names_operation() {
        let err = InvokeError::Exhausted {
            operation: "generateText".to_string(),
            attempts: 3,
            source: TransportError::new(Some(503), "overloaded"),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("generateText"));
        assert!(rendered.contains("503"));
        assert_eq!(err.operation(), "generateText");
    }
}
