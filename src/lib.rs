//! Client library for a multi-model generative inference service.
//!
//! Two subsystems share the config, logging and error plumbing:
//! - [`api::NexusClient`]: request/response generation wrapped in retry with
//!   backoff and a short-lived response cache
//! - [`api::realtime_audio::LiveSession`]: full-duplex microphone/speaker
//!   streaming over the live WebSocket

pub mod api;
pub mod config;
pub mod debug_log;
pub mod error;

pub use api::realtime_audio::{LiveEvent, LiveSession, SessionState};
pub use api::NexusClient;
pub use config::{load_config, NexusConfig};
pub use debug_log::init_logging;
pub use error::{ApiError, InvokeError, LiveError, TransportError};
