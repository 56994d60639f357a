pub mod client;
pub mod realtime_audio;
pub mod resilience;
pub mod service;
pub mod types;

pub use client::{GeminiRestClient, InferenceEndpoint, UREQ_AGENT};
pub use service::{ChatMode, ChatReply, GroundingKind, GroundingResult, NexusClient, TextOptions, WebProject};
pub use types::{GenerateResponse, GenerationConfig, InferenceRequest, InlineData, Part, Prompt, Tool};
