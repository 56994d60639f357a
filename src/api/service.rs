//! High-level generation operations on top of an [`InferenceEndpoint`].
//!
//! Every remote call goes through the shared [`Retrier`] under the name of the
//! operation, and plain-text generation is served from the [`ResponseCache`]
//! while fresh.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::client::{GeminiRestClient, InferenceEndpoint};
use super::resilience::{Idempotency, ResponseCache, Retrier, RetryPolicy, Sleeper, ThreadSleeper};
use super::types::{
    GenerateResponse, GenerationConfig, InferenceRequest, InlineData, Modality, Part, Prompt, Tool,
    VideoRequest,
};
use crate::config::NexusConfig;
use crate::error::{ApiError, ConfigError};

pub const IMAGE_MODEL_FAST: &str = "gemini-2.5-flash-image";
pub const IMAGE_MODEL_PRO: &str = "gemini-3-pro-image-preview";
pub const TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const VIDEO_MODEL: &str = "veo-3.1-fast-generate-preview";

const NO_RESPONSE: &str = "No response generated.";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 2048;
const SMART_THINKING_BUDGET: u32 = 2048;

/// Optional overrides for [`NexusClient::generate_text`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_instruction: Option<String>,
    pub thinking_budget: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundingKind {
    Search,
    Maps,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroundingResult {
    pub text: String,
    pub chunks: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    /// Flash model, no thinking budget
    Fast,
    /// Pro model with a thinking budget
    Smart,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub model: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebProject {
    pub html: String,
    pub css: String,
    pub javascript: String,
}

pub struct NexusClient<E: InferenceEndpoint> {
    endpoint: E,
    retrier: Retrier,
    cache: ResponseCache,
    config: NexusConfig,
    video_sleeper: Arc<dyn Sleeper>,
}

impl NexusClient<GeminiRestClient> {
    /// Client for the configured REST endpoint. Fails when no API key is set.
    pub fn from_config(config: NexusConfig) -> Result<Self, ConfigError> {
        let endpoint = GeminiRestClient::from_config(&config)?;
        Ok(Self::new(endpoint, config))
    }
}

impl<E: InferenceEndpoint> NexusClient<E> {
    pub fn new(endpoint: E, config: NexusConfig) -> Self {
        Self {
            retrier: Retrier::new(RetryPolicy::from(&config.retry)),
            cache: ResponseCache::from_config(&config.cache),
            endpoint,
            config,
            video_sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = retrier;
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    /// Sleeper used between video status polls.
    pub fn with_video_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.video_sleeper = sleeper;
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn config(&self) -> &NexusConfig {
        &self.config
    }

    fn call(&self, operation: &str, request: &InferenceRequest) -> Result<GenerateResponse, ApiError> {
        Ok(self
            .retrier
            .invoke(operation, Idempotency::Idempotent, || self.endpoint.generate(request))?)
    }

    /// Text completion. Plain-text prompts are cached per model.
    pub fn generate_text(
        &self,
        prompt: impl Into<Prompt>,
        model: Option<&str>,
        options: &TextOptions,
    ) -> Result<String, ApiError> {
        let prompt = prompt.into();
        let model = model.unwrap_or(&self.config.text_model).to_string();

        let request = InferenceRequest::new(model.clone(), prompt.clone()).with_config(GenerationConfig {
            temperature: Some(options.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
            max_output_tokens: Some(options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
            thinking_budget: options.thinking_budget,
            system_instruction: Some(
                options
                    .system_instruction
                    .clone()
                    .unwrap_or_else(|| self.config.system_instruction.clone()),
            ),
            ..Default::default()
        });

        let text = self
            .cache
            .get_cached_or_fetch(&self.retrier, "generateText", &model, &prompt, || {
                tracing::info!(target: "nexus::text", model = %model, "Generating text");
                let response = self.endpoint.generate(&request)?;
                Ok(response.text().unwrap_or_else(|| NO_RESPONSE.to_string()))
            })?;

        tracing::info!(target: "nexus::text", model = %model, length = text.len(), "Text generation successful");
        Ok(text)
    }

    /// Structured output decoded into `T`.
    pub fn generate_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        schema: serde_json::Value,
    ) -> Result<T, ApiError> {
        tracing::info!(target: "nexus::json", "Generating structured JSON");
        let request = InferenceRequest::new(self.config.text_model.clone(), prompt).with_config(GenerationConfig {
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(schema),
            system_instruction: Some(self.config.system_instruction.clone()),
            ..Default::default()
        });
        let response = self.call("generateJSON", &request)?;
        parse_json_text(response.text(), "Empty JSON response received")
    }

    /// Single-page web app as separate HTML, CSS and JavaScript sources.
    pub fn generate_web_project(&self, prompt: &str) -> Result<WebProject, ApiError> {
        tracing::info!(target: "nexus::code", "Generating web project");
        let instruction = format!(
            "Create a single-page web application based on this request: \"{}\".\n\
             It must be modern, responsive, and functional.\n\
             Return ONLY the raw code for HTML, CSS, and JS in the specified JSON structure.",
            prompt
        );
        let schema = serde_json::json!({
            "type": "OBJECT",
            "properties": {
                "html": { "type": "STRING", "description": "The HTML structure (body content mainly)" },
                "css": { "type": "STRING", "description": "Modern CSS styles" },
                "javascript": { "type": "STRING", "description": "Functional JavaScript code" }
            },
            "required": ["html", "css", "javascript"]
        });
        let request = InferenceRequest::new(self.config.smart_model.clone(), instruction).with_config(
            GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(schema),
                thinking_budget: Some(SMART_THINKING_BUDGET),
                ..Default::default()
            },
        );
        let response = self.call("generateWebProject", &request)?;
        parse_json_text(response.text(), "No code generated")
    }

    /// Images as `data:` URLs, in response order.
    pub fn generate_image(
        &self,
        prompt: &str,
        aspect_ratio: &str,
        image_size: &str,
        fast: bool,
    ) -> Result<Vec<String>, ApiError> {
        tracing::info!(target: "nexus::image", aspect_ratio, image_size, "Generating image");
        let model = if fast { IMAGE_MODEL_FAST } else { IMAGE_MODEL_PRO };
        let request = InferenceRequest::new(model, Prompt::Parts(vec![Part::text(prompt)])).with_config(
            GenerationConfig {
                image_aspect_ratio: Some(aspect_ratio.to_string()),
                image_size: Some(image_size.to_string()),
                ..Default::default()
            },
        );
        let response = self.call("generateImage", &request)?;
        let images: Vec<String> = response.inline_data().map(InlineData::to_data_url).collect();
        tracing::info!(target: "nexus::image", count = images.len(), "Generated images");
        Ok(images)
    }

    /// Edit a base64 image; returns the first image of the reply as a `data:` URL.
    pub fn edit_image(&self, base64_image: &str, prompt: &str, mime_type: &str) -> Result<Option<String>, ApiError> {
        tracing::info!(target: "nexus::image", "Editing image");
        let request = InferenceRequest::new(
            IMAGE_MODEL_FAST,
            Prompt::Parts(vec![Part::inline(mime_type, base64_image), Part::text(prompt)]),
        );
        let response = self.call("editImage", &request)?;
        Ok(response.inline_data().next().map(InlineData::to_data_url))
    }

    /// Batch text-to-speech. Returns raw 24 kHz PCM16 bytes.
    pub fn generate_speech(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, ApiError> {
        let voice = voice.unwrap_or(&self.config.speech_voice);
        tracing::info!(target: "nexus::tts", voice, text_length = text.len(), "Generating speech");
        let request = InferenceRequest::new(TTS_MODEL, Prompt::Parts(vec![Part::text(text)])).with_config(
            GenerationConfig {
                response_modalities: vec![Modality::Audio],
                voice: Some(voice.to_string()),
                ..Default::default()
            },
        );
        let response = self.call("generateSpeech", &request)?;
        let audio = response
            .inline_data()
            .next()
            .ok_or_else(|| ApiError::EmptyResponse("No audio data generated".to_string()))?;
        general_purpose::STANDARD
            .decode(&audio.data)
            .map_err(|e| ApiError::Decode(format!("audio payload: {}", e)))
    }

    /// Answer grounded in web search or maps results.
    pub fn grounding_search(&self, query: &str, kind: GroundingKind) -> Result<GroundingResult, ApiError> {
        tracing::info!(target: "nexus::grounding", ?kind, "Executing grounding search");
        let tool = match kind {
            GroundingKind::Search => Tool::GoogleSearch,
            GroundingKind::Maps => Tool::GoogleMaps,
        };
        let request = InferenceRequest::new(self.config.text_model.clone(), query)
            .with_config(GenerationConfig {
                system_instruction: Some(self.config.system_instruction.clone()),
                ..Default::default()
            })
            .with_tools(vec![tool]);
        let response = self.call("groundingSearch", &request)?;
        Ok(GroundingResult {
            text: response.text().unwrap_or_default(),
            chunks: response.grounding_chunks(),
        })
    }

    /// Start a video job, poll it to completion and return the download URL.
    pub fn generate_video(&self, prompt: &str, image_data_url: Option<&str>) -> Result<String, ApiError> {
        tracing::info!(
            target: "nexus::video",
            has_image = image_data_url.is_some(),
            "Starting video generation"
        );
        let image = match image_data_url {
            Some(url) => Some(
                InlineData::from_data_url(url)
                    .ok_or_else(|| ApiError::Decode("image must be a base64 data URL".to_string()))?,
            ),
            None => None,
        };
        let request = VideoRequest {
            model: VIDEO_MODEL.to_string(),
            prompt: prompt.to_string(),
            image,
            resolution: "720p".to_string(),
            aspect_ratio: "16:9".to_string(),
        };

        let mut operation = self
            .retrier
            .invoke("generateVideo", Idempotency::Idempotent, || self.endpoint.start_video(&request))?;

        let interval = Duration::from_secs(self.config.video_poll_interval_secs);
        while !operation.done {
            self.video_sleeper.sleep(interval);
            operation = self.retrier.invoke("pollVideoStatus", Idempotency::Idempotent, || {
                self.endpoint.poll_video(&operation)
            })?;
        }

        if let Some(error) = &operation.error {
            tracing::error!(target: "nexus::video", "Video job failed: {}", error);
            return Err(ApiError::VideoFailed);
        }
        match operation.video_uri {
            Some(uri) => {
                tracing::info!(target: "nexus::video", "Video generation complete");
                Ok(format!("{}&key={}", uri, self.config.api_key.trim()))
            }
            None => {
                tracing::error!(target: "nexus::video", "Video job finished without a URI");
                Err(ApiError::VideoFailed)
            }
        }
    }

    /// One chat turn with optional inline attachments. Never cached.
    pub fn send_chat_message(
        &self,
        text: &str,
        mode: ChatMode,
        attachments: &[InlineData],
    ) -> Result<ChatReply, ApiError> {
        let (model, thinking_budget) = match mode {
            ChatMode::Fast => (self.config.text_model.clone(), None),
            ChatMode::Smart => (self.config.smart_model.clone(), Some(SMART_THINKING_BUDGET)),
        };

        let mut parts: Vec<Part> = attachments
            .iter()
            .map(|a| Part::inline(a.mime_type.clone(), a.data.clone()))
            .collect();
        parts.push(Part::text(text));

        let reply = self.generate_text(
            Prompt::Parts(parts),
            Some(&model),
            &TextOptions {
                thinking_budget,
                ..Default::default()
            },
        )?;

        Ok(ChatReply {
            model,
            text: reply,
            created_at: Utc::now(),
        })
    }

    /// Describe or answer questions about an inline media file.
    pub fn analyze_media(&self, data: &str, mime_type: &str, prompt: &str) -> Result<String, ApiError> {
        tracing::info!(target: "nexus::analysis", mime_type, size = data.len(), "Analyzing media");
        let request = InferenceRequest::new(
            self.config.smart_model.clone(),
            Prompt::Parts(vec![Part::inline(mime_type, data), Part::text(prompt)]),
        )
        .with_config(GenerationConfig {
            system_instruction: Some(self.config.system_instruction.clone()),
            ..Default::default()
        });
        let response = self.call("analyzeMedia", &request)?;
        Ok(response.text().unwrap_or_else(|| "Analysis complete.".to_string()))
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!(target: "nexus::service", "Response cache cleared");
    }
}

fn parse_json_text<T: DeserializeOwned>(text: Option<String>, empty_message: &str) -> Result<T, ApiError> {
    let text = text.ok_or_else(|| ApiError::EmptyResponse(empty_message.to_string()))?;
    serde_json::from_str(&text).map_err(|e| {
        tracing::error!(target: "nexus::json", "JSON parsing failed: {}", e);
        ApiError::Decode(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_text_is_decoded() {
        let project: WebProject =
            parse_json_text(Some(r#"{"html":"<p/>","css":"p{}","javascript":""}"#.to_string()), "none").unwrap();
        assert_eq!(project.html, "<p/>");
    }

    #[test]
    fn missing_or_invalid_json_is_an_error() {
        let empty: Result<WebProject, _> = parse_json_text(None, "No code generated");
        assert!(matches!(empty, Err(ApiError::EmptyResponse(m)) if m == "No code generated"));
        let bad: Result<WebProject, _> = parse_json_text(Some("{".to_string()), "x");
        assert!(matches!(bad, Err(ApiError::Decode(_))));
    }
}
