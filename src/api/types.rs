//! Request and response shapes for the generateContent REST surface.

use serde::{Deserialize, Serialize};

/// A prompt is either plain text (cacheable) or multimodal parts (never cached).
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Text(String),
    Parts(Vec<Part>),
}

impl Prompt {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Prompt::Text(text) => Some(text),
            Prompt::Parts(_) => None,
        }
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
}

impl InlineData {
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Parse `data:<mime>;base64,<payload>`.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (mime_type, data) = rest.split_once(";base64,")?;
        Some(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(default, skip_serializing)]
    pub thought: bool,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
            thought: false,
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
            thought: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modality {
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "IMAGE")]
    Image,
    #[serde(rename = "AUDIO")]
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    GoogleSearch,
    GoogleMaps,
}

/// Generation parameters. `None` fields are left to the service defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub thinking_budget: Option<u32>,
    pub system_instruction: Option<String>,
    pub response_mime_type: Option<String>,
    pub response_schema: Option<serde_json::Value>,
    pub response_modalities: Vec<Modality>,
    pub voice: Option<String>,
    pub image_aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

/// One request-response inference call. Built once, then only borrowed.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: Prompt,
    pub config: GenerationConfig,
    pub tools: Vec<Tool>,
}

impl InferenceRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<Prompt>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            config: GenerationConfig::default(),
            tools: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    /// Wire body for `models/{model}:generateContent`.
    pub fn to_payload(&self) -> serde_json::Value {
        let parts = match &self.prompt {
            Prompt::Text(text) => vec![Part::text(text.clone())],
            Prompt::Parts(parts) => parts.clone(),
        };
        let mut payload = serde_json::json!({
            "contents": [{ "role": "user", "parts": parts }]
        });

        let cfg = &self.config;
        let mut generation = serde_json::Map::new();
        if let Some(t) = cfg.temperature {
            generation.insert("temperature".into(), serde_json::json!(t));
        }
        if let Some(n) = cfg.max_output_tokens {
            generation.insert("maxOutputTokens".into(), serde_json::json!(n));
        }
        if let Some(budget) = cfg.thinking_budget {
            generation.insert(
                "thinkingConfig".into(),
                serde_json::json!({ "thinkingBudget": budget }),
            );
        }
        if let Some(mime) = &cfg.response_mime_type {
            generation.insert("responseMimeType".into(), serde_json::json!(mime));
        }
        if let Some(schema) = &cfg.response_schema {
            generation.insert("responseSchema".into(), schema.clone());
        }
        if !cfg.response_modalities.is_empty() {
            generation.insert(
                "responseModalities".into(),
                serde_json::json!(cfg.response_modalities),
            );
        }
        if let Some(voice) = &cfg.voice {
            generation.insert(
                "speechConfig".into(),
                serde_json::json!({
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                }),
            );
        }
        if cfg.image_aspect_ratio.is_some() || cfg.image_size.is_some() {
            let mut image = serde_json::Map::new();
            if let Some(ratio) = &cfg.image_aspect_ratio {
                image.insert("aspectRatio".into(), serde_json::json!(ratio));
            }
            if let Some(size) = &cfg.image_size {
                image.insert("imageSize".into(), serde_json::json!(size));
            }
            generation.insert("imageConfig".into(), serde_json::Value::Object(image));
        }
        if !generation.is_empty() {
            payload["generationConfig"] = serde_json::Value::Object(generation);
        }

        if let Some(instruction) = &cfg.system_instruction {
            payload["systemInstruction"] = serde_json::json!({ "parts": [{ "text": instruction }] });
        }

        if !self.tools.is_empty() {
            let tools: Vec<serde_json::Value> = self
                .tools
                .iter()
                .map(|tool| match tool {
                    Tool::GoogleSearch => serde_json::json!({ "google_search": {} }),
                    Tool::GoogleMaps => serde_json::json!({ "google_maps": {} }),
                })
                .collect();
            payload["tools"] = serde_json::Value::Array(tools);
        }

        payload
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Content,
    pub grounding_metadata: Option<GroundingMetadata>,
}

/// Decoded `generateContent` response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl GenerateResponse {
    fn first_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .map(|c| c.content.parts.as_slice())
            .unwrap_or(&[])
    }

    /// Concatenated non-thought text of the first candidate, if any.
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .first_parts()
            .iter()
            .filter(|p| !p.thought)
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() { None } else { Some(text) }
    }

    pub fn inline_data(&self) -> impl Iterator<Item = &InlineData> {
        self.first_parts().iter().filter_map(|p| p.inline_data.as_ref())
    }

    pub fn grounding_chunks(&self) -> Vec<serde_json::Value> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|g| g.grounding_chunks.clone())
            .unwrap_or_default()
    }
}

/// Long-running video generation job.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRequest {
    pub model: String,
    pub prompt: String,
    pub image: Option<InlineData>,
    pub resolution: String,
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoOperation {
    pub name: String,
    pub done: bool,
    pub video_uri: Option<String>,
    /// Set when the job finished unsuccessfully
    pub error: Option<String>,
}
