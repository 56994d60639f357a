//! Blocking REST client for the generateContent surface.

use std::time::Duration;

use lazy_static::lazy_static;
use serde::Deserialize;

use super::types::{GenerateResponse, InferenceRequest, VideoOperation, VideoRequest};
use crate::config::NexusConfig;
use crate::error::{ConfigError, TransportError};

/// Response bodies carry base64 images; 4K renders exceed ureq's 10 MB default.
pub const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

lazy_static! {
    /// Shared HTTP agent. Non-2xx statuses are returned as responses so the
    /// status code can be attached to the error.
    pub static ref UREQ_AGENT: ureq::Agent = {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(120)))
            .http_status_as_error(false)
            .tls_config(
                ureq::tls::TlsConfig::builder()
                    .provider(ureq::tls::TlsProvider::NativeTls)
                    .build(),
            )
            .build();
        ureq::Agent::new_with_config(config)
    };
}

/// A request/response inference service.
pub trait InferenceEndpoint: Send + Sync {
    fn generate(&self, request: &InferenceRequest) -> Result<GenerateResponse, TransportError>;

    fn start_video(&self, request: &VideoRequest) -> Result<VideoOperation, TransportError>;

    fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation, TransportError>;
}

pub struct GeminiRestClient {
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    done: bool,
    response: Option<OperationResponse>,
    error: Option<ApiErrorDetail>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    generate_video_response: Option<GeneratedVideos>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedVideos {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Deserialize)]
struct GeneratedSample {
    video: Option<VideoRef>,
}

#[derive(Deserialize)]
struct VideoRef {
    uri: Option<String>,
}

impl GeminiRestClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &NexusConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.api_key()?, config.api_base_url.clone()))
    }

    fn read_body(
        response: ureq::http::Response<ureq::Body>,
    ) -> Result<String, TransportError> {
        let status = response.status().as_u16();
        let body = response
            .into_body()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_string()
            .map_err(|e| TransportError::new(Some(status), format!("failed to read body: {}", e)))?;

        if (200..300).contains(&status) {
            return Ok(body);
        }

        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.error)
            .and_then(|e| e.message)
            .unwrap_or_else(|| format!("HTTP {}", status));
        Err(TransportError::new(Some(status), message))
    }

    fn post_json(&self, url: &str, payload: &serde_json::Value) -> Result<String, TransportError> {
        let response = UREQ_AGENT
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .send_json(payload)
            .map_err(|e| TransportError::network(format!("Gemini request error: {}", e)))?;
        Self::read_body(response)
    }

    fn decode_operation(body: &str) -> Result<VideoOperation, TransportError> {
        let op: OperationBody = serde_json::from_str(body)
            .map_err(|e| TransportError::network(format!("invalid operation payload: {}", e)))?;
        let error = op
            .error
            .map(|e| e.message.unwrap_or_else(|| "video operation failed".to_string()));
        let video_uri = op
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|v| v.generated_samples.into_iter().next())
            .and_then(|s| s.video)
            .and_then(|v| v.uri);
        Ok(VideoOperation {
            name: op.name,
            done: op.done || error.is_some(),
            video_uri,
            error,
        })
    }
}

impl InferenceEndpoint for GeminiRestClient {
    fn generate(&self, request: &InferenceRequest) -> Result<GenerateResponse, TransportError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        let body = self.post_json(&url, &request.to_payload())?;
        serde_json::from_str(&body)
            .map_err(|e| TransportError::network(format!("invalid generateContent payload: {}", e)))
    }

    fn start_video(&self, request: &VideoRequest) -> Result<VideoOperation, TransportError> {
        let url = format!("{}/models/{}:predictLongRunning", self.base_url, request.model);
        let mut instance = serde_json::json!({ "prompt": request.prompt });
        if let Some(image) = &request.image {
            instance["image"] = serde_json::json!({
                "bytesBase64Encoded": image.data,
                "mimeType": image.mime_type,
            });
        }
        let payload = serde_json::json!({
            "instances": [instance],
            "parameters": {
                "aspectRatio": request.aspect_ratio,
                "resolution": request.resolution,
                "sampleCount": 1
            }
        });
        let body = self.post_json(&url, &payload)?;
        Self::decode_operation(&body)
    }

    fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation, TransportError> {
        let url = format!("{}/{}", self.base_url, operation.name);
        let response = UREQ_AGENT
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .call()
            .map_err(|e| TransportError::network(format!("Gemini request error: {}", e)))?;
        let body = Self::read_body(response)?;
        Self::decode_operation(&body)
    }
}
