//! Wire messages of the BidiGenerateContent live protocol.
//!
//! Outbound messages are built from [`ClientMessage`]; inbound JSON frames are
//! decoded once into a list of [`ServerMessage`]s, since a single frame can
//! carry several audio parts plus transcription and completion flags.

use serde::Deserialize;

use super::pcm::AudioFrame;
use crate::api::types::InlineData;

/// Session parameters sent in the first message on the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

impl LiveSetup {
    pub fn from_config(config: &crate::config::NexusConfig) -> Self {
        Self {
            model: config.live_model.clone(),
            voice: config.live_voice.clone(),
            system_instruction: config.system_instruction.clone(),
            input_transcription: true,
            output_transcription: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Setup(LiveSetup),
    RealtimeAudio(AudioFrame),
    Text { text: String, turn_complete: bool },
}

impl ClientMessage {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ClientMessage::Setup(setup) => {
                let model = if setup.model.starts_with("models/") {
                    setup.model.clone()
                } else {
                    format!("models/{}", setup.model)
                };
                let mut body = serde_json::json!({
                    "model": model,
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": {
                                "prebuiltVoiceConfig": { "voiceName": setup.voice }
                            }
                        }
                    }
                });
                if !setup.system_instruction.is_empty() {
                    body["systemInstruction"] =
                        serde_json::json!({ "parts": [{ "text": setup.system_instruction }] });
                }
                if setup.input_transcription {
                    body["inputAudioTranscription"] = serde_json::json!({});
                }
                if setup.output_transcription {
                    body["outputAudioTranscription"] = serde_json::json!({});
                }
                serde_json::json!({ "setup": body })
            }
            ClientMessage::RealtimeAudio(frame) => serde_json::json!({
                "realtimeInput": {
                    "mediaChunks": [{ "mimeType": frame.mime_type, "data": frame.data }]
                }
            }),
            ClientMessage::Text { text, turn_complete } => serde_json::json!({
                "clientContent": {
                    "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                    "turnComplete": turn_complete
                }
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    SetupComplete,
    AudioChunk { data: String, mime_type: String },
    TextDelta(String),
    InputTranscription(String),
    OutputTranscription(String),
    ToolCall(Vec<FunctionCall>),
    TurnComplete,
    Interrupted,
    GoAway { time_left: Option<String> },
    Error { code: Option<i64>, message: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<RawServerContent>,
    tool_call: Option<RawToolCall>,
    go_away: Option<RawGoAway>,
    error: Option<RawError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    model_turn: Option<RawTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    input_transcription: Option<RawTranscription>,
    output_transcription: Option<RawTranscription>,
}

#[derive(Deserialize)]
struct RawTurn {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    text: Option<String>,
    inline_data: Option<InlineData>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize)]
struct RawTranscription {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToolCall {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGoAway {
    time_left: Option<String>,
}

#[derive(Deserialize)]
struct RawError {
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

/// Decode one inbound text frame. Unknown fields are ignored; a frame with no
/// recognised content yields an empty list.
pub fn decode_server_message(raw: &str) -> Result<Vec<ServerMessage>, serde_json::Error> {
    let frame: RawFrame = serde_json::from_str(raw)?;
    let mut out = Vec::new();

    if frame.setup_complete.is_some() {
        out.push(ServerMessage::SetupComplete);
    }

    if let Some(content) = frame.server_content {
        if content.interrupted {
            out.push(ServerMessage::Interrupted);
        }
        for part in content.model_turn.into_iter().flat_map(|t| t.parts) {
            if let Some(inline) = part.inline_data {
                if inline.mime_type.starts_with("audio/") {
                    out.push(ServerMessage::AudioChunk {
                        data: inline.data,
                        mime_type: inline.mime_type,
                    });
                }
            } else if let Some(text) = part.text {
                if !part.thought && !text.is_empty() {
                    out.push(ServerMessage::TextDelta(text));
                }
            }
        }
        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                out.push(ServerMessage::InputTranscription(text));
            }
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                out.push(ServerMessage::OutputTranscription(text));
            }
        }
        if content.turn_complete {
            out.push(ServerMessage::TurnComplete);
        }
    }

    if let Some(call) = frame.tool_call {
        if !call.function_calls.is_empty() {
            out.push(ServerMessage::ToolCall(call.function_calls));
        }
    }

    if let Some(go_away) = frame.go_away {
        out.push(ServerMessage::GoAway {
            time_left: go_away.time_left,
        });
    }

    if let Some(err) = frame.error {
        out.push(ServerMessage::Error {
            code: err.code,
            message: err.message,
        });
    }

    Ok(out)
}
