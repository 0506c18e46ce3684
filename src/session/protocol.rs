//! Wire protocol for the realtime conversation socket

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::WireBlob;
use crate::audio::pcm::OUTPUT_SAMPLE_RATE;
use crate::tools::{ToolInvocation, ToolResult, declarations};
use crate::{Error, Result};

/// Model used for the realtime conversation
pub const MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Prebuilt voice preset
pub const VOICE_NAME: &str = "Puck";

/// Persona instruction sent at setup
pub const SYSTEM_INSTRUCTION: &str = "You are a friendly, concise voice assistant that helps \
the user manage their task list. Use the available tools to add, remove, list and clear \
tasks whenever the user asks, and confirm what you did in one short sentence.";

/// Messages sent to the server
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// First message on a new socket
    Setup(Setup),
    /// Streamed microphone audio
    RealtimeInput(RealtimeInput),
    /// Answers to tool calls
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<ToolSet>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: FunctionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResult {
    pub result: String,
}

impl ClientMessage {
    /// The fixed session setup: audio replies, preset voice, persona, task tools
    #[must_use]
    pub fn setup() -> Self {
        Self::Setup(Setup {
            model: MODEL.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: serde_json::json!({
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": VOICE_NAME } }
                }),
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: SYSTEM_INSTRUCTION.to_string(),
                }],
            },
            tools: vec![ToolSet {
                function_declarations: declarations(),
            }],
        })
    }

    /// Wrap one encoded microphone chunk
    #[must_use]
    pub fn audio(blob: &WireBlob) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: blob.mime_type.to_string(),
                data: blob.to_base64(),
            }],
        })
    }

    /// Report a single tool result
    #[must_use]
    pub fn tool_response(result: ToolResult) -> Self {
        Self::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: result.id,
                name: result.name,
                response: FunctionResult {
                    result: result.result,
                },
            }],
        })
    }

    /// Serialize to the JSON text frame
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound messages, one variant per kind
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// The server accepted the setup
    SetupComplete,
    /// Base64 PCM16LE model audio
    Audio { data: String, sample_rate: u32 },
    /// The user talked over the model; flush playback
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// Batch of function calls, in order
    ToolCall(Vec<ToolInvocation>),
    /// The server will close the connection soon
    GoAway,
    /// The socket closed
    Closed { code: Option<u16>, reason: String },
    /// The server reported an error
    Error(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<RawServerContent>,
    tool_call: Option<RawToolCall>,
    go_away: Option<Value>,
    error: Option<RawError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    model_turn: Option<RawTurn>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawTurn {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    inline_data: Option<RawInlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToolCall {
    #[serde(default)]
    function_calls: Vec<ToolInvocation>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(default)]
    message: String,
}

impl ServerMessage {
    /// Classify one JSON frame into zero or more messages
    ///
    /// Frames that carry nothing we act on classify to an empty list.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the frame is not valid JSON of the expected shape
    pub fn parse(frame: &[u8]) -> Result<Vec<Self>> {
        let raw: RawServerMessage = serde_json::from_slice(frame)
            .map_err(|e| Error::Decode(format!("malformed server message: {e}")))?;

        let mut messages = Vec::new();

        if raw.setup_complete.is_some() {
            messages.push(Self::SetupComplete);
        }

        if let Some(content) = raw.server_content {
            if content.interrupted {
                messages.push(Self::Interrupted);
            }
            let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
            for inline in parts.into_iter().filter_map(|p| p.inline_data) {
                if inline.mime_type.is_empty() || inline.mime_type.starts_with("audio/pcm") {
                    messages.push(Self::Audio {
                        sample_rate: rate_from_mime(&inline.mime_type).unwrap_or(OUTPUT_SAMPLE_RATE),
                        data: inline.data,
                    });
                } else {
                    tracing::debug!(mime_type = %inline.mime_type, "ignoring non-audio inline data");
                }
            }
            if content.turn_complete {
                messages.push(Self::TurnComplete);
            }
        }

        if let Some(call) = raw.tool_call {
            messages.push(Self::ToolCall(call.function_calls));
        }

        if raw.go_away.is_some() {
            messages.push(Self::GoAway);
        }

        if let Some(error) = raw.error {
            messages.push(Self::Error(error.message));
        }

        Ok(messages)
    }
}

/// Extract `rate=N` from a MIME tag like `audio/pcm;rate=24000`
fn rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_declares_audio_voice_and_tools() {
        let json: Value = serde_json::from_str(&ClientMessage::setup().to_json().unwrap()).unwrap();
        let setup = &json["setup"];

        assert_eq!(setup["model"], MODEL);
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            VOICE_NAME
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], SYSTEM_INSTRUCTION);
        assert_eq!(
            setup["tools"][0]["functionDeclarations"].as_array().unwrap().len(),
            4
        );
    }

    #[test]
    fn audio_message_carries_base64_blob() {
        let blob = WireBlob {
            mime_type: "audio/pcm;rate=16000",
            data: vec![1, 2, 3],
        };
        let json: Value = serde_json::from_str(&ClientMessage::audio(&blob).to_json().unwrap()).unwrap();
        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AQID");
    }

    #[test]
    fn tool_response_shape() {
        let msg = ClientMessage::tool_response(ToolResult {
            id: "fc-1".to_string(),
            name: "getTasks".to_string(),
            result: "The task list is empty.".to_string(),
        });
        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        let response = &json["toolResponse"]["functionResponses"][0];
        assert_eq!(response["id"], "fc-1");
        assert_eq!(response["name"], "getTasks");
        assert_eq!(response["response"]["result"], "The task list is empty.");
    }

    #[test]
    fn parses_model_audio_turn() {
        let frame = br#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}]}}}"#;
        assert_eq!(
            ServerMessage::parse(frame).unwrap(),
            vec![ServerMessage::Audio {
                data: "AAAA".to_string(),
                sample_rate: 24000
            }]
        );
    }

    #[test]
    fn parses_interruption_and_turn_complete() {
        let frame = br#"{"serverContent":{"interrupted":true}}"#;
        assert_eq!(ServerMessage::parse(frame).unwrap(), vec![ServerMessage::Interrupted]);

        let frame = br#"{"serverContent":{"turnComplete":true}}"#;
        assert_eq!(ServerMessage::parse(frame).unwrap(), vec![ServerMessage::TurnComplete]);
    }

    #[test]
    fn parses_tool_call_batch() {
        let frame = br#"{"toolCall":{"functionCalls":[
            {"id":"a","name":"addTask","args":{"text":"Buy milk"}},
            {"id":"b","name":"getTasks"}
        ]}}"#;
        let messages = ServerMessage::parse(frame).unwrap();
        let ServerMessage::ToolCall(calls) = &messages[0] else {
            panic!("expected tool call, got {messages:?}");
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].args["text"], "Buy milk");
        assert_eq!(calls[1].name, "getTasks");
        assert!(calls[1].args.is_empty());
    }

    #[test]
    fn parses_setup_complete_go_away_and_error() {
        assert_eq!(
            ServerMessage::parse(br#"{"setupComplete":{}}"#).unwrap(),
            vec![ServerMessage::SetupComplete]
        );
        assert_eq!(
            ServerMessage::parse(br#"{"goAway":{"timeLeft":"5s"}}"#).unwrap(),
            vec![ServerMessage::GoAway]
        );
        assert_eq!(
            ServerMessage::parse(br#"{"error":{"message":"quota exceeded"}}"#).unwrap(),
            vec![ServerMessage::Error("quota exceeded".to_string())]
        );
    }

    #[test]
    fn unknown_fields_classify_to_nothing() {
        assert!(ServerMessage::parse(br#"{"usageMetadata":{"totalTokenCount":4}}"#)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn malformed_frame_is_decode_error() {
        assert!(matches!(ServerMessage::parse(b"{nope"), Err(Error::Decode(_))));
    }

    #[test]
    fn mime_rate_parsing() {
        assert_eq!(rate_from_mime("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(rate_from_mime("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(rate_from_mime("audio/pcm"), None);
    }
}
