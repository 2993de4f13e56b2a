//! Live API wire protocol
//!
//! Client frames are externally tagged (`{"setup": …}`, `{"realtimeInput": …}`,
//! `{"toolResponse": …}`). Server frames may carry any subset of
//! `setupComplete`, `serverContent` and `toolCall`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::voice::codec::{INPUT_MIME_TYPE, encode_frame};

/// Messages sent to the remote endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SessionSetup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

/// Session configuration sent once at connect time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<ToolDeclarations>,
    pub output_audio_transcription: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoice,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoice {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDeclarations {
    pub function_declarations: Value,
}

impl SessionSetup {
    /// Audio-only session with transcription of the model's speech
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        voice: impl Into<String>,
        instruction: impl Into<String>,
        function_declarations: Value,
    ) -> Self {
        Self {
            model: model.into(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoice {
                            voice_name: voice.into(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: instruction.into(),
                }],
            },
            tools: vec![ToolDeclarations {
                function_declarations,
            }],
            output_audio_transcription: Value::Object(serde_json::Map::new()),
        }
    }
}

/// A base64 audio blob with its MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub data: String,
    pub mime_type: String,
}

impl MediaChunk {
    /// Encode one capture frame as PCM16 @ 16 kHz
    #[must_use]
    pub fn from_samples(samples: &[f32]) -> Self {
        Self {
            data: encode_frame(samples),
            mime_type: INPUT_MIME_TYPE.to_string(),
        }
    }
}

/// Streaming microphone input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

impl RealtimeInput {
    #[must_use]
    pub fn audio(media: MediaChunk) -> Self {
        Self {
            media_chunks: vec![media],
        }
    }
}

/// Responses to tool invocations
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Result of one tool invocation, correlated by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// A message from the remote endpoint
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCallBatch>,
    #[serde(default)]
    pub go_away: Option<Value>,
}

impl ServerMessage {
    /// Transcript fragment, if present and non-empty
    #[must_use]
    pub fn transcript_text(&self) -> Option<&str> {
        self.server_content
            .as_ref()?
            .output_transcription
            .as_ref()?
            .text
            .as_deref()
            .filter(|t| !t.is_empty())
    }

    #[must_use]
    pub fn turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .is_some_and(|c| c.turn_complete == Some(true))
    }

    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .is_some_and(|c| c.interrupted == Some(true))
    }

    /// Every inline audio payload in the model turn, in order
    #[must_use]
    pub fn audio_payloads(&self) -> Vec<&str> {
        self.server_content
            .as_ref()
            .and_then(|c| c.model_turn.as_ref())
            .map(|turn| {
                turn.parts
                    .iter()
                    .filter_map(|p| p.inline_data.as_ref())
                    .map(|d| d.data.as_str())
                    .filter(|d| !d.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tool invocations in array order
    #[must_use]
    pub fn function_calls(&self) -> &[FunctionCall] {
        self.tool_call
            .as_ref()
            .map(|batch| batch.function_calls.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBatch {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// A remote tool invocation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn realtime_input_wire_shape() {
        let msg = ClientMessage::RealtimeInput(RealtimeInput::audio(MediaChunk::from_samples(&[
            0.0, 0.0,
        ])));
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            v,
            json!({"realtimeInput": {"mediaChunks": [{"data": "AAAAAA==", "mimeType": "audio/pcm;rate=16000"}]}})
        );
    }

    #[test]
    fn tool_response_wire_shape() {
        let msg = ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: "call-1".to_string(),
                name: "get-tasks".to_string(),
                response: json!({"tasks": []}),
            }],
        });
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["toolResponse"]["functionResponses"][0]["id"], "call-1");
        assert_eq!(v["toolResponse"]["functionResponses"][0]["response"]["tasks"], json!([]));
    }

    #[test]
    fn setup_wire_shape() {
        let setup = SessionSetup::new("models/m", "Kore", "be brief", json!([]));
        let v = serde_json::to_value(ClientMessage::Setup(setup)).unwrap();
        let s = &v["setup"];
        assert_eq!(s["model"], "models/m");
        assert_eq!(s["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            s["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(s["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(s["outputAudioTranscription"], json!({}));
        assert!(s["tools"][0]["functionDeclarations"].is_array());
    }

    #[test]
    fn parses_combined_server_message() {
        let raw = json!({
            "serverContent": {
                "outputTranscription": {"text": "Hello"},
                "modelTurn": {"parts": [
                    {"inlineData": {"data": "AAA=", "mimeType": "audio/pcm;rate=24000"}},
                    {"text": "ignored"},
                    {"inlineData": {"data": "BBB="}}
                ]},
                "turnComplete": true
            },
            "toolCall": {"functionCalls": [
                {"id": "a", "name": "add-tasks", "args": {"new_tasks": []}},
                {"id": "b", "name": "get-tasks"}
            ]}
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.transcript_text(), Some("Hello"));
        assert!(msg.turn_complete());
        assert!(!msg.interrupted());
        assert_eq!(msg.audio_payloads(), vec!["AAA=", "BBB="]);
        assert_eq!(msg.function_calls().len(), 2);
        assert_eq!(msg.function_calls()[1].args, Value::Null);
    }

    #[test]
    fn empty_message_has_nothing() {
        let msg: ServerMessage = serde_json::from_str("{}").unwrap();
        assert!(msg.transcript_text().is_none());
        assert!(msg.audio_payloads().is_empty());
        assert!(msg.function_calls().is_empty());
    }

    #[test]
    fn setup_complete_is_recognized() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.setup_complete.is_some());
    }
}
