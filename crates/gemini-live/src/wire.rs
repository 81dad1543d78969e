//! Wire envelopes for the live WebSocket protocol.
//!
//! Outbound messages serialize with snake_case keys; inbound messages arrive
//! camelCase. Inbound structs keep every field optional and ignore unknown
//! keys, so upstream schema drift costs a field, not the session.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use viva_core::score::SCORE_TOOL_NAME;

// --- Outbound ---

/// Top-level client envelope; externally tagged by message kind.
#[derive(Serialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

#[derive(Serialize, Debug)]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    /// Presence alone enables transcription of the model's speech.
    pub output_audio_transcription: AudioTranscriptionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDeclaration>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Serialize, Debug, Default)]
pub struct AudioTranscriptionConfig {}

#[derive(Serialize, Debug)]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    pub speech_config: SpeechConfig,
    pub temperature: f64,
    pub top_p: f64,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

#[derive(Serialize, Debug)]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug)]
pub struct ToolDeclaration {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize, Debug)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Serialize, Debug)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
pub struct Part {
    pub text: String,
}

#[derive(Serialize, Debug)]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Serialize, Debug)]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

#[derive(Serialize, Debug)]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Serialize, Debug)]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Serialize, Debug)]
pub struct FunctionResponse {
    pub name: String,
    pub id: String,
    pub response: Value,
}

/// JSON schema of the scoring function's parameters.
pub fn score_tool_parameters() -> Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "score": {
                "type": "INTEGER",
                "description": "The score of the answer from 0 to 10.",
            },
        },
        "required": ["score"],
    })
}

/// Human-readable purpose line attached to the scoring declaration.
pub const SCORE_TOOL_DESCRIPTION: &str = "Report the score of the user's answer effectiveness.";

/// The scoring tool declaration for the live setup message.
pub fn score_tool_declaration() -> ToolDeclaration {
    ToolDeclaration {
        function_declarations: vec![FunctionDeclaration {
            name: SCORE_TOOL_NAME.to_string(),
            description: SCORE_TOOL_DESCRIPTION.to_string(),
            parameters: score_tool_parameters(),
        }],
    }
}

/// Wraps one encoded capture frame as a realtime input message.
pub fn realtime_audio_message(data: String) -> ClientMessage {
    ClientMessage::RealtimeInput(RealtimeInput {
        media_chunks: vec![MediaChunk {
            mime_type: "audio/pcm".to_string(),
            data,
        }],
    })
}

/// Wraps a complete user text turn.
pub fn user_text_message(text: String) -> ClientMessage {
    ClientMessage::ClientContent(ClientContent {
        turns: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part { text }],
        }],
        turn_complete: true,
    })
}

/// Acknowledges a tool call so the model's turn can continue.
pub fn tool_ok_response(name: String, id: String) -> ClientMessage {
    ClientMessage::ToolResponse(ToolResponse {
        function_responses: vec![FunctionResponse {
            name,
            id,
            response: serde_json::json!({ "result": { "status": "ok" } }),
        }],
    })
}

// --- Inbound ---

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub error: Option<ErrorPayload>,
    pub server_content: Option<ServerContent>,
}

#[derive(Deserialize, Debug)]
pub struct ErrorPayload {
    pub message: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub output_transcription: Option<Transcription>,
    pub input_transcription: Option<Transcription>,
    // The user-transcript field has gone by several names upstream; decode
    // all of them and let `user_transcript` pick whichever is populated.
    pub speech_recognition_results: Option<Recognition>,
    pub recognition_result: Option<Recognition>,
    pub turn_complete: Option<bool>,
}

impl ServerContent {
    /// The user's speech transcript, wherever the server put it.
    pub fn user_transcript(&self) -> Option<String> {
        if let Some(text) = self.input_transcription.as_ref().and_then(|t| t.text.clone()) {
            return Some(text);
        }
        self.speech_recognition_results
            .as_ref()
            .or(self.recognition_result.as_ref())
            .and_then(Recognition::text)
    }
}

#[derive(Deserialize, Debug)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
    pub function_call: Option<FunctionCall>,
    pub executable_code: Option<ExecutableCode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct FunctionCall {
    pub name: String,
    pub id: Option<String>,
    pub args: Option<Value>,
}

#[derive(Deserialize, Debug)]
pub struct ExecutableCode {
    pub code: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct Transcription {
    pub text: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct Recognition {
    pub transcript: Option<String>,
    #[serde(default)]
    pub parts: Vec<RecognitionPart>,
}

#[derive(Deserialize, Debug)]
pub struct RecognitionPart {
    pub text: Option<String>,
}

impl Recognition {
    fn text(&self) -> Option<String> {
        if let Some(transcript) = &self.transcript {
            return Some(transcript.clone());
        }
        self.parts.first().and_then(|p| p.text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setup_serializes_with_snake_case_envelope() {
        let msg = ClientMessage::Setup(Setup {
            model: "models/gemini-2.0-flash-exp".to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: "Aoede".to_string(),
                        },
                    },
                },
                temperature: 0.5,
                top_p: 0.95,
            },
            output_audio_transcription: AudioTranscriptionConfig::default(),
            tools: Some(vec![score_tool_declaration()]),
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part {
                    text: "Quiz the user.".to_string(),
                }],
            }),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value
                .pointer("/setup/generation_config/speech_config/voice_config/prebuilt_voice_config/voice_name"),
            Some(&json!("Aoede"))
        );
        assert_eq!(value.pointer("/setup/generation_config/top_p"), Some(&json!(0.95)));
        assert_eq!(
            value.pointer("/setup/generation_config/response_modalities/0"),
            Some(&json!("AUDIO"))
        );
        assert_eq!(value.pointer("/setup/output_audio_transcription"), Some(&json!({})));
        assert_eq!(
            value.pointer("/setup/tools/0/function_declarations/0/name"),
            Some(&json!("report_score"))
        );
        assert_eq!(
            value.pointer("/setup/tools/0/function_declarations/0/parameters/required/0"),
            Some(&json!("score"))
        );
        assert_eq!(
            value.pointer("/setup/system_instruction/parts/0/text"),
            Some(&json!("Quiz the user."))
        );
    }

    #[test]
    fn realtime_input_matches_the_media_chunk_shape() {
        let value = serde_json::to_value(realtime_audio_message("AAAA".to_string())).unwrap();
        assert_eq!(
            value,
            json!({
                "realtime_input": {
                    "media_chunks": [{ "mime_type": "audio/pcm", "data": "AAAA" }]
                }
            })
        );
    }

    #[test]
    fn user_text_turn_is_complete() {
        let value = serde_json::to_value(user_text_message("hello".to_string())).unwrap();
        assert_eq!(value.pointer("/client_content/turn_complete"), Some(&json!(true)));
        assert_eq!(
            value.pointer("/client_content/turns/0/role"),
            Some(&json!("user"))
        );
        assert_eq!(
            value.pointer("/client_content/turns/0/parts/0/text"),
            Some(&json!("hello"))
        );
    }

    #[test]
    fn tool_response_carries_name_id_and_result() {
        let value =
            serde_json::to_value(tool_ok_response("report_score".to_string(), "call-1".to_string()))
                .unwrap();
        assert_eq!(
            value.pointer("/tool_response/function_responses/0/id"),
            Some(&json!("call-1"))
        );
        assert_eq!(
            value.pointer("/tool_response/function_responses/0/response/result/status"),
            Some(&json!("ok"))
        );
    }

    #[test]
    fn inbound_message_tolerates_unknown_fields() {
        let raw = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } },
                        { "text": "Hello." },
                        { "functionCall": { "name": "report_score", "id": "c1", "args": { "score": 7 } } },
                        { "executableCode": { "code": "report_score(score=7)", "language": "PYTHON" } }
                    ]
                },
                "outputTranscription": { "text": "Hello.", "finished": true },
                "turnComplete": true,
                "someFutureField": 42
            },
            "anotherUnknown": {}
        })
        .to_string();
        let message: ServerMessage = serde_json::from_str(&raw).unwrap();
        let content = message.server_content.unwrap();
        assert_eq!(content.turn_complete, Some(true));
        let parts = content.model_turn.unwrap().parts;
        assert_eq!(parts.len(), 4);
        assert!(parts[0].inline_data.as_ref().unwrap().mime_type.starts_with("audio/pcm"));
        assert_eq!(parts[2].function_call.as_ref().unwrap().name, "report_score");
        assert_eq!(
            parts[3].executable_code.as_ref().unwrap().code.as_deref(),
            Some("report_score(score=7)")
        );
    }

    #[test]
    fn user_transcript_falls_back_across_field_names() {
        let via_input: ServerMessage = serde_json::from_str(
            &json!({ "serverContent": { "inputTranscription": { "text": "first form" } } }).to_string(),
        )
        .unwrap();
        assert_eq!(
            via_input.server_content.unwrap().user_transcript(),
            Some("first form".to_string())
        );

        let via_recognition: ServerMessage = serde_json::from_str(
            &json!({ "serverContent": { "speechRecognitionResults": { "transcript": "second form" } } })
                .to_string(),
        )
        .unwrap();
        assert_eq!(
            via_recognition.server_content.unwrap().user_transcript(),
            Some("second form".to_string())
        );

        let via_parts: ServerMessage = serde_json::from_str(
            &json!({ "serverContent": { "recognitionResult": { "parts": [{ "text": "third form" }] } } })
                .to_string(),
        )
        .unwrap();
        assert_eq!(
            via_parts.server_content.unwrap().user_transcript(),
            Some("third form".to_string())
        );
    }

    #[test]
    fn error_envelope_decodes() {
        let message: ServerMessage =
            serde_json::from_str(&json!({ "error": { "message": "quota exceeded" } }).to_string())
                .unwrap();
        assert_eq!(
            message.error.unwrap().message.as_deref(),
            Some("quota exceeded")
        );
    }
}
