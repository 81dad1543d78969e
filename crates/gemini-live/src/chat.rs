//! The turn-based variant: text chat over the streaming HTTP generate call.
//!
//! There is no persistent transport and the microphone is never opened;
//! `connect` only records configuration. Each user turn runs one streaming
//! generation over the full history, and any tool calls are answered and
//! followed by another generation so the model can react to its own tool
//! results before the turn yields back to the caller.

use crate::wire::{score_tool_parameters, SCORE_TOOL_DESCRIPTION};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use viva_core::score::{score_from_args, SCORE_TOOL_NAME};
use viva_core::{
    ConnectionState, EventSender, SessionAdapter, SessionConfig, SessionError, SessionEvent,
    SessionResult,
};

const GENERATE_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const CHAT_MODEL: &str = "gemini-2.0-flash-exp";

/// Upper bound on tool-response follow-up generations within one user turn.
/// A model that keeps calling tools forfeits the rest of its turn instead of
/// recursing without limit.
const MAX_TOOL_TURNS: usize = 4;

// REST request/response shapes; this API speaks camelCase JSON.

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ChatContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<ChatPart>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct ChatPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<ChatFunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<ChatFunctionResponse>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ChatFunctionCall {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ChatFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [ChatContent],
    system_instruction: SystemInstruction,
    generation_config: GenerationParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatToolDeclaration>>,
}

#[derive(Serialize, Debug)]
struct SystemInstruction {
    parts: Vec<ChatPart>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f64,
    top_p: f64,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ChatToolDeclaration {
    function_declarations: Vec<ChatFunctionDeclaration>,
}

#[derive(Serialize, Debug)]
struct ChatFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize, Debug)]
struct GenerateChunk {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<ChatContent>,
}

/// TurnBasedVariant of the session capability.
pub struct GeminiChatAdapter {
    api_key: String,
    http: reqwest::Client,
    events: EventSender,
    state: ConnectionState,
    config: SessionConfig,
    history: Vec<ChatContent>,
}

impl GeminiChatAdapter {
    pub fn new(api_key: String, events: EventSender) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
            events,
            state: ConnectionState::Idle,
            config: SessionConfig::default(),
            history: Vec::new(),
        }
    }

    /// Runs generation passes until the model stops calling tools, bounded
    /// by [`MAX_TOOL_TURNS`].
    async fn generate(&mut self) -> SessionResult<()> {
        for _ in 0..MAX_TOOL_TURNS {
            let calls = self.generate_once().await?;
            if calls.is_empty() {
                return Ok(());
            }
            debug!(count = calls.len(), "answering tool calls");
            self.push_tool_responses(&calls);
        }
        warn!("tool continuation limit reached; ending turn");
        Ok(())
    }

    /// One streaming generation over the current history.
    async fn generate_once(&mut self) -> SessionResult<Vec<ChatFunctionCall>> {
        let request = GenerateRequest {
            contents: &self.history,
            system_instruction: SystemInstruction {
                parts: vec![ChatPart {
                    text: Some(self.config.effective_instruction()),
                    ..Default::default()
                }],
            },
            generation_config: GenerationParams {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
            },
            tools: self.config.score_tracking.then(|| {
                vec![ChatToolDeclaration {
                    function_declarations: vec![ChatFunctionDeclaration {
                        name: SCORE_TOOL_NAME.to_string(),
                        description: SCORE_TOOL_DESCRIPTION.to_string(),
                        parameters: score_tool_parameters(),
                    }],
                }]
            }),
        };

        let url = format!(
            "{GENERATE_BASE}/{CHAT_MODEL}:streamGenerateContent?alt=sse&key={}",
            self.api_key
        );
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = SessionError::Transport(format!("generate failed with {status}: {body}"));
            let _ = self.events.send(SessionEvent::Error(error.to_string()));
            return Err(error);
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut chunks = Vec::new();
        while let Some(piece) = stream.next().await {
            let piece = piece.map_err(|e| SessionError::Transport(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&piece));
            for payload in drain_sse_data(&mut buffer) {
                push_parsed_chunk(&payload, &mut chunks);
            }
        }
        // A final payload may arrive without a trailing newline.
        if let Some(payload) = buffer.trim().strip_prefix("data:") {
            push_parsed_chunk(payload.trim(), &mut chunks);
        }

        Ok(self.ingest_chunks(chunks))
    }

    /// Applies one generation pass: forwards text deltas as events, collects
    /// function calls (emitting the score side-channel immediately), and
    /// appends exactly one model turn to the history.
    fn ingest_chunks(&mut self, chunks: Vec<GenerateChunk>) -> Vec<ChatFunctionCall> {
        let mut full_text = String::new();
        let mut calls = Vec::new();

        for chunk in chunks {
            let parts = chunk
                .candidates
                .into_iter()
                .flatten()
                .next()
                .and_then(|c| c.content)
                .map(|c| c.parts)
                .unwrap_or_default();
            for part in parts {
                if let Some(text) = part.text {
                    if !text.is_empty() {
                        let _ = self.events.send(SessionEvent::Text(text.clone()));
                        full_text.push_str(&text);
                    }
                }
                if let Some(call) = part.function_call {
                    if call.name == SCORE_TOOL_NAME {
                        match call.args.as_ref().and_then(score_from_args) {
                            Some(score) => {
                                let _ = self.events.send(SessionEvent::Score(score));
                            }
                            None => warn!(args = ?call.args, "score argument missing or not numeric"),
                        }
                    }
                    calls.push(call);
                }
            }
        }

        let mut parts = Vec::new();
        if !full_text.is_empty() {
            parts.push(ChatPart {
                text: Some(full_text),
                ..Default::default()
            });
        }
        for call in &calls {
            parts.push(ChatPart {
                function_call: Some(call.clone()),
                ..Default::default()
            });
        }
        if !parts.is_empty() {
            self.history.push(ChatContent {
                role: "model".to_string(),
                parts,
            });
        }
        calls
    }

    /// Records an ok response for every call so the follow-up generation can
    /// see its tool results.
    fn push_tool_responses(&mut self, calls: &[ChatFunctionCall]) {
        for call in calls {
            self.history.push(ChatContent {
                role: "function".to_string(),
                parts: vec![ChatPart {
                    function_response: Some(ChatFunctionResponse {
                        name: call.name.clone(),
                        response: serde_json::json!({ "result": "ok" }),
                    }),
                    ..Default::default()
                }],
            });
        }
    }

    fn push_user_turn(&mut self, text: &str) {
        self.history.push(ChatContent {
            role: "user".to_string(),
            parts: vec![ChatPart {
                text: Some(text.to_string()),
                ..Default::default()
            }],
        });
    }
}

#[async_trait]
impl SessionAdapter for GeminiChatAdapter {
    async fn connect(&mut self, config: SessionConfig) -> SessionResult<()> {
        self.history.clear();
        self.config = config;
        self.state = ConnectionState::Connected;
        info!("chat session ready");
        Ok(())
    }

    async fn send_text(&mut self, text: &str) -> SessionResult<()> {
        if !self.state.is_connected() {
            debug!("ignoring send_text while not connected");
            return Ok(());
        }
        self.push_user_turn(text);
        self.generate().await
    }

    async fn send_context_update(&mut self, label: &str, content: &str) -> SessionResult<()> {
        // Context updates double as the question prompt in chat mode, so
        // they trigger a response like any user turn.
        self.send_text(&format!("SYSTEM UPDATE from {label}:\n{content}"))
            .await
    }

    async fn disconnect(&mut self) {
        self.history.clear();
        self.state = ConnectionState::Closed("disconnected".to_string());
    }

    async fn resume_audio(&mut self) -> SessionResult<()> {
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state.clone()
    }
}

/// Pulls complete `data:` payload lines out of an SSE buffer, leaving any
/// partial trailing line in place.
fn drain_sse_data(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(newline) = buffer.find('\n') {
        let line: String = buffer.drain(..=newline).collect();
        let line = line.trim_end();
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() {
                payloads.push(data.to_string());
            }
        }
    }
    payloads
}

fn push_parsed_chunk(payload: &str, chunks: &mut Vec<GenerateChunk>) {
    match serde_json::from_str::<GenerateChunk>(payload) {
        Ok(chunk) => chunks.push(chunk),
        Err(err) => warn!(%err, "dropping unparseable generation chunk"),
    }
}
