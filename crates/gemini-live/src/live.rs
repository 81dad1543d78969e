//! The live voice variant: one duplex WebSocket session with audio both ways.
//!
//! Capture frames flow mic → channel → socket; synthesized audio flows
//! socket → playback scheduler. The connection task owns both device chains
//! and the socket, so tearing the task down releases everything.

use crate::wire::{self, ClientMessage};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use viva_audio::{CaptureChain, CapturedFrame, PlaybackScheduler};
use viva_core::score::{score_from_args, score_from_code, SCORE_TOOL_NAME};
use viva_core::{
    ConnectionState, EventSender, SessionAdapter, SessionConfig, SessionError, SessionEvent,
    SessionResult,
};

const LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";
const MODEL: &str = "models/gemini-2.0-flash-exp";

/// Frames buffered between the capture thread and the send loop. Overflow
/// drops microphone frames rather than growing without bound.
const CAPTURE_CHANNEL_FRAMES: usize = 64;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

enum Command {
    Text(String),
    ResumeAudio,
    Shutdown,
}

/// StreamingVariant of the session capability.
pub struct GeminiLiveAdapter {
    api_key: String,
    events: EventSender,
    state: Arc<Mutex<ConnectionState>>,
    command_tx: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl GeminiLiveAdapter {
    pub fn new(api_key: String, events: EventSender) -> Self {
        Self {
            api_key,
            events,
            state: Arc::new(Mutex::new(ConnectionState::Idle)),
            command_tx: None,
            task: None,
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = next;
    }
}

#[async_trait]
impl SessionAdapter for GeminiLiveAdapter {
    async fn connect(&mut self, config: SessionConfig) -> SessionResult<()> {
        // One live connection per adapter: tear the previous one down first.
        if self.task.is_some() {
            self.disconnect().await;
        }
        self.set_state(ConnectionState::Connecting);

        let url = format!("{LIVE_URL}?key={}", self.api_key);
        let (mut ws, _) = match connect_async(url).await {
            Ok(connected) => connected,
            Err(err) => {
                self.set_state(ConnectionState::Closed("connect failed".to_string()));
                return Err(SessionError::Transport(err.to_string()));
            }
        };
        info!("live session socket connected");

        let setup = build_setup(&config);
        let payload = match serde_json::to_string(&setup) {
            Ok(payload) => payload,
            Err(err) => {
                let _ = ws.close(None).await;
                self.set_state(ConnectionState::Closed("setup encode failed".to_string()));
                return Err(SessionError::Protocol(err.to_string()));
            }
        };
        if let Err(err) = ws.send(WsMessage::Text(payload.into())).await {
            self.set_state(ConnectionState::Closed("setup send failed".to_string()));
            return Err(SessionError::Transport(err.to_string()));
        }
        debug!(
            voice = %config.voice,
            temperature = config.temperature,
            top_p = config.top_p,
            score_tracking = config.score_tracking,
            "setup sent"
        );

        let playback = match PlaybackScheduler::open() {
            Ok(playback) => playback,
            Err(err) => {
                let _ = ws.close(None).await;
                self.set_state(ConnectionState::Closed("output device unavailable".to_string()));
                return Err(err.into());
            }
        };

        let (frame_tx, frame_rx) = mpsc::channel(CAPTURE_CHANNEL_FRAMES);
        let capture = match CaptureChain::start(frame_tx) {
            Ok(capture) => capture,
            Err(err) => {
                // Capture failure fails the whole attempt; the playback
                // scheduler drops here and releases the output device.
                let _ = ws.close(None).await;
                self.set_state(ConnectionState::Closed("microphone unavailable".to_string()));
                return Err(err.into());
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.set_state(ConnectionState::Connected);

        let events = self.events.clone();
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            let reason = match run_connection(ws, frame_rx, command_rx, capture, playback, &events).await
            {
                Ok(reason) => reason,
                Err(err) => {
                    error!(error = ?err, "live session task failed");
                    let _ = events.send(SessionEvent::Error(format!("live session failed: {err}")));
                    err.to_string()
                }
            };
            let mut guard = match state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = ConnectionState::Closed(reason);
        });

        self.command_tx = Some(command_tx);
        self.task = Some(task);
        Ok(())
    }

    async fn send_text(&mut self, text: &str) -> SessionResult<()> {
        if !self.state().is_connected() {
            debug!("ignoring send_text while not connected");
            return Ok(());
        }
        if let Some(tx) = &self.command_tx {
            let _ = tx.send(Command::Text(text.to_string()));
        }
        Ok(())
    }

    async fn send_context_update(&mut self, label: &str, content: &str) -> SessionResult<()> {
        if !self.state().is_connected() {
            debug!("ignoring context update while not connected");
            return Ok(());
        }
        debug!(%label, "sending context update");
        if let Some(tx) = &self.command_tx {
            let _ = tx.send(Command::Text(format!("SYSTEM UPDATE: \n{content}")));
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.command_tx.is_none() && self.task.is_none() {
            return;
        }
        self.set_state(ConnectionState::Closing);
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(Command::Shutdown);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.set_state(ConnectionState::Closed("disconnected".to_string()));
    }

    async fn resume_audio(&mut self) -> SessionResult<()> {
        if let Some(tx) = &self.command_tx {
            let _ = tx.send(Command::ResumeAudio);
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        match self.state.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn build_setup(config: &SessionConfig) -> ClientMessage {
    let tools = config
        .score_tracking
        .then(|| vec![wire::score_tool_declaration()]);
    let instruction = config.effective_instruction();
    let system_instruction = (!instruction.is_empty()).then(|| wire::Content {
        role: None,
        parts: vec![wire::Part { text: instruction }],
    });
    ClientMessage::Setup(wire::Setup {
        model: MODEL.to_string(),
        generation_config: wire::GenerationConfig {
            response_modalities: vec![wire::ResponseModality::Audio],
            speech_config: wire::SpeechConfig {
                voice_config: wire::VoiceConfig {
                    prebuilt_voice_config: wire::PrebuiltVoiceConfig {
                        voice_name: config.voice.clone(),
                    },
                },
            },
            temperature: config.temperature,
            top_p: config.top_p,
        },
        output_audio_transcription: wire::AudioTranscriptionConfig::default(),
        tools,
        system_instruction,
    })
}

/// The duplex event loop. Returns the close reason; transport failures
/// propagate as errors and the devices are released either way.
async fn run_connection(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut frame_rx: mpsc::Receiver<CapturedFrame>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    mut capture: CaptureChain,
    mut playback: PlaybackScheduler,
    events: &EventSender,
) -> Result<String> {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let speaking_flag = playback.subscribe_speaking();
    let mut speaking_events = playback.subscribe_speaking();
    let mut speaking_open = true;

    let reason = loop {
        tokio::select! {
            biased;
            command = command_rx.recv() => match command {
                Some(Command::Text(text)) => {
                    let msg = wire::user_text_message(text);
                    ws_tx.send(WsMessage::Text(serde_json::to_string(&msg)?.into())).await?;
                }
                Some(Command::ResumeAudio) => playback.resume(),
                Some(Command::Shutdown) | None => break "disconnected".to_string(),
            },
            Some(frame) = frame_rx.recv() => {
                if let Some(msg) = gate_frame(&speaking_flag, frame) {
                    ws_tx.send(WsMessage::Text(serde_json::to_string(&msg)?.into())).await?;
                }
            },
            changed = speaking_events.changed(), if speaking_open => match changed {
                Ok(()) => {
                    let speaking = *speaking_events.borrow_and_update();
                    let _ = events.send(SessionEvent::SpeakingChanged(speaking));
                }
                Err(_) => speaking_open = false,
            },
            message = ws_rx.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    let actions = process_server_message(&text, events);
                    apply_server_actions(actions, &mut ws_tx, &playback).await?;
                }
                Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        let actions = process_server_message(text, events);
                        apply_server_actions(actions, &mut ws_tx, &playback).await?;
                    }
                    Err(_) => warn!("dropping non-UTF-8 binary message"),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    warn!(?frame, "server closed the session socket");
                    break "closed by server".to_string();
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = events.send(SessionEvent::Error(format!("socket receive failed: {err}")));
                    break format!("receive error: {err}");
                }
                None => break "socket exhausted".to_string(),
            },
        }
    };

    capture.stop();
    playback.close();
    let _ = ws_tx.close().await;
    info!(%reason, "live session ended");
    Ok(reason)
}

/// Applies the half-duplex policy: a captured frame becomes a realtime-input
/// message only while the AI is not speaking, so the model never hears its
/// own voice.
fn gate_frame(speaking: &watch::Receiver<bool>, frame: CapturedFrame) -> Option<ClientMessage> {
    if *speaking.borrow() {
        return None;
    }
    if frame.seq % 50 == 0 {
        debug!(seq = frame.seq, "forwarding captured audio");
    }
    Some(wire::realtime_audio_message(frame.data))
}

/// Side effects a server message asks for, separated from the socket so the
/// dispatch logic stays testable.
#[derive(Debug, Default)]
struct ServerActions {
    /// Base64 PCM16 payloads bound for the playback scheduler.
    audio_chunks: Vec<String>,
    /// `(name, id)` pairs to acknowledge with an ok tool response.
    tool_responses: Vec<(String, String)>,
}

/// Decodes and dispatches one inbound message. A malformed message is logged
/// and dropped; the connection is never torn down for one bad frame.
fn process_server_message(text: &str, events: &EventSender) -> ServerActions {
    let mut actions = ServerActions::default();
    let message: wire::ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(%err, "dropping unparseable server message");
            return actions;
        }
    };

    if message.setup_complete.is_some() {
        info!("session setup complete");
        return actions;
    }
    if let Some(error) = message.error {
        let detail = error
            .message
            .unwrap_or_else(|| "unknown upstream error".to_string());
        error!(%detail, "server reported an error");
        let _ = events.send(SessionEvent::Error(detail));
        return actions;
    }
    let Some(content) = message.server_content else {
        debug!("server message without content");
        return actions;
    };

    if let Some(text) = content
        .output_transcription
        .as_ref()
        .and_then(|t| t.text.clone())
    {
        let _ = events.send(SessionEvent::Text(text));
    }
    if let Some(text) = content.user_transcript() {
        let _ = events.send(SessionEvent::UserText(text));
    }

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(blob) = part.inline_data {
                if blob.mime_type.starts_with("audio/pcm") {
                    actions.audio_chunks.push(blob.data);
                }
            } else if let Some(text) = part.text {
                let _ = events.send(SessionEvent::Text(text));
            } else if let Some(call) = part.function_call {
                if call.name == SCORE_TOOL_NAME {
                    match call.args.as_ref().and_then(score_from_args) {
                        Some(score) => {
                            let _ = events.send(SessionEvent::Score(score));
                        }
                        None => warn!(args = ?call.args, "score argument missing or not numeric"),
                    }
                }
                // Acknowledge regardless so the model's turn can continue.
                let id = call.id.unwrap_or_else(|| "no-id".to_string());
                actions.tool_responses.push((call.name, id));
            } else if let Some(code) = part.executable_code.and_then(|c| c.code) {
                // No call id on this path, so nothing to acknowledge.
                if let Some(score) = score_from_code(&code) {
                    let _ = events.send(SessionEvent::Score(score));
                }
            }
        }
    }
    if content.turn_complete == Some(true) {
        debug!("model turn complete");
    }
    actions
}

async fn apply_server_actions(
    actions: ServerActions,
    ws_tx: &mut WsSink,
    playback: &PlaybackScheduler,
) -> Result<()> {
    for chunk in actions.audio_chunks {
        playback.submit_encoded(&chunk);
    }
    for (name, id) in actions.tool_responses {
        let msg = wire::tool_ok_response(name, id);
        ws_tx
            .send(WsMessage::Text(serde_json::to_string(&msg)?.into()))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;
    use viva_core::SessionEvent;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn structured_score_call_fires_once_and_is_acknowledged() {
        let (tx, mut rx) = unbounded_channel();
        let raw = json!({
            "serverContent": { "modelTurn": { "parts": [
                { "functionCall": { "name": "report_score", "id": "c1", "args": { "score": 7 } } }
            ]}}
        })
        .to_string();
        let actions = process_server_message(&raw, &tx);
        assert_eq!(drain(&mut rx), vec![SessionEvent::Score(7)]);
        assert_eq!(actions.tool_responses, vec![("report_score".to_string(), "c1".to_string())]);
    }

    #[test]
    fn string_score_argument_is_accepted() {
        let (tx, mut rx) = unbounded_channel();
        let raw = json!({
            "serverContent": { "modelTurn": { "parts": [
                { "functionCall": { "name": "report_score", "id": "c2", "args": { "score": "7" } } }
            ]}}
        })
        .to_string();
        let actions = process_server_message(&raw, &tx);
        assert_eq!(drain(&mut rx), vec![SessionEvent::Score(7)]);
        assert_eq!(actions.tool_responses.len(), 1);
    }

    #[test]
    fn bad_score_argument_still_acknowledges_without_event() {
        let (tx, mut rx) = unbounded_channel();
        let raw = json!({
            "serverContent": { "modelTurn": { "parts": [
                { "functionCall": { "name": "report_score", "id": "c3", "args": { "score": "many" } } }
            ]}}
        })
        .to_string();
        let actions = process_server_message(&raw, &tx);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(actions.tool_responses.len(), 1);
    }

    #[test]
    fn executable_code_scores_without_a_tool_response() {
        let (tx, mut rx) = unbounded_channel();
        let raw = json!({
            "serverContent": { "modelTurn": { "parts": [
                { "executableCode": { "code": "default_api.report_score(score=7)\n" } }
            ]}}
        })
        .to_string();
        let actions = process_server_message(&raw, &tx);
        assert_eq!(drain(&mut rx), vec![SessionEvent::Score(7)]);
        assert!(actions.tool_responses.is_empty());
    }

    #[test]
    fn audio_parts_are_routed_to_playback() {
        let (tx, mut rx) = unbounded_channel();
        let raw = json!({
            "serverContent": { "modelTurn": { "parts": [
                { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } },
                { "inlineData": { "mimeType": "image/png", "data": "ignored" } }
            ]}}
        })
        .to_string();
        let actions = process_server_message(&raw, &tx);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(actions.audio_chunks, vec!["AAAA".to_string()]);
    }

    #[test]
    fn transcription_and_text_parts_become_text_events() {
        let (tx, mut rx) = unbounded_channel();
        let raw = json!({
            "serverContent": {
                "outputTranscription": { "text": "Hello " },
                "modelTurn": { "parts": [{ "text": "world." }] }
            }
        })
        .to_string();
        process_server_message(&raw, &tx);
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Text("Hello ".to_string()),
                SessionEvent::Text("world.".to_string())
            ]
        );
    }

    #[test]
    fn user_transcript_event_uses_fallback_fields() {
        let (tx, mut rx) = unbounded_channel();
        let raw = json!({
            "serverContent": { "speechRecognitionResults": { "transcript": "my answer" } }
        })
        .to_string();
        process_server_message(&raw, &tx);
        assert_eq!(drain(&mut rx), vec![SessionEvent::UserText("my answer".to_string())]);
    }

    #[test]
    fn error_envelope_surfaces_without_teardown_actions() {
        let (tx, mut rx) = unbounded_channel();
        let actions =
            process_server_message(&json!({ "error": { "message": "quota" } }).to_string(), &tx);
        assert_eq!(drain(&mut rx), vec![SessionEvent::Error("quota".to_string())]);
        assert!(actions.audio_chunks.is_empty());
        assert!(actions.tool_responses.is_empty());
    }

    #[test]
    fn malformed_message_is_dropped_silently() {
        let (tx, mut rx) = unbounded_channel();
        let actions = process_server_message("{not json", &tx);
        assert!(drain(&mut rx).is_empty());
        assert!(actions.audio_chunks.is_empty());
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_a_quiet_noop() {
        let (tx, _rx) = unbounded_channel();
        let mut adapter = GeminiLiveAdapter::new("test-key".to_string(), tx);
        adapter.disconnect().await;
        adapter.disconnect().await;
        assert_eq!(adapter.state(), ConnectionState::Idle);
    }

    #[test]
    fn frames_are_muted_while_the_ai_speaks() {
        let (speaking_tx, speaking_rx) = watch::channel(false);
        let frame = |seq| CapturedFrame {
            seq,
            sample_rate: 16_000,
            data: "AAAA".to_string(),
        };

        assert!(gate_frame(&speaking_rx, frame(1)).is_some());
        speaking_tx.send(true).unwrap();
        assert!(gate_frame(&speaking_rx, frame(2)).is_none());
        assert!(gate_frame(&speaking_rx, frame(3)).is_none());
        speaking_tx.send(false).unwrap();
        assert!(gate_frame(&speaking_rx, frame(4)).is_some());
    }
}
