//! Thin orchestration around one adapter instance.
//!
//! Owns the event stream and the two transcript accumulators, applies the
//! keep-the-conversation-flowing policy after a score, and enforces that an
//! old adapter has released the audio devices before a new one exists.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use viva_core::{
    SessionAdapter, SessionConfig, SessionEvent, SessionMode, SessionResult, TranscriptAccumulator,
};

pub struct SessionHost {
    api_key: String,
    mode: SessionMode,
    adapter: Box<dyn SessionAdapter>,
    event_tx: viva_core::EventSender,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    ai_transcript: TranscriptAccumulator,
    user_transcript: TranscriptAccumulator,
}

impl SessionHost {
    pub fn new(mode: SessionMode, api_key: String) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let adapter = gemini_live::build_adapter(mode, api_key.clone(), event_tx.clone());
        Self::from_parts(mode, api_key, adapter, event_tx, events)
    }

    fn from_parts(
        mode: SessionMode,
        api_key: String,
        adapter: Box<dyn SessionAdapter>,
        event_tx: viva_core::EventSender,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        Self {
            api_key,
            mode,
            adapter,
            event_tx,
            events,
            ai_transcript: TranscriptAccumulator::new(),
            user_transcript: TranscriptAccumulator::new(),
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub async fn connect(&mut self, config: SessionConfig) -> SessionResult<()> {
        self.ai_transcript.reset();
        self.user_transcript.reset();
        self.adapter.connect(config).await
    }

    /// Applies new session parameters by rebuilding the session.
    ///
    /// The old adapter must have released the audio devices before the
    /// replacement claims them, so its teardown is awaited first.
    pub async fn restart(&mut self, mode: SessionMode, config: SessionConfig) -> SessionResult<()> {
        self.adapter.disconnect().await;
        self.mode = mode;
        self.adapter = gemini_live::build_adapter(mode, self.api_key.clone(), self.event_tx.clone());
        self.connect(config).await
    }

    pub async fn shutdown(&mut self) {
        self.adapter.disconnect().await;
    }

    /// Drives the session until Ctrl-C, stdin close, or a fatal error.
    /// Stdin lines are sent as user text turns.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal.");
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(text)) => {
                        let text = text.trim();
                        if !text.is_empty() {
                            self.adapter.send_text(text).await?;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => return Err(err.into()),
                },
                event = self.events.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event).await? {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        Ok(())
    }

    /// Applies one session event; returns `true` when the session should end.
    async fn handle_event(&mut self, event: SessionEvent) -> anyhow::Result<bool> {
        match event {
            SessionEvent::Text(delta) => {
                for sentence in self.ai_transcript.push(&delta) {
                    println!("ai: {sentence}");
                }
            }
            SessionEvent::UserText(delta) => {
                for sentence in self.user_transcript.push(&delta) {
                    println!("you: {sentence}");
                }
            }
            SessionEvent::Score(score) => {
                println!("score: {score}/10");
                // Keep the conversation flowing; the nudge stays out of the
                // visible transcript.
                self.adapter.send_text("continue").await?;
            }
            SessionEvent::Error(message) => {
                error!(%message, "session error");
                return Ok(true);
            }
            SessionEvent::SpeakingChanged(speaking) => {
                debug!(speaking, "playback state changed");
            }
        }
        Ok(false)
    }
}
