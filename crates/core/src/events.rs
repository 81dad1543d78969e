//! Caller-facing session events.

use tokio::sync::mpsc;

/// Events emitted by an adapter toward the session owner.
///
/// Text arrives as deltas, not whole sentences; callers that want sentence
/// granularity feed these through a [`crate::TranscriptAccumulator`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Incremental AI text (speech transcription or plain text parts).
    Text(String),
    /// Incremental transcript of the user's own speech.
    UserText(String),
    /// A 0..=10 score reported through the scoring tool.
    Score(u8),
    /// A fatal upstream error; the caller decides whether to reconnect.
    Error(String),
    /// Playback started (`true`) or drained back to idle (`false`).
    SpeakingChanged(bool),
}

/// Sending half handed to adapters; the receiver stays with the orchestrator.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
