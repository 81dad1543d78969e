//! The capability contract implemented by both session variants.

use crate::config::SessionConfig;
use crate::error::SessionResult;
use async_trait::async_trait;

/// Lifecycle of one adapter connection.
///
/// Exactly one live connection exists per adapter instance; `connect` on an
/// adapter that already holds one tears the old connection down first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Closing,
    Closed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// One conversation endpoint, live or turn-based.
///
/// `send_*` operations are silent no-ops unless the adapter is `Connected`;
/// `connect` is the only way out of `Idle`, and `disconnect` is safe to call
/// from any state, any number of times.
#[async_trait]
pub trait SessionAdapter: Send {
    /// Opens the session. On the live variant this claims the microphone and
    /// output device; a device failure fails the whole attempt and releases
    /// the transport.
    async fn connect(&mut self, config: SessionConfig) -> SessionResult<()>;

    /// Sends a complete user text turn.
    async fn send_text(&mut self, text: &str) -> SessionResult<()>;

    /// Pushes fresh context (e.g. the content the user switched focus to)
    /// as a labelled user turn.
    async fn send_context_update(&mut self, label: &str, content: &str) -> SessionResult<()>;

    /// Tears the connection down and releases all devices. Idempotent.
    async fn disconnect(&mut self);

    /// Resumes a suspended output device. No-op for text-only variants.
    async fn resume_audio(&mut self) -> SessionResult<()>;

    fn state(&self) -> ConnectionState;
}
