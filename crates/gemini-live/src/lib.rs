//! Two session adapter variants behind one capability contract.
//!
//! [`GeminiLiveAdapter`] is the duplex low-latency voice session over the
//! live WebSocket API; [`GeminiChatAdapter`] is the turn-based text fallback
//! over the streaming HTTP API. Callers pick a variant once at session start
//! and depend only on [`viva_core::SessionAdapter`].

pub mod chat;
pub mod live;
pub mod wire;

pub use chat::GeminiChatAdapter;
pub use live::GeminiLiveAdapter;

use viva_core::{EventSender, SessionAdapter, SessionMode};

/// Builds the adapter for `mode`.
///
/// Exactly one adapter instance may own the audio devices at a time; a
/// previous instance must be disconnected before a new one connects.
pub fn build_adapter(mode: SessionMode, api_key: String, events: EventSender) -> Box<dyn SessionAdapter> {
    match mode {
        SessionMode::Live => Box::new(GeminiLiveAdapter::new(api_key, events)),
        SessionMode::Chat => Box::new(GeminiChatAdapter::new(api_key, events)),
    }
}
