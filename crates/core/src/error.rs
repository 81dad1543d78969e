//! Error taxonomy for session and device failures.

use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

/// Failures surfaced by a session adapter.
///
/// Device and transport errors are fatal to the current connection and never
/// retried automatically; protocol errors only cost the offending message.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Microphone or output device unavailable, or permission denied.
    #[error("audio device error: {0}")]
    Device(String),

    /// Connect, send, or receive failure on the upstream transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed inbound message. The message is dropped; the connection
    /// stays up.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Tool call arguments missing or unusable.
    #[error("tool argument error: {0}")]
    ToolArg(String),

    /// Operation attempted against a torn-down connection.
    #[error("session closed: {0}")]
    Closed(String),
}
