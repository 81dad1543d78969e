pub mod adapter;
pub mod config;
pub mod error;
pub mod events;
pub mod score;
pub mod transcript;

pub use adapter::{ConnectionState, SessionAdapter};
pub use config::{SessionConfig, SessionMode};
pub use error::{SessionError, SessionResult};
pub use events::{EventSender, SessionEvent};
pub use transcript::TranscriptAccumulator;
