//! Microphone capture and gapless playback for live voice sessions.
//!
//! Capture runs at 16 kHz mono and emits fixed-size base64 PCM16 frames;
//! playback accepts PCM16 at the model's 24 kHz output rate and schedules
//! frames back to back with no gap and no overlap.

pub mod capture;
pub mod error;
pub mod pcm;
pub mod playback;

pub use capture::{CaptureChain, CapturedFrame};
pub use error::AudioError;
pub use playback::PlaybackScheduler;

/// Microphone rate expected by the upstream realtime input channel.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Rate of the synthesized speech the model sends back.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Samples per emitted capture frame (~256 ms at 16 kHz).
pub const CAPTURE_FRAME_SAMPLES: usize = 4_096;
