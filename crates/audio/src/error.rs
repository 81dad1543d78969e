//! Typed errors for the audio device layer.

use thiserror::Error;
use viva_core::SessionError;

/// Errors raised while opening or running an audio device.
#[derive(Error, Debug)]
pub enum AudioError {
    /// Device missing, busy, or permission denied. Fatal to session connect.
    #[error("audio device error: {0}")]
    Device(String),

    /// A stream that was opened successfully failed while running.
    #[error("audio stream error: {0}")]
    Stream(String),
}

impl From<cpal::DevicesError> for AudioError {
    fn from(err: cpal::DevicesError) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioError::Stream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AudioError::Stream(err.to_string())
    }
}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        SessionError::Device(err.to_string())
    }
}
