//! Microphone capture: fixed-size PCM16 frames off a dedicated device thread.

use crate::error::AudioError;
use crate::{pcm, CAPTURE_FRAME_SAMPLES, CAPTURE_SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// One captured, encoded microphone frame.
///
/// The frame is an owned copy; the capture buffer it came from is cleared
/// immediately after the flush, so nothing is shared across threads.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Monotonically increasing per capture session.
    pub seq: u64,
    pub sample_rate: u32,
    /// Base64-encoded little-endian PCM16.
    pub data: String,
}

/// Owns the microphone for the lifetime of one session.
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread that
/// parks until `stop`. Echo cancellation, noise suppression, and gain
/// control stay with the platform input path; cpal exposes no switches for
/// them.
pub struct CaptureChain {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureChain {
    /// Opens the default input device at 16 kHz mono and starts streaming
    /// frames into `frame_tx`. Fails fast when the device is missing or the
    /// stream cannot be built; never retries on its own.
    pub fn start(frame_tx: mpsc::Sender<CapturedFrame>) -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("viva-capture".to_string())
            .spawn(move || run_device_thread(frame_tx, ready_tx, stop_rx))
            .map_err(|e| AudioError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::Device(
                    "capture thread exited before the stream was ready".to_string(),
                ))
            }
        }
    }

    /// Releases the device and joins the capture thread. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureChain {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_device_thread(
    frame_tx: mpsc::Sender<CapturedFrame>,
    ready_tx: std_mpsc::Sender<Result<(), AudioError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let stream = match build_input_stream(frame_tx) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready_tx.send(Err(err.into()));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Park until asked to stop; the stream must stay owned by this thread.
    let _ = stop_rx.recv();
    drop(stream);
    debug!("capture device released");
}

fn build_input_stream(frame_tx: mpsc::Sender<CapturedFrame>) -> Result<cpal::Stream, AudioError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| AudioError::Device("no input device available".to_string()))?;
    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        rate = CAPTURE_SAMPLE_RATE,
        "opening capture device"
    );

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(CAPTURE_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut pending: Vec<f32> = Vec::with_capacity(CAPTURE_FRAME_SAMPLES);
    let mut seq: u64 = 0;

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                pending.push(sample);
                if pending.len() >= CAPTURE_FRAME_SAMPLES {
                    let frame = CapturedFrame {
                        seq,
                        sample_rate: CAPTURE_SAMPLE_RATE,
                        data: pcm::encode_f32(&pending),
                    };
                    pending.clear();
                    seq += 1;
                    if seq % 50 == 0 {
                        debug!(seq, "capture frames emitted");
                    }
                    match frame_tx.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(seq, "capture channel full; dropping frame");
                        }
                        Err(TrySendError::Closed(_)) => {}
                    }
                }
            }
        },
        |err| warn!(%err, "capture stream error"),
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Device-dependent: only asserts the error shape when no microphone is
    // present (typical for CI), and otherwise that a started chain stops
    // cleanly twice.
    #[test]
    fn start_surfaces_device_errors_or_stops_cleanly() {
        let (tx, _rx) = mpsc::channel(4);
        match CaptureChain::start(tx) {
            Ok(mut chain) => {
                chain.stop();
                chain.stop();
            }
            Err(AudioError::Device(_)) | Err(AudioError::Stream(_)) => {}
        }
    }
}
