//! Gapless playback of synthesized speech.
//!
//! Frames arrive from the network faster than real time. Each is scheduled
//! on a cursor measured in device samples: a frame starts at
//! `max(device_clock, next_start)` and the cursor then advances by exactly
//! the frame's length, so consecutive frames neither overlap nor leave a
//! gap. The first frame after idle starts a small lead-in into the future to
//! absorb scheduling jitter.

use crate::error::AudioError;
use crate::{pcm, PLAYBACK_SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lead-in before the first frame of a burst (100 ms at the playback rate).
const LEAD_IN_SAMPLES: u64 = (PLAYBACK_SAMPLE_RATE / 10) as u64;

/// Scheduling arithmetic in device samples ("ticks").
///
/// Invariant: `next_start >= clock` whenever frames are pending, and each
/// scheduled start equals `max(clock, next_start)`.
#[derive(Debug)]
pub struct PlaybackCursor {
    next_start: u64,
    lead_in: u64,
    playing: bool,
}

impl PlaybackCursor {
    pub fn new(lead_in: u64) -> Self {
        Self {
            next_start: 0,
            lead_in,
            playing: false,
        }
    }

    /// Schedules a frame of `len` samples against the device clock `now` and
    /// returns its start tick.
    pub fn schedule(&mut self, now: u64, len: u64) -> u64 {
        let start = if self.playing {
            self.next_start.max(now)
        } else {
            self.playing = true;
            now + self.lead_in
        };
        self.next_start = start + len;
        start
    }

    /// Reports the clock having advanced to `now` with an empty queue;
    /// returns `true` exactly once per burst, when playback drains to idle.
    pub fn drained(&mut self, now: u64) -> bool {
        if self.playing && now >= self.next_start {
            self.playing = false;
            true
        } else {
            false
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn next_start(&self) -> u64 {
        self.next_start
    }

    /// Forgets all scheduled time. Used when the pending queue is dropped.
    pub fn reset(&mut self) {
        self.playing = false;
        self.next_start = 0;
    }
}

struct ScheduledFrame {
    start: u64,
    samples: Vec<f32>,
}

struct PlaybackShared {
    queue: VecDeque<ScheduledFrame>,
    cursor: PlaybackCursor,
    /// Total samples the device has consumed; this *is* the device clock.
    clock: u64,
}

/// Fills one device buffer from the scheduled queue, advancing the clock.
/// Ticks before a frame's start (and after underrun) emit silence.
fn fill_output(shared: &Mutex<PlaybackShared>, speaking: &watch::Sender<bool>, out: &mut [f32]) {
    let mut state = match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let base = state.clock;
    for (i, slot) in out.iter_mut().enumerate() {
        let tick = base + i as u64;
        *slot = 0.0;
        loop {
            let Some(front) = state.queue.front() else {
                break;
            };
            if tick < front.start {
                break;
            }
            let offset = (tick - front.start) as usize;
            if offset >= front.samples.len() {
                state.queue.pop_front();
                continue;
            }
            *slot = front.samples[offset];
            break;
        }
    }
    let now = base + out.len() as u64;
    state.clock = now;
    if state.queue.is_empty() && state.cursor.drained(now) {
        let _ = speaking.send(false);
    }
}

/// Schedules decoded samples onto the cursor and queue, publishing the
/// idle→speaking transition.
fn submit_frame(shared: &Mutex<PlaybackShared>, speaking: &watch::Sender<bool>, samples: Vec<f32>) {
    if samples.is_empty() {
        return;
    }
    let was_playing;
    {
        let mut state = match shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        was_playing = state.cursor.is_playing();
        let now = state.clock;
        let start = state.cursor.schedule(now, samples.len() as u64);
        state.queue.push_back(ScheduledFrame { start, samples });
    }
    if !was_playing {
        let _ = speaking.send(true);
    }
}

/// Drops every pending frame and returns the cursor to idle.
fn clear_pending(shared: &Mutex<PlaybackShared>, speaking: &watch::Sender<bool>) {
    let was_playing;
    {
        let mut state = match shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.queue.clear();
        was_playing = state.cursor.is_playing();
        state.cursor.reset();
    }
    if was_playing {
        let _ = speaking.send(false);
    }
}

enum DeviceCommand {
    Resume,
    Close,
}

/// Owns the output device and the pending-frame queue for one session.
///
/// The queue is deliberately unbounded: synthesized speech is never dropped,
/// only cleared wholesale by [`PlaybackScheduler::clear_queue`].
pub struct PlaybackScheduler {
    shared: Arc<Mutex<PlaybackShared>>,
    speaking_tx: Arc<watch::Sender<bool>>,
    control_tx: Option<std_mpsc::Sender<DeviceCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackScheduler {
    /// Opens the default output device at 24 kHz mono.
    pub fn open() -> Result<Self, AudioError> {
        let shared = Arc::new(Mutex::new(PlaybackShared {
            queue: VecDeque::new(),
            cursor: PlaybackCursor::new(LEAD_IN_SAMPLES),
            clock: 0,
        }));
        let (speaking_tx, _speaking_rx) = watch::channel(false);
        let speaking_tx = Arc::new(speaking_tx);

        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (control_tx, control_rx) = std_mpsc::channel();

        let thread_shared = Arc::clone(&shared);
        let thread_speaking = Arc::clone(&speaking_tx);
        let thread = std::thread::Builder::new()
            .name("viva-playback".to_string())
            .spawn(move || run_device_thread(thread_shared, thread_speaking, ready_tx, control_rx))
            .map_err(|e| AudioError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                speaking_tx,
                control_tx: Some(control_tx),
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::Device(
                    "playback thread exited before the stream was ready".to_string(),
                ))
            }
        }
    }

    /// Observes speaking/idle transitions. The initial value is `false`.
    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.speaking_tx.subscribe()
    }

    /// Queues one decoded PCM16 frame for seamless playback.
    pub fn submit(&self, samples: &[i16]) {
        self.submit_samples(pcm::i16_to_f32(samples));
    }

    /// Decodes a base64 PCM16 payload and queues it. Undecodable payloads
    /// are dropped with a log line; the session stays healthy.
    pub fn submit_encoded(&self, data: &str) {
        let samples = pcm::decode_f32(data);
        if samples.is_empty() {
            debug!("ignoring empty or undecodable playback payload");
            return;
        }
        self.submit_samples(samples);
    }

    fn submit_samples(&self, samples: Vec<f32>) {
        submit_frame(&self.shared, &self.speaking_tx, samples);
    }

    /// Restarts a suspended device. The queue and cursor are untouched.
    pub fn resume(&self) {
        if let Some(tx) = &self.control_tx {
            let _ = tx.send(DeviceCommand::Resume);
        }
    }

    /// Drops all pending frames and resets to idle without closing the
    /// device. Used when the session interrupts the AI mid-utterance.
    pub fn clear_queue(&self) {
        clear_pending(&self.shared, &self.speaking_tx);
    }

    /// Releases the output device. Callable any number of times.
    pub fn close(&mut self) {
        if let Some(tx) = self.control_tx.take() {
            let _ = tx.send(DeviceCommand::Close);
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_device_thread(
    shared: Arc<Mutex<PlaybackShared>>,
    speaking: Arc<watch::Sender<bool>>,
    ready_tx: std_mpsc::Sender<Result<(), AudioError>>,
    control_rx: std_mpsc::Receiver<DeviceCommand>,
) {
    let stream = match build_output_stream(shared, speaking) {
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

    while let Ok(command) = control_rx.recv() {
        match command {
            DeviceCommand::Resume => {
                if let Err(err) = stream.play() {
                    warn!(%err, "failed to resume playback stream");
                }
            }
            DeviceCommand::Close => break,
        }
    }
    drop(stream);
    debug!("playback device released");
}

fn build_output_stream(
    shared: Arc<Mutex<PlaybackShared>>,
    speaking: Arc<watch::Sender<bool>>,
) -> Result<cpal::Stream, AudioError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::Device("no output device available".to_string()))?;
    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        rate = PLAYBACK_SAMPLE_RATE,
        "opening playback device"
    );

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(PLAYBACK_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            fill_output(&shared, &speaking, data);
        },
        |err| warn!(%err, "playback stream error"),
        None,
    )?;
    Ok(stream)
}
