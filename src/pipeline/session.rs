//! Stream session: one source, one decode thread, one frame channel
//!
//! ```text
//! ┌──────────────┐  Video   ┌──────────────┐  try_pop  ┌─────────────┐
//! │ decode thread│─────────►│ FrameChannel │──────────►│ render loop │
//! │ (StreamSource)          └──────────────┘           └─────────────┘
//! │              │  Audio   ┌──────────────┐                 ▲
//! │              │─────────►│  AudioSink   │                 │ clock()
//! │              │──────────────────────────► AudioClock ─────┘
//! └──────────────┘
//! ```
//!
//! Shutdown order matters: the running flag is cleared and the channel is
//! stopped first (so a producer parked on a full channel wakes up), then the
//! decode thread is joined, and only then is the source closed.

use crate::config::SessionConfig;
use crate::decoder::input::SourceKind;
use crate::decoder::{self, AudioFormat, AudioSink, DecodedVideoFrame, StreamSource, Unit};
use crate::error::{DecodeError, OpenError, SinkRejected};
use crate::pipeline::clock::AudioClock;
use crate::pipeline::frame_channel::FrameChannel;
use crate::pipeline::health::SessionHealth;
use crate::pipeline::state::SessionState;
use crate::utils::sos::StopSignal;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Owns a [`StreamSource`] and the background thread that drives it.
///
/// A session is single-use: once it reaches `Ended`, `Failed` or `Closed` it
/// must be discarded and a new one built.
pub struct StreamSession {
    /// Present while no decode thread owns it (before open, after join).
    source: Option<Box<dyn StreamSource>>,
    worker: Option<JoinHandle<Box<dyn StreamSource>>>,
    frames: Arc<FrameChannel<DecodedVideoFrame>>,
    clock: AudioClock,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    health: Arc<SessionHealth>,
    stop: StopSignal,
    audio_sink: Option<Arc<dyn AudioSink>>,
    /// Strategy picked by [`for_url`](Self::for_url); `open` must agree with it.
    kind: Option<SourceKind>,
    config: SessionConfig,
}

impl StreamSession {
    /// Build a session for `url`, choosing the decode strategy from it.
    pub fn for_url(url: &str, config: SessionConfig) -> Self {
        let stop = StopSignal::new();
        let source = decoder::source_for_url(url, &config, stop.clone());
        let mut session = Self::with_source(source, stop, config);
        session.kind = Some(SourceKind::detect(url));
        session
    }

    /// Build a session around an explicit source. `stop` is cancelled on close
    /// and should be the one the source uses to interrupt blocking waits.
    pub fn with_source(source: Box<dyn StreamSource>, stop: StopSignal, config: SessionConfig) -> Self {
        let clock = source.audio_clock();
        Self {
            source: Some(source),
            worker: None,
            frames: Arc::new(FrameChannel::new(config.frame_capacity)),
            clock,
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            health: Arc::new(SessionHealth::new()),
            stop,
            audio_sink: None,
            kind: None,
            config,
        }
    }

    /// Register where decoded audio goes. Must be called before [`open`](Self::open).
    pub fn set_audio_sink(&mut self, sink: Arc<dyn AudioSink>) {
        self.audio_sink = Some(sink);
    }

    /// Open the source and start the decode thread.
    ///
    /// Returns as soon as the thread is started; it does not wait for a frame.
    /// A session built with [`for_url`](Self::for_url) refuses a URL needing
    /// another strategy, and stays idle.
    pub fn open(&mut self, url: &str) -> Result<(), OpenError> {
        if self.state() != SessionState::Idle {
            return Err(OpenError::SessionTerminal);
        }
        if let Some(kind) = self.kind {
            let detected = SourceKind::detect(url);
            if detected != kind {
                return Err(OpenError::InvalidUrl {
                    url: url.to_string(),
                    reason: format!("session was built for a {:?} source, not {:?}", kind, detected),
                });
            }
        }
        let mut source = self.source.take().ok_or(OpenError::SessionTerminal)?;

        if let Some(sink) = &self.audio_sink {
            source.set_audio_sink(Arc::new(MeteredSink {
                inner: Arc::clone(sink),
                health: Arc::clone(&self.health),
            }));
        }

        if let Err(e) = source.open(url) {
            error!("StreamSession: failed to open {}: {}", url, e);
            source.close();
            self.source = Some(source);
            transition(&self.state, SessionState::Failed);
            return Err(e);
        }
        source.set_audio_enabled(self.config.audio_enabled);

        self.running.store(true, Ordering::Release);
        transition(
            &self.state,
            SessionState::Running {
                started_at: Instant::now(),
            },
        );

        let frames = Arc::clone(&self.frames);
        let running = Arc::clone(&self.running);
        let state = Arc::clone(&self.state);
        let health = Arc::clone(&self.health);

        let spawned = thread::Builder::new()
            .name("livecast-decode".into())
            .spawn(move || decode_loop(source, frames, running, state, health));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!("StreamSession: opened {}", url);
                Ok(())
            }
            Err(e) => {
                // the source went down with the closure and was dropped there
                self.running.store(false, Ordering::Release);
                transition(&self.state, SessionState::Failed);
                Err(OpenError::Thread(e))
            }
        }
    }

    /// Next decoded frame, if one is ready. Never blocks.
    pub fn next_video_frame(&self) -> Option<DecodedVideoFrame> {
        self.frames.try_pop()
    }

    /// Next decoded frame, blocking until one is ready.
    ///
    /// Returns `None` once the session has stopped producing and the channel
    /// is drained.
    pub fn wait_video_frame(&self) -> Option<DecodedVideoFrame> {
        self.frames.pop()
    }

    /// Presentation time of the last decoded audio, in seconds.
    pub fn clock(&self) -> f64 {
        self.clock.get()
    }

    /// The shared clock handle itself.
    pub fn audio_clock(&self) -> &AudioClock {
        &self.clock
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once no frame will ever be returned again.
    pub fn has_ended(&self) -> bool {
        self.state().is_terminal() && self.frames.is_empty()
    }

    pub fn health(&self) -> Arc<SessionHealth> {
        Arc::clone(&self.health)
    }

    /// Frames currently buffered between decode and render.
    pub fn buffered_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Stop decoding and release everything. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state() == SessionState::Closed {
            return;
        }

        self.running.store(false, Ordering::Release);
        self.stop.cancel();
        self.frames.stop();

        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(source) => self.source = Some(source),
                Err(_) => error!("StreamSession: decode thread panicked"),
            }
        }

        if let Some(source) = self.source.as_mut() {
            source.close();
        }

        transition(&self.state, SessionState::Closed);
        info!("StreamSession: closed ({})", self.health.summary());
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("state", &self.state())
            .field("clock", &self.clock.get())
            .field("frames", &self.frames)
            .finish()
    }
}

fn transition(state: &Mutex<SessionState>, target: SessionState) -> bool {
    let mut current = state.lock().unwrap_or_else(PoisonError::into_inner);
    if current.can_transition_to(&target) {
        debug!("StreamSession: {} -> {}", *current, target);
        *current = target;
        true
    } else {
        debug!("StreamSession: ignoring {} -> {}", *current, target);
        false
    }
}

/// Background thread body. Hands the source back so the owner can close it
/// after the join.
fn decode_loop(
    mut source: Box<dyn StreamSource>,
    frames: Arc<FrameChannel<DecodedVideoFrame>>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    health: Arc<SessionHealth>,
) -> Box<dyn StreamSource> {
    info!("StreamSession: {} decode loop started", source.name());

    while running.load(Ordering::Acquire) {
        match source.next_unit() {
            Unit::Video(frame) => {
                health.record_video_frame(frame.data.len());
                if frames.push(frame).is_err() {
                    debug!("StreamSession: frame channel stopped");
                    break;
                }
            }
            Unit::Audio => health.record_audio_packet(),
            Unit::Error(e) if e.is_fatal() => {
                error!("StreamSession: {}", e);
                running.store(false, Ordering::Release);
                transition(&state, SessionState::Failed);
                frames.stop();
                frames.clear();
                break;
            }
            Unit::Error(e) => {
                match e {
                    DecodeError::Resample(_) => health.record_resample_failure(),
                    _ => health.record_decode_failure(),
                }
                warn!("StreamSession: skipping packet: {}", e);
            }
            Unit::End => {
                info!("StreamSession: end of stream");
                running.store(false, Ordering::Release);
                transition(&state, SessionState::Ended);
                frames.stop();
                break;
            }
        }
    }

    info!(
        "StreamSession: {} decode loop finished ({})",
        source.name(),
        health.summary()
    );
    source
}

/// Counts what goes through the caller's sink.
struct MeteredSink {
    inner: Arc<dyn AudioSink>,
    health: Arc<SessionHealth>,
}

impl AudioSink for MeteredSink {
    fn queue(&self, pcm: &[u8]) -> Result<(), SinkRejected> {
        let result = self.inner.queue(pcm);
        match &result {
            Ok(()) => self.health.record_audio_bytes(pcm.len()),
            Err(_) => self.health.record_sink_rejection(),
        }
        result
    }

    fn queued_bytes(&self) -> usize {
        self.inner.queued_bytes()
    }

    fn format(&self) -> AudioFormat {
        self.inner.format()
    }
}
