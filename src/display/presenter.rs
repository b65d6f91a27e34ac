//! Render-loop side of a session
//!
//! One [`Presenter::step`] pops at most one frame, compares its timestamp to
//! the audible audio time, and either hands it to the rendering surface,
//! holds it back briefly first, or discards it.

use crate::decoder::{AudioSink, DecodedVideoFrame};
use crate::pipeline::session::StreamSession;
use crate::pipeline::sync::{SyncConfig, SyncController, SyncDecision, reference_clock};
use crate::utils::sos::StopSignal;
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll interval while no frame is ready.
const IDLE_POLL: Duration = Duration::from_millis(5);
/// Time without a decoded frame after which the feed counts as stalled.
const STALL_THRESHOLD: Duration = Duration::from_secs(2);

/// Rendering surface receiving frames that are due.
pub trait FrameSink {
    fn present(&mut self, frame: &DecodedVideoFrame) -> Result<()>;
}

/// Where frames and the audio clock come from.
pub trait FrameFeed {
    fn next_video_frame(&self) -> Option<DecodedVideoFrame>;
    fn clock(&self) -> f64;
    fn has_ended(&self) -> bool;

    /// No frame was produced for `threshold`.
    fn is_stalled(&self, _threshold: Duration) -> bool {
        false
    }
}

impl FrameFeed for StreamSession {
    fn next_video_frame(&self) -> Option<DecodedVideoFrame> {
        StreamSession::next_video_frame(self)
    }

    fn clock(&self) -> f64 {
        StreamSession::clock(self)
    }

    fn has_ended(&self) -> bool {
        StreamSession::has_ended(self)
    }

    fn is_stalled(&self, threshold: Duration) -> bool {
        self.health().is_stalled(threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Presented,
    Dropped,
    /// No frame ready yet.
    Idle,
    /// The feed will never produce another frame.
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenterStats {
    pub shown: u64,
    pub dropped: u64,
    /// Frames that were held back before being shown.
    pub delayed: u64,
    /// Times the feed went quiet for longer than the stall threshold.
    pub stalls: u64,
}

pub struct Presenter {
    controller: SyncController,
    audio: Option<Arc<dyn AudioSink>>,
    stop: StopSignal,
    stats: PresenterStats,
    stalled: bool,
}

impl Presenter {
    /// `audio` is the sink the session feeds; its backlog is subtracted from
    /// the session clock to get the reference time.
    pub fn new(config: SyncConfig, audio: Option<Arc<dyn AudioSink>>, stop: StopSignal) -> Self {
        Self {
            controller: SyncController::new(config),
            audio,
            stop,
            stats: PresenterStats::default(),
            stalled: false,
        }
    }

    pub fn stats(&self) -> PresenterStats {
        self.stats
    }

    pub fn step(&mut self, feed: &dyn FrameFeed, sink: &mut dyn FrameSink) -> Result<Step> {
        let Some(frame) = feed.next_video_frame() else {
            return Ok(if feed.has_ended() { Step::Finished } else { Step::Idle });
        };

        let buffered = self.audio.as_ref().map_or(0.0, |a| a.buffered_seconds());
        let reference = reference_clock(feed.clock(), buffered);

        match self.controller.evaluate_frame(&frame, reference, Instant::now()) {
            SyncDecision::Drop => {
                log::trace!(
                    "Presenter: dropping frame at {:.3}s (reference {:.3}s)",
                    frame.timestamp,
                    reference
                );
                self.stats.dropped += 1;
                return Ok(Step::Dropped);
            }
            SyncDecision::Wait { delay, .. } => {
                self.stats.delayed += 1;
                if self.stop.wait_timeout(delay) {
                    return Ok(Step::Finished);
                }
            }
            SyncDecision::Show => {}
        }

        sink.present(&frame)?;
        self.stats.shown += 1;
        Ok(Step::Presented)
    }

    /// Step until the feed finishes, the stop signal fires, or `max_frames`
    /// frames were shown.
    pub fn run(
        &mut self,
        feed: &dyn FrameFeed,
        sink: &mut dyn FrameSink,
        max_frames: Option<u64>,
    ) -> Result<PresenterStats> {
        while !self.stop.cancelled() {
            if max_frames.is_some_and(|max| self.stats.shown >= max) {
                break;
            }
            match self.step(feed, sink)? {
                Step::Finished => break,
                Step::Idle => {
                    self.watch_stall(feed);
                    self.stop.wait_timeout(IDLE_POLL);
                }
                Step::Presented | Step::Dropped => self.stalled = false,
            }
        }

        log::info!(
            "Presenter: {} shown, {} dropped, {} delayed, {} stalls",
            self.stats.shown,
            self.stats.dropped,
            self.stats.delayed,
            self.stats.stalls
        );
        Ok(self.stats)
    }

    /// Warn once per stall rather than on every idle poll.
    fn watch_stall(&mut self, feed: &dyn FrameFeed) {
        let stalled = feed.is_stalled(STALL_THRESHOLD);
        if stalled && !self.stalled {
            log::warn!("Presenter: no frame decoded for over {:?}", STALL_THRESHOLD);
            self.stats.stalls += 1;
        }
        self.stalled = stalled;
    }
}
