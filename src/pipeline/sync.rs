//! Audio/video synchronization decision
//!
//! Audio is the reference clock; each popped video frame is compared once
//! against the currently audible audio time and is either shown, held back
//! for a bounded amount of time, or dropped.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::decoder::DecodedVideoFrame;

/// Thresholds for A/V synchronization, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// A frame further ahead of the reference than this is held back.
    pub early_threshold: f64,
    /// A frame further behind the reference than this (negative) is dropped.
    pub late_threshold: f64,
    /// Upper bound on a single hold-back.
    pub max_wait: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            early_threshold: 0.010,
            late_threshold: -0.050,
            max_wait: 0.050,
        }
    }
}

/// What to do with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Present now.
    Show,
    /// Too late, discard and move on.
    Drop,
    /// Too early; hold for `delay` (until `until`) then present.
    Wait { delay: Duration, until: Instant },
}

/// Stateless frame scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncController {
    config: SyncConfig,
}

impl SyncController {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Decide for a frame stamped `frame_timestamp` against `reference_clock`.
    pub fn evaluate(&self, frame_timestamp: f64, reference_clock: f64, now: Instant) -> SyncDecision {
        let diff = frame_timestamp - reference_clock;

        if diff > self.config.early_threshold {
            let delay = Duration::from_secs_f64(diff.min(self.config.max_wait).max(0.0));
            SyncDecision::Wait {
                delay,
                until: now + delay,
            }
        } else if diff < self.config.late_threshold {
            SyncDecision::Drop
        } else {
            SyncDecision::Show
        }
    }

    /// Like [`evaluate`](Self::evaluate) but frames without a usable
    /// timestamp are always dropped.
    pub fn evaluate_frame(&self, frame: &DecodedVideoFrame, reference_clock: f64, now: Instant) -> SyncDecision {
        if !frame.is_presentable() || !frame.timestamp.is_finite() {
            return SyncDecision::Drop;
        }
        self.evaluate(frame.timestamp, reference_clock, now)
    }
}

/// Audio time that is audible right now: the last decoded audio timestamp
/// minus whatever is still queued in the sink.
pub fn reference_clock(audio_clock: f64, buffered_seconds: f64) -> f64 {
    audio_clock - buffered_seconds.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> SyncController {
        SyncController::new(SyncConfig::default())
    }

    #[test]
    fn test_early_frame_waits_capped() {
        let now = Instant::now();
        let decision = controller().evaluate(5.000, 4.850, now);

        match decision {
            SyncDecision::Wait { delay, until } => {
                assert_eq!(delay, Duration::from_millis(50));
                assert_eq!(until, now + Duration::from_millis(50));
            }
            other => panic!("expected Wait, got {:?}", other),
        }
    }

    #[test]
    fn test_slightly_early_frame_waits_exact_diff() {
        let now = Instant::now();
        match controller().evaluate(5.000, 4.980, now) {
            SyncDecision::Wait { delay, .. } => {
                let ms = delay.as_secs_f64() * 1000.0;
                assert!((ms - 20.0).abs() < 0.01, "delay {}ms", ms);
            }
            other => panic!("expected Wait, got {:?}", other),
        }
    }

    #[test]
    fn test_late_frame_dropped() {
        assert_eq!(
            controller().evaluate(5.000, 5.060, Instant::now()),
            SyncDecision::Drop
        );
    }

    #[test]
    fn test_on_time_frame_shown() {
        assert_eq!(
            controller().evaluate(5.000, 4.995, Instant::now()),
            SyncDecision::Show
        );
        // slightly late but within tolerance
        assert_eq!(
            controller().evaluate(5.000, 5.040, Instant::now()),
            SyncDecision::Show
        );
    }

    #[test]
    fn test_stream_start_wait_is_bounded() {
        // no audio decoded yet: reference is 0 and the frame is far ahead
        match controller().evaluate(3600.0, reference_clock(0.0, 0.0), Instant::now()) {
            SyncDecision::Wait { delay, .. } => assert_eq!(delay, Duration::from_millis(50)),
            other => panic!("expected Wait, got {:?}", other),
        }
    }

    #[test]
    fn test_sentinel_frame_dropped() {
        let frame = DecodedVideoFrame::new(1, 1, vec![0; 4], 0.0);
        assert_eq!(
            controller().evaluate_frame(&frame, 0.0, Instant::now()),
            SyncDecision::Drop
        );
    }

    #[test]
    fn test_reference_clock_discounts_buffer() {
        assert!((reference_clock(10.0, 0.25) - 9.75).abs() < 1e-12);
        assert_eq!(reference_clock(10.0, -1.0), 10.0);
    }
}
