//! Health monitoring and metrics for a stream session

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use std::sync::Mutex;

/// Health metrics for a session
///
/// Written by the decode thread, readable from anywhere. All counters use
/// atomic operations.
pub struct SessionHealth {
    /// Video frames decoded and handed to the frame channel
    pub video_frames: AtomicU64,

    /// Audio packets decoded
    pub audio_packets: AtomicU64,

    /// Packets that failed to decode (skipped)
    pub decode_failures: AtomicU64,

    /// Audio outputs that failed to resample (dropped)
    pub resample_failures: AtomicU64,

    /// PCM buffers refused by the audio sink
    pub sink_rejections: AtomicU64,

    /// Total RGBA bytes produced
    pub video_bytes: AtomicU64,

    /// Total PCM bytes produced
    pub audio_bytes: AtomicU64,

    /// When the last video frame was produced
    last_frame_at: Mutex<Option<Instant>>,
}

impl SessionHealth {
    pub fn new() -> Self {
        Self {
            video_frames: AtomicU64::new(0),
            audio_packets: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            resample_failures: AtomicU64::new(0),
            sink_rejections: AtomicU64::new(0),
            video_bytes: AtomicU64::new(0),
            audio_bytes: AtomicU64::new(0),
            last_frame_at: Mutex::new(None),
        }
    }

    pub fn record_video_frame(&self, size: usize) {
        self.video_frames.fetch_add(1, Ordering::Relaxed);
        self.video_bytes.fetch_add(size as u64, Ordering::Relaxed);
        if let Ok(mut last) = self.last_frame_at.lock() {
            *last = Some(Instant::now());
        }
    }

    pub fn record_audio_packet(&self) {
        self.audio_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_bytes(&self, size: usize) {
        self.audio_bytes.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resample_failure(&self) {
        self.resample_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_rejection(&self) {
        self.sink_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn video_frames(&self) -> u64 {
        self.video_frames.load(Ordering::Relaxed)
    }

    pub fn audio_packets(&self) -> u64 {
        self.audio_packets.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn resample_failures(&self) -> u64 {
        self.resample_failures.load(Ordering::Relaxed)
    }

    pub fn sink_rejections(&self) -> u64 {
        self.sink_rejections.load(Ordering::Relaxed)
    }

    /// Check if no video frame arrived for `threshold`.
    ///
    /// A session that never produced a frame is not considered stalled.
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        match self.last_frame_at.lock() {
            Ok(last) => last.is_some_and(|at| at.elapsed() > threshold),
            Err(_) => false,
        }
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            video_frames: self.video_frames(),
            audio_packets: self.audio_packets(),
            decode_failures: self.decode_failures(),
            resample_failures: self.resample_failures(),
            sink_rejections: self.sink_rejections(),
            video_bytes: self.video_bytes.load(Ordering::Relaxed),
            audio_bytes: self.audio_bytes.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub video_frames: u64,
    pub audio_packets: u64,
    pub decode_failures: u64,
    pub resample_failures: u64,
    pub sink_rejections: u64,
    pub video_bytes: u64,
    pub audio_bytes: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} video frames ({} bytes), {} audio packets ({} bytes), {} decode failures, {} resample failures, {} sink rejections",
            self.video_frames,
            self.video_bytes,
            self.audio_packets,
            self.audio_bytes,
            self.decode_failures,
            self.resample_failures,
            self.sink_rejections
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics() {
        let health = SessionHealth::new();

        health.record_video_frame(1000);
        health.record_video_frame(2000);
        health.record_audio_packet();
        health.record_audio_bytes(4096);
        health.record_decode_failure();
        health.record_sink_rejection();

        let summary = health.summary();
        assert_eq!(summary.video_frames, 2);
        assert_eq!(summary.video_bytes, 3000);
        assert_eq!(summary.audio_packets, 1);
        assert_eq!(summary.audio_bytes, 4096);
        assert_eq!(summary.decode_failures, 1);
        assert_eq!(summary.resample_failures, 0);
        assert_eq!(summary.sink_rejections, 1);
        assert!(summary.to_string().contains("2 video frames"));
    }

    #[test]
    fn test_stall_detection() {
        let health = SessionHealth::new();

        // nothing decoded yet
        assert!(!health.is_stalled(Duration::from_millis(1)));

        health.record_video_frame(16);
        assert!(!health.is_stalled(Duration::from_secs(1)));

        std::thread::sleep(Duration::from_millis(150));
        assert!(health.is_stalled(Duration::from_millis(100)));
    }
}
