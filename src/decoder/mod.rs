//! Stream decoding module
//!
//! Provides the [`StreamSource`] abstraction (one decode strategy per
//! session) and its FFmpeg-backed implementation, plus the value types that
//! flow out of the decode loop.

mod ffmpeg;
pub mod input;
pub mod playlist;
mod segmented;

use crate::config::SessionConfig;
use crate::error::{DecodeError, OpenError, SinkRejected};
use crate::pipeline::clock::AudioClock;
use crate::utils::sos::StopSignal;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use ffmpeg::FfmpegSource;
pub use input::SourceKind;
pub use segmented::SegmentedReader;

/// Decoded video frame, always RGBA.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedVideoFrame {
    pub width: u32,
    pub height: u32,
    /// Contiguous RGBA pixels, exactly `width * height * 4` bytes.
    pub data: Vec<u8>,
    /// Presentation time in seconds. `0.0` means unset.
    pub timestamp: f64,
}

impl DecodedVideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>, timestamp: f64) -> Self {
        Self {
            width,
            height,
            data,
            timestamp,
        }
    }

    /// Byte length an RGBA buffer of this size must have.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Frames with the unset sentinel timestamp must never be shown.
    pub fn is_presentable(&self) -> bool {
        self.timestamp != 0.0 && self.data.len() == self.expected_len()
    }
}

/// Resampled PCM handed to the audio sink.
#[derive(Debug, Clone)]
pub struct DecodedAudioChunk {
    pub data: Bytes,
    pub pts: Option<f64>,
}

/// Interleaved PCM layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
}

impl AudioFormat {
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * self.bytes_per_sample as usize
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.bytes_per_sample as usize
    }

    /// Playback duration, in seconds, of `bytes` of PCM in this format.
    pub fn duration_of(&self, bytes: usize) -> f64 {
        let rate = self.bytes_per_second();
        if rate == 0 {
            return 0.0;
        }
        bytes as f64 / rate as f64
    }
}

/// Outcome of one decode step.
#[derive(Debug)]
pub enum Unit {
    Video(DecodedVideoFrame),
    /// An audio packet was consumed (and forwarded to the sink if enabled).
    Audio,
    Error(DecodeError),
    End,
}

/// Consumer of resampled PCM.
///
/// The decode thread queues; the render side reads `queued_bytes` to estimate
/// how much audio has been handed over but not yet played.
pub trait AudioSink: Send + Sync {
    fn queue(&self, pcm: &[u8]) -> Result<(), SinkRejected>;

    fn queued_bytes(&self) -> usize;

    fn format(&self) -> AudioFormat;

    /// Seconds of audio queued but not yet audible.
    fn buffered_seconds(&self) -> f64 {
        self.format().duration_of(self.queued_bytes())
    }
}

/// One decode strategy: owns every piece of demux/decode/convert state.
pub trait StreamSource: Send {
    /// Open `url`. On failure everything partially allocated is released.
    fn open(&mut self, url: &str) -> Result<(), OpenError>;

    /// Register the sink decoded audio is forwarded to.
    fn set_audio_sink(&mut self, sink: Arc<dyn AudioSink>);

    /// Toggle audio emission without touching video decoding.
    fn set_audio_enabled(&mut self, enabled: bool);

    /// Shared handle on the presentation time of the last decoded audio.
    fn audio_clock(&self) -> AudioClock;

    /// Read and route container packets until one unit can be reported.
    fn next_unit(&mut self) -> Unit;

    /// Release all state. Idempotent, safe before a successful `open`.
    fn close(&mut self);

    /// Name used in log lines.
    fn name(&self) -> &'static str;
}

/// Pick the strategy for `url` and build an unopened source for it.
pub fn source_for_url(url: &str, config: &SessionConfig, stop: StopSignal) -> Box<dyn StreamSource> {
    let kind = SourceKind::detect(url);
    log::debug!("Selected {:?} source for {}", kind, url);
    Box::new(FfmpegSource::new(kind, config.clone(), stop))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sentinel_not_presentable() {
        let frame = DecodedVideoFrame::new(2, 2, vec![0; 16], 0.0);
        assert!(!frame.is_presentable());

        let frame = DecodedVideoFrame::new(2, 2, vec![0; 16], 1.25);
        assert!(frame.is_presentable());
    }

    #[test]
    fn test_frame_wrong_buffer_not_presentable() {
        let frame = DecodedVideoFrame::new(4, 4, vec![0; 10], 3.0);
        assert_eq!(frame.expected_len(), 64);
        assert!(!frame.is_presentable());
    }

    #[test]
    fn test_buffered_duration() {
        let format = AudioFormat {
            sample_rate: 44_100,
            channels: 2,
            bytes_per_sample: 2,
        };
        // one second of stereo s16
        assert!((format.duration_of(176_400) - 1.0).abs() < 1e-9);
        assert!((format.duration_of(17_640) - 0.1).abs() < 1e-9);
        assert_eq!(format.bytes_per_frame(), 4);
    }

    #[test]
    fn test_zero_rate_duration() {
        let format = AudioFormat {
            sample_rate: 0,
            channels: 2,
            bytes_per_sample: 2,
        };
        assert_eq!(format.duration_of(1000), 0.0);
    }
}
