use crate::config::TARGET_AUDIO_FORMAT;
use crate::decoder::{AudioFormat, AudioSink};
use crate::error::SinkRejected;
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Samples held before the oldest are overwritten: 3s of 44.1kHz stereo.
/// The decode thread runs ahead of playback by up to a full frame channel
/// (about a second at 25-30 fps), so the ring must hold more than that.
pub const MAX_BUFFER_SAMPLES: usize = 3 * 44_100 * 2;
const I16_TO_F32: f32 = 1.0 / 32768.0;

/// Ring buffer of interleaved samples waiting for the device.
struct SampleRing {
    buffer: Vec<f32>,
    write_pos: usize,
    read_pos: usize,
    len: usize,
    capacity: usize,
    samples_dropped: u64,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: vec![0.0f32; capacity],
            write_pos: 0,
            read_pos: 0,
            len: 0,
            capacity,
            samples_dropped: 0,
        }
    }

    /// Push samples, dropping the oldest if full
    fn push(&mut self, samples: impl Iterator<Item = f32>) {
        for sample in samples {
            if self.len >= self.capacity {
                self.read_pos = (self.read_pos + 1) % self.capacity;
                self.samples_dropped += 1;
            } else {
                self.len += 1;
            }
            self.buffer[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.capacity;
        }
    }

    /// Fill `output`, padding with silence on underrun
    fn read(&mut self, output: &mut [f32]) {
        for sample in output.iter_mut() {
            if self.len > 0 {
                *sample = self.buffer[self.read_pos];
                self.read_pos = (self.read_pos + 1) % self.capacity;
                self.len -= 1;
            } else {
                *sample = 0.0;
            }
        }
    }
}

/// [`AudioSink`] backed by a sample ring the output device drains.
///
/// `queue` takes packed s16 PCM in [`TARGET_AUDIO_FORMAT`]; `queued_bytes`
/// reports what has been queued but not yet pulled by the device, expressed
/// in that same input format.
pub struct CpalAudioSink {
    ring: Mutex<SampleRing>,
    /// Set by the device error callback; every later `queue` is refused.
    failed: AtomicBool,
    bytes_queued: AtomicU64,
}

impl CpalAudioSink {
    pub fn new(capacity_samples: usize) -> Self {
        Self {
            ring: Mutex::new(SampleRing::new(capacity_samples)),
            failed: AtomicBool::new(false),
            bytes_queued: AtomicU64::new(0),
        }
    }

    /// Device side: pull the next samples.
    pub fn fill(&self, output: &mut [f32]) {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read(output);
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn samples_dropped(&self) -> u64 {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .samples_dropped
    }

    /// Total bytes accepted since creation.
    pub fn bytes_queued(&self) -> u64 {
        self.bytes_queued.load(Ordering::Relaxed)
    }
}

impl AudioSink for CpalAudioSink {
    fn queue(&self, pcm: &[u8]) -> Result<(), SinkRejected> {
        if self.failed.load(Ordering::Acquire) {
            return Err(SinkRejected {
                bytes: pcm.len(),
                reason: "output device failed".into(),
            });
        }

        let samples = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 * I16_TO_F32);
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(samples);
        self.bytes_queued.fetch_add(pcm.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn queued_bytes(&self) -> usize {
        let len = self.ring.lock().unwrap_or_else(PoisonError::into_inner).len;
        len * TARGET_AUDIO_FORMAT.bytes_per_sample as usize
    }

    fn format(&self) -> AudioFormat {
        TARGET_AUDIO_FORMAT
    }
}

/// Default output device playing whatever the sink receives.
pub struct AudioOutput {
    sink: Arc<CpalAudioSink>,
    _stream: cpal::Stream, // kept alive
}

impl AudioOutput {
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No output audio device"))?;
        let config = cpal::StreamConfig {
            channels: TARGET_AUDIO_FORMAT.channels,
            sample_rate: TARGET_AUDIO_FORMAT.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let sink = Arc::new(CpalAudioSink::new(MAX_BUFFER_SAMPLES));
        let reader = Arc::clone(&sink);
        let on_error = Arc::clone(&sink);

        let stream = device.build_output_stream(
            &config,
            move |output: &mut [f32], _| reader.fill(output),
            move |err| {
                log::error!("Audio output error: {}", err);
                on_error.mark_failed();
            },
            None,
        )?;
        stream.play()?;

        log::info!(
            "Audio output: {} Hz, {} channels",
            TARGET_AUDIO_FORMAT.sample_rate,
            TARGET_AUDIO_FORMAT.channels
        );
        Ok(Self { sink, _stream: stream })
    }

    pub fn sink(&self) -> Arc<CpalAudioSink> {
        Arc::clone(&self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_queue_then_fill() {
        let sink = CpalAudioSink::new(16);
        sink.queue(&pcm(&[16384, -16384, 0, 32767])).unwrap();
        assert_eq!(sink.queued_bytes(), 8);

        let mut out = [1.0f32; 6];
        sink.fill(&mut out);
        assert_eq!(out[0], 0.5);
        assert_eq!(out[1], -0.5);
        assert_eq!(out[2], 0.0);
        assert!((out[3] - 1.0).abs() < 1e-4);
        // underrun is silence
        assert_eq!(&out[4..], &[0.0, 0.0]);
        assert_eq!(sink.queued_bytes(), 0);
    }

    #[test]
    fn test_buffered_seconds_from_queue() {
        let sink = CpalAudioSink::new(MAX_BUFFER_SAMPLES);
        // 100ms of 44.1kHz stereo s16
        sink.queue(&vec![0u8; 17_640]).unwrap();
        assert!((sink.buffered_seconds() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_one_second_ahead_fits_without_loss() {
        let sink = CpalAudioSink::new(MAX_BUFFER_SAMPLES);
        let second = TARGET_AUDIO_FORMAT.bytes_per_second();
        assert_eq!(second, 176_400);

        sink.queue(&vec![0u8; second]).unwrap();
        assert_eq!(sink.samples_dropped(), 0);
        assert!((sink.buffered_seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let sink = CpalAudioSink::new(4);
        sink.queue(&pcm(&[1, 2, 3, 4, 5, 6])).unwrap();

        assert_eq!(sink.queued_bytes(), 8);
        assert_eq!(sink.samples_dropped(), 2);

        let mut out = [0.0f32; 4];
        sink.fill(&mut out);
        assert_eq!(out[0], 3.0 * I16_TO_F32);
        assert_eq!(out[3], 6.0 * I16_TO_F32);
    }

    #[test]
    fn test_failed_device_rejects() {
        let sink = CpalAudioSink::new(8);
        sink.mark_failed();

        let err = sink.queue(&pcm(&[1, 2])).unwrap_err();
        assert_eq!(err.bytes, 4);
        assert_eq!(sink.queued_bytes(), 0);
        assert_eq!(sink.bytes_queued(), 0);
    }
}
