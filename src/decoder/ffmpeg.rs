use crate::config::{SessionConfig, TARGET_AUDIO_FORMAT};
use crate::decoder::input::{self, InputStream, SourceKind};
use crate::decoder::{AudioSink, DecodedAudioChunk, DecodedVideoFrame, StreamSource, Unit};
use crate::error::{DecodeError, OpenError};
use crate::pipeline::clock::AudioClock;
use crate::utils::sos::StopSignal;
use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::audio::{AudioDecoder, AudioFrame, AudioResampler, ChannelLayout};
use ac_ffmpeg::codec::video::frame::get_pixel_format;
use ac_ffmpeg::codec::video::scaler::{Algorithm, VideoFrameScaler};
use ac_ffmpeg::codec::video::{PixelFormat, VideoDecoder, VideoFrame};
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::format::stream::Stream;
use ac_ffmpeg::packet::Packet;
use ac_ffmpeg::time::{TimeBase, Timestamp};
use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::Arc;

/// Container decoding through FFmpeg.
///
/// One instance serves every [`SourceKind`]; only the byte source handed to
/// the demuxer differs. Video comes out as RGBA at the coded size, audio is
/// resampled to [`TARGET_AUDIO_FORMAT`] and pushed to the registered sink.
pub struct FfmpegSource {
    kind: SourceKind,
    config: SessionConfig,
    stop: StopSignal,
    /// Everything `open` allocates. `None` before open and after close.
    opened: Option<Opened>,
    clock: AudioClock,
    sink: Option<Arc<dyn AudioSink>>,
    audio_enabled: bool,
}

// SAFETY: the FFmpeg contexts are only ever touched by the thread that
// currently owns the source; ownership moves to the decode thread and back.
unsafe impl Send for FfmpegSource {}

struct Opened {
    demuxer: DemuxerWithStreamInfo<InputStream>,
    video: VideoTrack,
    audio: Option<AudioTrack>,
    /// Input exhausted and the video decoder flushed.
    drained: bool,
}

impl FfmpegSource {
    pub fn new(kind: SourceKind, config: SessionConfig, stop: StopSignal) -> Self {
        Self {
            kind,
            config,
            stop,
            opened: None,
            clock: AudioClock::new(),
            sink: None,
            audio_enabled: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.opened.as_ref().is_some_and(|o| o.audio.is_some())
    }

    fn open_inner(&self, url: &str) -> Result<Opened, OpenError> {
        let input = input::open_input(self.kind, url, &self.config, self.stop.clone())?;
        let io = if input.is_seekable() {
            IO::from_seekable_read_stream(input)
        } else {
            IO::from_read_stream(input)
        };

        let demuxer = Demuxer::builder()
            .build(io)
            .map_err(OpenError::Probe)?
            .find_stream_info(None)
            .map_err(|(_, e)| OpenError::Probe(e))?;

        let streams = demuxer.streams();
        let video_index = streams
            .iter()
            .position(|s| s.codec_parameters().is_video_codec())
            .ok_or(OpenError::NoVideoStream)?;
        let video = VideoTrack::new(video_index, &streams[video_index])?;

        let audio = match streams.iter().position(|s| s.codec_parameters().is_audio_codec()) {
            Some(index) => Some(AudioTrack::new(index, &streams[index])?),
            None => {
                info!("FfmpegSource: no audio stream, video only");
                None
            }
        };

        Ok(Opened {
            demuxer,
            video,
            audio,
            drained: false,
        })
    }
}

impl StreamSource for FfmpegSource {
    fn open(&mut self, url: &str) -> Result<(), OpenError> {
        self.close();
        // a partially built `Opened` drops its decoders and demuxer on the way out
        let opened = self.open_inner(url)?;
        info!(
            "FfmpegSource: opened {} ({:?}, video stream {}, audio {})",
            url,
            self.kind,
            opened.video.index,
            opened
                .audio
                .as_ref()
                .map_or_else(|| "none".to_string(), |a| format!("stream {}", a.index))
        );
        self.opened = Some(opened);
        Ok(())
    }

    fn set_audio_sink(&mut self, sink: Arc<dyn AudioSink>) {
        self.sink = Some(sink);
    }

    fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
    }

    fn audio_clock(&self) -> AudioClock {
        self.clock.clone()
    }

    fn next_unit(&mut self) -> Unit {
        let Self {
            opened,
            clock,
            sink,
            audio_enabled,
            ..
        } = self;
        let Some(opened) = opened.as_mut() else {
            return Unit::Error(DecodeError::NotOpen);
        };

        // frames the decoder already holds go out before anything new is read
        match opened.video.take_frame() {
            Ok(Some(frame)) => return Unit::Video(frame),
            Ok(None) => {}
            Err(e) => return Unit::Error(e),
        }
        if opened.drained {
            return Unit::End;
        }

        let sink = if *audio_enabled { sink.as_deref() } else { None };

        loop {
            let packet = match opened.demuxer.take() {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    debug!("FfmpegSource: end of input, flushing decoders");
                    opened.drained = true;
                    if let Some(audio) = opened.audio.as_mut() {
                        audio.flush(sink);
                    }
                    opened.video.flush();
                    return match opened.video.take_frame() {
                        Ok(Some(frame)) => Unit::Video(frame),
                        Ok(None) => Unit::End,
                        Err(e) => Unit::Error(e),
                    };
                }
                Err(e) => return Unit::Error(DecodeError::Read(e)),
            };

            let index = packet.stream_index();
            if index == opened.video.index {
                if let Err(e) = opened.video.push(packet) {
                    return Unit::Error(e);
                }
                match opened.video.take_frame() {
                    Ok(Some(frame)) => return Unit::Video(frame),
                    // decoder wants more input
                    Ok(None) => continue,
                    Err(e) => return Unit::Error(e),
                }
            }

            if let Some(audio) = opened.audio.as_mut().filter(|a| a.index == index) {
                return audio.route(packet, clock, sink);
            }
        }
    }

    fn close(&mut self) {
        if self.opened.take().is_some() {
            info!("FfmpegSource: closed");
        }
    }

    fn name(&self) -> &'static str {
        "FfmpegSource"
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

struct VideoTrack {
    index: usize,
    time_base: TimeBase,
    decoder: VideoDecoder,
    scaler: Option<RgbaScaler>,
    /// Timestamp of the last submitted packet, used when a frame has none.
    last_packet_ts: Option<f64>,
}

impl VideoTrack {
    fn new(index: usize, stream: &Stream) -> Result<Self, OpenError> {
        let params = stream.codec_parameters();
        let video = params
            .as_video_codec_parameters()
            .ok_or(OpenError::NoVideoStream)?;

        let decoder = VideoDecoder::from_stream(stream)
            .and_then(|builder| builder.build())
            .map_err(|source| OpenError::Decoder {
                kind: "video",
                stream: index,
                source,
            })?;

        // some containers only learn the coded size from the first frame
        let scaler = if video.width() > 0 && video.height() > 0 {
            let scaler = RgbaScaler::new(video.pixel_format(), video.width(), video.height())
                .map_err(|e| OpenError::Converter {
                    kind: "video",
                    reason: e.to_string(),
                })?;
            Some(scaler)
        } else {
            debug!("FfmpegSource: video size unknown until first frame");
            None
        };

        Ok(Self {
            index,
            time_base: stream.time_base(),
            decoder,
            scaler,
            last_packet_ts: None,
        })
    }

    fn push(&mut self, packet: Packet) -> Result<(), DecodeError> {
        self.last_packet_ts = seconds(packet.pts(), self.time_base);
        self.decoder
            .push(packet)
            .map_err(|source| DecodeError::Packet { kind: "video", source })
    }

    fn flush(&mut self) {
        if let Err(e) = self.decoder.flush() {
            warn!("FfmpegSource: video flush failed: {}", e);
        }
    }

    fn take_frame(&mut self) -> Result<Option<DecodedVideoFrame>, DecodeError> {
        let frame = match self.decoder.take() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(source) => return Err(DecodeError::Packet { kind: "video", source }),
        };

        let timestamp = seconds(frame.pts(), self.time_base)
            .or(self.last_packet_ts)
            .unwrap_or(0.0);

        let rgba = self.scale(&frame)?;
        let (width, height) = (rgba.width(), rgba.height());
        let planes = rgba.planes();
        let plane = &planes[0];

        let mut data = vec![0u8; width * height * 4];
        extract_plane(&mut data, plane.data(), plane.line_size(), width * 4, height);

        Ok(Some(DecodedVideoFrame::new(
            width as u32,
            height as u32,
            data,
            timestamp,
        )))
    }

    fn scale(&mut self, frame: &VideoFrame) -> Result<VideoFrame, DecodeError> {
        let shape = (frame.pixel_format(), frame.width(), frame.height());

        let scaler = match self.scaler.take() {
            Some(scaler) if scaler.shape == shape => scaler,
            previous => {
                if previous.is_some() {
                    info!(
                        "FfmpegSource: video format changed to {}x{}, rebuilding converter",
                        shape.1, shape.2
                    );
                }
                RgbaScaler::new(shape.0, shape.1, shape.2).map_err(|e| DecodeError::Alloc {
                    what: "video converter",
                    reason: e.to_string(),
                })?
            }
        };

        let scaler = self.scaler.insert(scaler);
        scaler
            .scaler
            .scale(frame)
            .map_err(|source| DecodeError::Packet { kind: "video", source })
    }
}

/// Source format to RGBA at the same size.
struct RgbaScaler {
    scaler: VideoFrameScaler,
    shape: (PixelFormat, usize, usize),
}

impl RgbaScaler {
    fn new(format: PixelFormat, width: usize, height: usize) -> Result<Self, ac_ffmpeg::Error> {
        let scaler = VideoFrameScaler::builder()
            .source_pixel_format(format)
            .source_width(width)
            .source_height(height)
            .target_pixel_format(get_pixel_format("rgba"))
            .target_width(width)
            .target_height(height)
            .algorithm(Algorithm::Bilinear)
            .build()?;

        Ok(Self {
            scaler,
            shape: (format, width, height),
        })
    }
}

struct AudioTrack {
    index: usize,
    time_base: TimeBase,
    decoder: AudioDecoder,
    resampler: AudioResampler,
}

impl AudioTrack {
    fn new(index: usize, stream: &Stream) -> Result<Self, OpenError> {
        let params = stream.codec_parameters();
        let audio = params
            .as_audio_codec_parameters()
            .ok_or_else(|| OpenError::Converter {
                kind: "audio",
                reason: "stream carries no audio parameters".into(),
            })?;

        let decoder = AudioDecoder::from_stream(stream)
            .and_then(|builder| builder.build())
            .map_err(|source| OpenError::Decoder {
                kind: "audio",
                stream: index,
                source,
            })?;

        let target_layout = ChannelLayout::from_channels(TARGET_AUDIO_FORMAT.channels as u32)
            .ok_or_else(|| OpenError::Converter {
                kind: "audio",
                reason: format!("no layout for {} channels", TARGET_AUDIO_FORMAT.channels),
            })?;

        let resampler = AudioResampler::builder()
            .source_channel_layout(audio.channel_layout().to_owned())
            .source_sample_format(audio.sample_format())
            .source_sample_rate(audio.sample_rate())
            .target_channel_layout(target_layout)
            .target_sample_format(get_sample_format("s16"))
            .target_sample_rate(TARGET_AUDIO_FORMAT.sample_rate)
            .build()
            .map_err(|e| OpenError::Converter {
                kind: "audio",
                reason: e.to_string(),
            })?;

        Ok(Self {
            index,
            time_base: stream.time_base(),
            decoder,
            resampler,
        })
    }

    /// Decode one packet, forward its PCM and advance the clock.
    fn route(&mut self, packet: Packet, clock: &AudioClock, sink: Option<&dyn AudioSink>) -> Unit {
        let pts = seconds(packet.pts(), self.time_base);

        if let Err(source) = self.decoder.push(packet) {
            return Unit::Error(DecodeError::Packet { kind: "audio", source });
        }
        let failure = self.drain(sink, pts).err();

        if let Some(pts) = pts {
            clock.set(pts);
        }

        match failure {
            Some(e) => Unit::Error(e),
            None => Unit::Audio,
        }
    }

    fn flush(&mut self, sink: Option<&dyn AudioSink>) {
        if let Err(e) = self.decoder.flush() {
            warn!("FfmpegSource: audio flush failed: {}", e);
            return;
        }
        if let Err(e) = self.drain(sink, None) {
            warn!("FfmpegSource: dropping trailing audio: {}", e);
        }
    }

    /// Pull every decoded frame out of the decoder. Frames keep being drained
    /// after a failure so the decoder never stays full; the last failure wins.
    fn drain(&mut self, sink: Option<&dyn AudioSink>, pts: Option<f64>) -> Result<(), DecodeError> {
        let mut failure = None;
        loop {
            let frame = match self.decoder.take() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(source) => {
                    failure = Some(DecodeError::Packet { kind: "audio", source });
                    break;
                }
            };

            // nothing to feed: skip resampling altogether
            let Some(sink) = sink else { continue };

            match self.resample(frame, pts) {
                Ok(chunks) => {
                    for chunk in chunks {
                        if let Err(e) = sink.queue(&chunk.data) {
                            debug!(
                                "FfmpegSource: audio at {:.3}s not queued: {}",
                                chunk.pts.unwrap_or_default(),
                                e
                            );
                        }
                    }
                }
                Err(e) => failure = Some(e),
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn resample(&mut self, frame: AudioFrame, pts: Option<f64>) -> Result<Vec<DecodedAudioChunk>, DecodeError> {
        self.resampler.push(frame).map_err(DecodeError::Resample)?;

        let mut chunks = Vec::new();
        while let Some(out) = self.resampler.take().map_err(DecodeError::Resample)? {
            // packed s16: a single plane, possibly padded past the last sample
            let len = out.samples() * TARGET_AUDIO_FORMAT.bytes_per_frame();
            let planes = out.planes();
            let data = planes[0].data();
            chunks.push(DecodedAudioChunk {
                data: Bytes::copy_from_slice(&data[..len.min(data.len())]),
                pts,
            });
        }
        Ok(chunks)
    }
}

/// `ts` in seconds, `None` when FFmpeg left it unset.
fn seconds(ts: Timestamp, time_base: TimeBase) -> Option<f64> {
    if ts.is_null() || time_base.den() == 0 {
        return None;
    }
    Some(ts.timestamp() as f64 * time_base.num() as f64 / time_base.den() as f64)
}

/// Copy `height` rows of `row_bytes` out of a padded plane into `dst`.
///
/// Fast path: no stride padding, single memcpy.
#[inline]
fn extract_plane(dst: &mut [u8], src: &[u8], stride: usize, row_bytes: usize, height: usize) {
    if stride == row_bytes && src.len() >= row_bytes * height {
        dst.copy_from_slice(&src[..row_bytes * height]);
        return;
    }

    for r in 0..height {
        let src_start = r * stride;
        let dst_start = r * row_bytes;
        if src_start + row_bytes > src.len() || dst_start + row_bytes > dst.len() {
            break;
        }
        dst[dst_start..dst_start + row_bytes].copy_from_slice(&src[src_start..src_start + row_bytes]);
    }
}
