//! End-to-end decoding of a clip encoded on the fly with FFmpeg.

use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::audio::{AudioEncoder, AudioFrameMut, ChannelLayout};
use ac_ffmpeg::codec::video::{self, VideoEncoder, VideoFrameMut};
use ac_ffmpeg::codec::{CodecParameters, Encoder};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::format::muxer::{Muxer, OutputFormat};
use ac_ffmpeg::time::{TimeBase, Timestamp};
use livecast::config::TARGET_AUDIO_FORMAT;
use livecast::decoder::{AudioFormat, AudioSink, FfmpegSource, SourceKind, StreamSource, Unit};
use livecast::error::SinkRejected;
use livecast::pipeline::SessionState;
use livecast::utils::sos::StopSignal;
use livecast::{SessionConfig, StreamSession};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const WIDTH: usize = 64;
const HEIGHT: usize = 48;
const FRAMES: i64 = 25;
const FPS: i32 = 25;
const AUDIO_RATE: u32 = 48_000;
const AUDIO_CHUNK: usize = AUDIO_RATE as usize / FPS as usize;

/// One second of black 64x48 mpeg4 video with mono s16 silence, in Matroska.
fn write_clip(path: &Path) {
    let pixel_format = video::frame::get_pixel_format("yuv420p");
    let video_tb = TimeBase::new(1, FPS);
    let mut video_encoder = VideoEncoder::builder("mpeg4")
        .unwrap()
        .pixel_format(pixel_format)
        .width(WIDTH)
        .height(HEIGHT)
        .time_base(video_tb)
        .build()
        .unwrap();

    let sample_format = get_sample_format("s16");
    let audio_tb = TimeBase::new(1, AUDIO_RATE as i32);
    let mut audio_encoder = AudioEncoder::builder("pcm_s16le")
        .unwrap()
        .sample_rate(AUDIO_RATE)
        .channel_layout(ChannelLayout::from_channels(1).unwrap())
        .sample_format(sample_format)
        .time_base(audio_tb)
        .build()
        .unwrap();

    let video_params: CodecParameters = video_encoder.codec_parameters().into();
    let audio_params: CodecParameters = audio_encoder.codec_parameters().into();

    let format = OutputFormat::guess_from_file_name(path.to_str().unwrap()).unwrap();
    let io = IO::from_seekable_write_stream(File::create(path).unwrap());
    let mut builder = Muxer::builder();
    builder.add_stream(&video_params).unwrap();
    builder.add_stream(&audio_params).unwrap();
    let mut muxer = builder.build(io, format).unwrap();

    for i in 0..FRAMES {
        // pts start at 1 so no frame lands on the 0.0 sentinel
        let frame = VideoFrameMut::black(pixel_format, WIDTH, HEIGHT)
            .with_time_base(video_tb)
            .with_pts(Timestamp::new(i + 1, video_tb))
            .freeze();
        video_encoder.push(frame).unwrap();
        while let Some(packet) = video_encoder.take().unwrap() {
            muxer.push(packet.with_stream_index(0)).unwrap();
        }

        let params = audio_encoder.codec_parameters();
        let samples = AudioFrameMut::silence(
            params.channel_layout(),
            params.sample_format(),
            params.sample_rate(),
            AUDIO_CHUNK,
        )
        .with_time_base(audio_tb)
        .with_pts(Timestamp::new((i + 1) * AUDIO_CHUNK as i64, audio_tb))
        .freeze();
        audio_encoder.push(samples).unwrap();
        while let Some(packet) = audio_encoder.take().unwrap() {
            muxer.push(packet.with_stream_index(1)).unwrap();
        }
    }

    video_encoder.flush().unwrap();
    while let Some(packet) = video_encoder.take().unwrap() {
        muxer.push(packet.with_stream_index(0)).unwrap();
    }
    audio_encoder.flush().unwrap();
    while let Some(packet) = audio_encoder.take().unwrap() {
        muxer.push(packet.with_stream_index(1)).unwrap();
    }
    muxer.flush().unwrap();
}

#[derive(Default)]
struct CountingSink {
    bytes: AtomicUsize,
}

impl AudioSink for CountingSink {
    fn queue(&self, pcm: &[u8]) -> Result<(), SinkRejected> {
        self.bytes.fetch_add(pcm.len(), Ordering::SeqCst);
        Ok(())
    }

    fn queued_bytes(&self) -> usize {
        0
    }

    fn format(&self) -> AudioFormat {
        TARGET_AUDIO_FORMAT
    }
}

fn clip() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.mkv");
    write_clip(&path);
    let url = path.to_string_lossy().into_owned();
    (dir, url)
}

#[test]
fn decodes_every_frame_at_coded_size() {
    let (_dir, url) = clip();
    let sink = Arc::new(CountingSink::default());

    let mut source = FfmpegSource::new(SourceKind::File, SessionConfig::default(), StopSignal::new());
    source.set_audio_sink(sink.clone());
    source.set_audio_enabled(true);
    source.open(&url).unwrap();
    assert!(source.has_audio());

    let clock = source.audio_clock();
    let mut frames = Vec::new();
    let mut last_clock = 0.0;

    for _ in 0..10_000 {
        match source.next_unit() {
            Unit::Video(frame) => frames.push(frame),
            Unit::Audio => {
                assert!(clock.get() >= last_clock);
                last_clock = clock.get();
            }
            Unit::Error(e) => assert!(!e.is_fatal(), "fatal decode error: {}", e),
            Unit::End => break,
        }
    }
    // end of stream is sticky
    assert!(matches!(source.next_unit(), Unit::End));

    assert_eq!(frames.len(), FRAMES as usize);
    for frame in &frames {
        assert_eq!(frame.width as usize, WIDTH);
        assert_eq!(frame.height as usize, HEIGHT);
        assert_eq!(frame.data.len(), WIDTH * HEIGHT * 4);
        assert!(frame.is_presentable());
    }
    assert!(frames.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!((frames[FRAMES as usize - 1].timestamp - 1.0).abs() < 0.01);

    assert!(last_clock > 0.5);
    // a second of mono 48k resampled to 44.1k stereo s16
    let bytes = sink.bytes.load(Ordering::SeqCst);
    assert!(bytes > TARGET_AUDIO_FORMAT.bytes_per_second() / 2, "only {} pcm bytes", bytes);

    source.close();
    source.close();
    assert!(!source.is_open());
}

#[test]
fn disabled_audio_still_advances_clock() {
    let (_dir, url) = clip();
    let sink = Arc::new(CountingSink::default());

    let mut source = FfmpegSource::new(SourceKind::File, SessionConfig::default(), StopSignal::new());
    source.set_audio_sink(sink.clone());
    source.set_audio_enabled(false);
    source.open(&url).unwrap();

    let mut video = 0;
    loop {
        match source.next_unit() {
            Unit::Video(_) => video += 1,
            Unit::End => break,
            Unit::Audio | Unit::Error(_) => {}
        }
    }

    assert_eq!(video, FRAMES);
    assert_eq!(sink.bytes.load(Ordering::SeqCst), 0);
    assert!(source.audio_clock().get() > 0.5);
}

#[test]
fn session_plays_file_to_the_end() {
    let (_dir, url) = clip();

    let config = SessionConfig {
        frame_capacity: 4,
        ..Default::default()
    };
    let mut session = StreamSession::for_url(&url, config);
    session.set_audio_sink(Arc::new(CountingSink::default()));
    session.open(&url).unwrap();

    let mut count = 0;
    while let Some(frame) = session.wait_video_frame() {
        assert_eq!(frame.data.len(), WIDTH * HEIGHT * 4);
        count += 1;
    }

    assert_eq!(count, FRAMES);
    assert_eq!(session.state(), SessionState::Ended);
    assert!(session.has_ended());
    assert!(session.clock() > 0.5);
    assert!(session.health().summary().audio_bytes > 0);

    session.close();
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn unopenable_url_fails_synchronously() {
    let mut session = StreamSession::for_url("/missing/clip.mkv", SessionConfig::default());
    assert!(session.open("/missing/clip.mkv").is_err());
    assert_eq!(session.state(), SessionState::Failed);
    session.close();
    session.close();
}
