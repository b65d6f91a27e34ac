use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command, value_parser};
use livecast::config::{self, SessionConfig, app_name, version};
use livecast::decoder::{AudioSink, DecodedVideoFrame};
use livecast::display::{AudioOutput, FrameSink, Presenter};
use livecast::pipeline::StreamSession;
use livecast::utils::sos::StopSignal;
use std::sync::Arc;
use std::time::Instant;
use std::{panic, process};

/// Frames between two cadence log lines.
const REPORT_EVERY: u64 = 120;

fn main() {
    tracing_subscriber::fmt::init();

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    if let Err(e) = run() {
        log::error!("{:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let matches = Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("url")
                .value_name("URL")
                .help("File path, http(s) URL or HLS playlist (.m3u8) to play.")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON session configuration."),
        )
        .arg(
            Arg::new("no-audio")
                .long("no-audio")
                .help("Decode audio for the clock but do not play it.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("frames")
                .short('n')
                .long("frames")
                .value_name("N")
                .help("Stop after presenting N frames.")
                .value_parser(value_parser!(u64)),
        )
        .get_matches();

    let url = matches
        .get_one::<String>("url")
        .context("missing stream url")?
        .clone();

    let mut session_config = match matches.get_one::<String>("config") {
        Some(path) => config::load(path)?,
        None => SessionConfig::default(),
    };
    if matches.get_flag("no-audio") {
        session_config.audio_enabled = false;
    }
    let max_frames = matches.get_one::<u64>("frames").copied();

    // gracefully stop playback on SIGINT, SIGTERM, or SIGHUP
    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            log::info!("Interrupted, stopping playback");
            stop.cancel();
        })
        .context("Error setting Ctrl-C handler")?;
    }

    let output = if session_config.audio_enabled {
        match AudioOutput::open() {
            Ok(output) => Some(output),
            Err(e) => {
                log::warn!("Audio output unavailable, playing without sound: {:#}", e);
                None
            }
        }
    } else {
        None
    };
    let audio: Option<Arc<dyn AudioSink>> = output
        .as_ref()
        .map(|output| output.sink() as Arc<dyn AudioSink>);

    let mut session = StreamSession::for_url(&url, session_config.clone());
    if let Some(sink) = &audio {
        session.set_audio_sink(Arc::clone(sink));
    }
    session
        .open(&url)
        .with_context(|| format!("unable to open {}", url))?;

    let mut surface = HeadlessSurface::default();
    let mut presenter = Presenter::new(session_config.sync, audio, stop);
    let stats = presenter.run(&session, &mut surface, max_frames);

    if let Some(elapsed) = session.state().running_duration() {
        log::info!("Decoding ran for {:.1}s", elapsed.as_secs_f64());
    }
    session.close();
    log::info!("Final state: {}", session.state());
    println!("{}", session.health().summary());
    if let Ok(stats) = &stats {
        println!(
            "Presented {} frames ({} dropped, {} delayed, {} stalls)",
            stats.shown, stats.dropped, stats.delayed, stats.stalls
        );
    }
    stats.map(|_| ())
}

/// Surface that only accounts for what would have been drawn.
#[derive(Default)]
struct HeadlessSurface {
    started_at: Option<Instant>,
    frames: u64,
    last_size: Option<(u32, u32)>,
}

impl FrameSink for HeadlessSurface {
    fn present(&mut self, frame: &DecodedVideoFrame) -> Result<()> {
        let started_at = *self.started_at.get_or_insert_with(Instant::now);
        self.frames += 1;

        let size = (frame.width, frame.height);
        if self.last_size != Some(size) {
            log::info!("Surface: {}x{}", size.0, size.1);
            self.last_size = Some(size);
        }

        if self.frames % REPORT_EVERY == 0 {
            let elapsed = started_at.elapsed().as_secs_f64();
            log::info!(
                "Surface: {} frames, {:.2} fps, at {:.3}s",
                self.frames,
                self.frames as f64 / elapsed.max(f64::EPSILON),
                frame.timestamp
            );
        }
        Ok(())
    }
}
