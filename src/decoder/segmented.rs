//! HLS follower presenting a playlist as one continuous byte stream
//!
//! Segment bodies are concatenated in sequence order; MPEG-TS segments can be
//! demuxed back to back, so the demuxer never learns segment boundaries.
//! Fragmented MP4 segments are preceded by their `#EXT-X-MAP` section, sent
//! again whenever the map changes. Byte-range segments are fetched with a
//! `Range` request.
//!
//! A live playlist is re-fetched every half target duration while waiting for
//! new segments. The stop signal interrupts that wait.

use crate::config::SessionConfig;
use crate::decoder::input::http_agent;
use crate::decoder::playlist::{self, ByteSpan, InitSection, MediaPlaylist, Playlist, Segment};
use crate::error::OpenError;
use crate::utils::sos::StopSignal;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::time::Duration;
use url::Url;

/// Refresh cadence when the playlist does not announce a target duration.
const DEFAULT_REFRESH: Duration = Duration::from_secs(1);

type Body = Box<dyn Read + Send + Sync>;

pub struct SegmentedReader {
    agent: ureq::Agent,
    /// Media playlist being followed (the chosen variant for master playlists).
    playlist_url: Url,
    stop: StopSignal,
    pending: VecDeque<Segment>,
    current: Option<Body>,
    /// Map last written to the stream.
    init: Option<InitSection>,
    next_sequence: u64,
    target_duration: f64,
    ended: bool,
}

impl SegmentedReader {
    /// Fetch the playlist (resolving a master playlist to its best variant)
    /// and queue the first segments.
    pub fn open(url: &Url, config: &SessionConfig, stop: StopSignal) -> Result<Self, OpenError> {
        let agent = http_agent(config);

        let mut playlist_url = url.clone();
        let mut playlist = fetch_playlist(&agent, &playlist_url).map_err(|e| open_error(url, e))?;

        if let Some(variant) = playlist.best_variant() {
            info!(
                "SegmentedReader: selected variant {} ({} bps)",
                variant.uri, variant.bandwidth
            );
            playlist_url = variant.uri.clone();
            playlist = fetch_playlist(&agent, &playlist_url).map_err(|e| open_error(&playlist_url, e))?;
        }

        let Playlist::Media(media) = playlist else {
            return Err(OpenError::Playlist {
                url: playlist_url.to_string(),
                reason: "variant is itself a master playlist".into(),
            });
        };

        let start = media.start_sequence(config.live_start_offset);
        info!(
            "SegmentedReader: {} playlist with {} segments, starting at sequence {}",
            if media.ended { "finished" } else { "live" },
            media.segments.len(),
            start
        );

        let mut reader = Self {
            agent,
            playlist_url,
            stop,
            pending: VecDeque::new(),
            current: None,
            init: None,
            next_sequence: start,
            target_duration: 0.0,
            ended: false,
        };
        reader.absorb(media);
        Ok(reader)
    }

    /// Wait between playlist refreshes.
    pub fn refresh_interval(&self) -> Duration {
        if self.target_duration > 0.0 {
            Duration::from_secs_f64(self.target_duration / 2.0)
        } else {
            DEFAULT_REFRESH
        }
    }

    /// Segments queued but not yet started.
    pub fn queued_segments(&self) -> usize {
        self.pending.len()
    }

    fn absorb(&mut self, media: MediaPlaylist) {
        if media.media_sequence > self.next_sequence {
            warn!(
                "SegmentedReader: fell behind, segments {}..{} expired",
                self.next_sequence, media.media_sequence
            );
        }

        let fresh: Vec<Segment> = media.segments_from(self.next_sequence).cloned().collect();
        if let Some(last) = fresh.last() {
            self.next_sequence = last.sequence + 1;
        }
        if !fresh.is_empty() {
            debug!("SegmentedReader: {} new segments", fresh.len());
        }
        self.pending.extend(fresh);
        self.target_duration = media.target_duration;
        self.ended = media.ended;
    }

    fn refresh(&mut self) -> io::Result<()> {
        match fetch_playlist(&self.agent, &self.playlist_url)? {
            Playlist::Media(media) => {
                self.absorb(media);
                Ok(())
            }
            Playlist::Master(_) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "media playlist turned into a master playlist",
            )),
        }
    }

    /// Body of `segment`, preceded by its map when that differs from the last one sent.
    fn open_segment(&mut self, segment: &Segment) -> io::Result<Body> {
        debug!("SegmentedReader: fetching segment {}", segment.sequence);
        let body = self.fetch(&segment.uri, segment.range)?;

        match &segment.init {
            Some(init) if self.init.as_ref() != Some(init) => {
                debug!("SegmentedReader: new init section {}", init.uri);
                let head = self.fetch(&init.uri, init.range)?;
                self.init = Some(init.clone());
                Ok(Box::new(head.chain(body)))
            }
            _ => Ok(body),
        }
    }

    fn fetch(&self, uri: &Url, range: Option<ByteSpan>) -> io::Result<Body> {
        let mut request = self.agent.get(uri.as_str());
        if let Some(span) = range {
            request = request.set("Range", &span.range_header());
        }
        let response = request
            .call()
            .map_err(|e| io::Error::other(format!("segment {}: {}", uri, e)))?;

        let Some(span) = range else {
            return Ok(response.into_reader());
        };
        if response.status() == 206 {
            return Ok(Box::new(response.into_reader().take(span.length)));
        }

        // server ignored the range and sent the whole resource
        debug!("SegmentedReader: {} ignored Range, skipping {} bytes", uri, span.offset);
        let mut body = response.into_reader();
        io::copy(&mut body.by_ref().take(span.offset), &mut io::sink())?;
        Ok(Box::new(body.take(span.length)))
    }
}

impl Read for SegmentedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.stop.cancelled() {
                return Ok(0);
            }

            if let Some(body) = self.current.as_mut() {
                let n = body.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
                self.current = None;
                continue;
            }

            if let Some(segment) = self.pending.pop_front() {
                self.current = Some(self.open_segment(&segment)?);
                continue;
            }

            if self.ended {
                info!("SegmentedReader: playlist finished");
                return Ok(0);
            }

            if self.stop.wait_timeout(self.refresh_interval()) {
                return Ok(0);
            }
            self.refresh()?;
        }
    }
}

fn fetch_playlist(agent: &ureq::Agent, url: &Url) -> io::Result<Playlist> {
    let mut bytes = Vec::new();
    agent
        .get(url.as_str())
        .call()
        .map_err(|e| io::Error::other(e.to_string()))?
        .into_reader()
        .read_to_end(&mut bytes)?;
    playlist::parse(url, &bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn open_error(url: &Url, e: io::Error) -> OpenError {
    if e.kind() == io::ErrorKind::InvalidData {
        OpenError::Playlist {
            url: url.to_string(),
            reason: e.to_string(),
        }
    } else {
        OpenError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}
