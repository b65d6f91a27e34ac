//! Byte sources the demuxer reads from
//!
//! The FFmpeg demuxer only sees a `Read` (+ `Seek` for files); how the bytes
//! get here depends on the URL:
//! - local path or `file://` URL: a seekable [`File`]
//! - `http(s)://` progressive download: the response body
//! - `http(s)://.../*.m3u8`: a [`SegmentedReader`] following the playlist

use crate::config::SessionConfig;
use crate::decoder::segmented::SegmentedReader;
use crate::error::OpenError;
use crate::utils::sos::StopSignal;
use log::{debug, info};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use url::Url;

/// Decode strategy, picked once per session from the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// HLS playlist over HTTP.
    Segmented,
    /// Single container downloaded progressively over HTTP.
    Http,
    /// Local file.
    File,
}

impl SourceKind {
    pub fn detect(url: &str) -> Self {
        match parse_remote(url) {
            Some(parsed) if parsed.path().to_ascii_lowercase().ends_with(".m3u8") => SourceKind::Segmented,
            Some(_) => SourceKind::Http,
            None => SourceKind::File,
        }
    }
}

/// `Some` for http(s) URLs.
fn parse_remote(url: &str) -> Option<Url> {
    Url::parse(url)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}

pub enum InputStream {
    File(File),
    Http(Box<dyn Read + Send + Sync>),
    Segmented(SegmentedReader),
}

impl InputStream {
    pub fn is_seekable(&self) -> bool {
        matches!(self, InputStream::File(_))
    }
}

impl Read for InputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            InputStream::File(file) => file.read(buf),
            InputStream::Http(body) => body.read(buf),
            InputStream::Segmented(reader) => reader.read(buf),
        }
    }
}

impl Seek for InputStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            InputStream::File(file) => file.seek(pos),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "network input is not seekable",
            )),
        }
    }
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputStream::File(_) => f.write_str("InputStream::File"),
            InputStream::Http(_) => f.write_str("InputStream::Http"),
            InputStream::Segmented(_) => f.write_str("InputStream::Segmented"),
        }
    }
}

/// Open the byte source for `url`.
pub fn open_input(
    kind: SourceKind,
    url: &str,
    config: &SessionConfig,
    stop: StopSignal,
) -> Result<InputStream, OpenError> {
    match kind {
        SourceKind::File => {
            let path = local_path(url)?;
            debug!("Input: opening file {}", path.display());
            let file = File::open(&path).map_err(|source| OpenError::Input {
                url: url.to_string(),
                source,
            })?;
            Ok(InputStream::File(file))
        }
        SourceKind::Http => {
            let parsed = remote_url(url)?;
            let agent = http_agent(config);
            let response = agent.get(parsed.as_str()).call().map_err(|e| OpenError::Http {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            info!(
                "Input: streaming {} ({})",
                parsed,
                response.content_type()
            );
            Ok(InputStream::Http(response.into_reader()))
        }
        SourceKind::Segmented => {
            let parsed = remote_url(url)?;
            let reader = SegmentedReader::open(&parsed, config, stop)?;
            Ok(InputStream::Segmented(reader))
        }
    }
}

pub(crate) fn http_agent(config: &SessionConfig) -> ureq::Agent {
    // reads stay unbounded, a live stream may legitimately stall
    ureq::AgentBuilder::new()
        .timeout_connect(config.connect_timeout())
        .build()
}

fn remote_url(url: &str) -> Result<Url, OpenError> {
    let parsed = Url::parse(url).map_err(|e| OpenError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(OpenError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme `{}`", parsed.scheme()),
        });
    }
    Ok(parsed)
}

fn local_path(url: &str) -> Result<PathBuf, OpenError> {
    match Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "file" => {
            parsed.to_file_path().map_err(|_| OpenError::InvalidUrl {
                url: url.to_string(),
                reason: "not a local file path".into(),
            })
        }
        // single letter schemes are windows drive letters
        Ok(parsed) if parsed.scheme().len() > 1 => Err(OpenError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme `{}`", parsed.scheme()),
        }),
        _ if url.trim().is_empty() => Err(OpenError::InvalidUrl {
            url: url.to_string(),
            reason: "empty url".into(),
        }),
        _ => Ok(PathBuf::from(url)),
    }
}
