//! Error taxonomy for stream sessions
//!
//! `OpenError` is fatal and surfaced synchronously from `open`.
//! `DecodeError` is produced by the decode loop; only the variants for which
//! [`DecodeError::is_fatal`] holds terminate the session, the rest skip the
//! offending packet.

use std::io;

use thiserror::Error;

/// Failure to bring a stream up.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("invalid stream url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unable to open input `{url}`: {source}")]
    Input {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to fetch `{url}`: {reason}")]
    Http { url: String, reason: String },

    #[error("malformed playlist `{url}`: {reason}")]
    Playlist { url: String, reason: String },

    #[error("unable to probe container: {0}")]
    Probe(#[source] ac_ffmpeg::Error),

    #[error("no decodable video stream found")]
    NoVideoStream,

    #[error("unable to open {kind} decoder for stream {stream}: {source}")]
    Decoder {
        kind: &'static str,
        stream: usize,
        #[source]
        source: ac_ffmpeg::Error,
    },

    #[error("unable to initialize {kind} converter: {reason}")]
    Converter { kind: &'static str, reason: String },

    #[error("session already used; a new session is required")]
    SessionTerminal,

    #[error("unable to spawn decode thread: {0}")]
    Thread(#[source] io::Error),
}

/// Failure while pulling units out of an open source.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A single packet could not be decoded; the packet is skipped.
    #[error("{kind} decode failed: {source}")]
    Packet {
        kind: &'static str,
        #[source]
        source: ac_ffmpeg::Error,
    },

    /// Audio output for one packet could not be resampled; that output is dropped.
    #[error("audio resample failed: {0}")]
    Resample(#[source] ac_ffmpeg::Error),

    /// Reading the next container packet failed.
    #[error("container read failed: {0}")]
    Read(#[source] ac_ffmpeg::Error),

    /// Converter or buffer state could not be (re)allocated.
    #[error("unable to allocate {what}: {reason}")]
    Alloc { what: &'static str, reason: String },

    /// The source was used before `open` succeeded or after `close`.
    #[error("source is not open")]
    NotOpen,
}

impl DecodeError {
    /// Whether this failure must end the session rather than skip a packet.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DecodeError::Read(_) | DecodeError::Alloc { .. } | DecodeError::NotOpen
        )
    }
}

/// An audio sink refused a buffer (device gone, queue closed, ...).
#[derive(Debug, Clone, Error)]
#[error("audio sink rejected {bytes} bytes: {reason}")]
pub struct SinkRejected {
    pub bytes: usize,
    pub reason: String,
}
