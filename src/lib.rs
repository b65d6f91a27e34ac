//! Live stream decoding with audio-clocked frame delivery.
//!
//! A [`StreamSession`] opens a URL (local file, progressive HTTP or an HLS
//! playlist), decodes it on a background thread and exposes RGBA frames plus
//! the presentation time of the last decoded audio. A [`display::Presenter`]
//! turns those into a render loop that shows, delays or drops each frame
//! against the audible audio time.

pub mod config;
pub mod decoder;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

pub use config::SessionConfig;
pub use decoder::{AudioSink, DecodedVideoFrame, StreamSource};
pub use error::{DecodeError, OpenError};
pub use pipeline::StreamSession;
