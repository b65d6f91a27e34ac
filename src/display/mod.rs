//! Consumer side: audio playback and frame presentation

pub mod audio_output;
pub mod presenter;

pub use audio_output::{AudioOutput, CpalAudioSink};
pub use presenter::{FrameFeed, FrameSink, Presenter, PresenterStats, Step};
