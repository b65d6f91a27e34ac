//! Playback pipeline for a single stream
//!
//! Separates the concerns of a session:
//! - Control: [`StreamSession`] lifecycle and its [`SessionState`] machine
//! - Data transport: [`FrameChannel`] with backpressure
//! - Timing: the shared [`AudioClock`] and the [`SyncController`] decision
//! - Health: counters readable while the decode thread runs

pub mod clock;
pub mod frame_channel;
pub mod health;
pub mod session;
pub mod state;
pub mod sync;

pub use clock::AudioClock;
pub use frame_channel::{FrameChannel, Stopped};
pub use health::{HealthSummary, SessionHealth};
pub use session::StreamSession;
pub use state::SessionState;
pub use sync::{SyncConfig, SyncController, SyncDecision, reference_clock};
