use crate::decoder::AudioFormat;
use crate::pipeline::sync::SyncConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Decoded frames kept between the decode thread and the consumer.
pub const DEFAULT_FRAME_CAPACITY: usize = 30;

/// PCM format every audio chunk is resampled to before reaching the sink.
pub const TARGET_AUDIO_FORMAT: AudioFormat = AudioFormat {
    sample_rate: 44_100,
    channels: 2,
    bytes_per_sample: 2,
};

/// Per-session tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of the frame channel (backpressure bound).
    pub frame_capacity: usize,
    /// Audio/video sync thresholds.
    pub sync: SyncConfig,
    /// HTTP connect timeout in milliseconds. Reads carry no timeout.
    pub connect_timeout_ms: u64,
    /// How many segments behind the live edge a live playlist starts.
    pub live_start_offset: usize,
    /// Whether decoded audio is forwarded to the sink.
    pub audio_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            sync: SyncConfig::default(),
            connect_timeout_ms: 10_000,
            live_start_offset: 3,
            audio_enabled: true,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Load a session configuration from a JSON file. Missing keys take defaults.
pub fn load(path: impl AsRef<Path>) -> anyhow::Result<SessionConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read config {}", path.display()))?;
    let config: SessionConfig = serde_json::from_str(&raw)
        .with_context(|| format!("malformed config {}", path.display()))?;
    anyhow::ensure!(config.frame_capacity > 0, "frame_capacity must be positive");
    Ok(config)
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
