//! Audio clock shared between the decode thread and the render side

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Presentation time, in seconds, of the most recently decoded audio.
///
/// The value is stored as the bit pattern of an `f64` inside an `AtomicU64`,
/// so readers always observe a whole value written by the decode thread.
/// Clones share the same cell.
///
/// # Thread Safety
///
/// Single writer (the decode thread), any number of readers.
#[derive(Clone)]
pub struct AudioClock {
    bits: Arc<AtomicU64>,
}

impl AudioClock {
    /// Create a clock reading `0.0`.
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(0f64.to_bits())),
        }
    }

    /// Current value in seconds.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Publish a new audio presentation time. Non-finite values are ignored.
    pub fn set(&self, seconds: f64) {
        if seconds.is_finite() {
            self.bits.store(seconds.to_bits(), Ordering::Release);
        }
    }
}

impl Default for AudioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AudioClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClock")
            .field("seconds", &self.get())
            .finish()
    }
}
