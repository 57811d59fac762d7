//! Framerate accounting.

use std::time::{Duration, Instant};

/// Frames per second over an elapsed interval, rounded to the nearest
/// integer. Elapsed time is taken in whole milliseconds.
pub fn frames_per_second(frames: u64, elapsed: Duration) -> u32 {
    let elapsed_ms = elapsed.as_millis();
    if elapsed_ms == 0 {
        return 0;
    }
    (frames as f64 * 1000.0 / elapsed_ms as f64).round() as u32
}

/// Counts frames and republishes a rate once per window.
///
/// No smoothing is carried across windows: every publication reflects only
/// the frames seen since the previous one.
#[derive(Debug, Clone)]
pub struct FramerateCounter {
    frames: u64,
    window_start: Instant,
    window: Duration,
}

impl FramerateCounter {
    /// Start counting at `now`, publishing at most once per `window`.
    pub fn new(now: Instant, window: Duration) -> Self {
        Self {
            frames: 0,
            window_start: now,
            window,
        }
    }

    /// Record `frames` frames seen by `now`.
    ///
    /// Returns the new rate when the window has elapsed, resetting the tally
    /// and the window start.
    pub fn record_frames(&mut self, now: Instant, frames: u64) -> Option<u32> {
        self.frames += frames;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }

        let fps = frames_per_second(self.frames, elapsed);
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }
}
