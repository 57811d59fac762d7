//! Capture and display configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{PixelFormat, Rotation};
use crate::EVENT_CHANNEL_CAPACITY;

/// Configuration for a device handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Pixel format requested from the grabber.
    pub pixel_format: PixelFormat,

    /// Minimum window over which the framerate is measured (default: 1000).
    pub framerate_window_ms: u64,

    /// Capacity of each subscriber's event channel (default: 256).
    pub event_capacity: usize,
}

impl CaptureConfig {
    /// Framerate window as a duration.
    pub fn framerate_window(&self) -> Duration {
        Duration::from_millis(self.framerate_window_ms.max(1))
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Bgr32,
            framerate_window_ms: 1000,
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Configuration for a display surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Rotation applied to the displayed bitmap.
    pub rotation: Rotation,

    /// Mirror grabbed stills horizontally.
    pub mirror_stills: bool,
}
