//! Events sent from a device handle to its subscribers.

use serde::{Deserialize, Serialize};

/// Notifications a device handle raises while it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// The worker thread is up.
    Started,

    /// A format was negotiated and a new bitmap is backing the device.
    BitmapReady {
        /// Negotiated width in pixels.
        width: u32,

        /// Negotiated height in pixels.
        height: u32,
    },

    /// The bitmap now holds a newer frame.
    FrameReady {
        /// Monotonically increasing frame number within the session.
        sequence: u64,
    },

    /// The framerate estimate was republished.
    FramerateChanged {
        /// Frames per second, rounded to the nearest integer.
        fps: u32,
    },

    /// Building or running the capture graph failed; no frames will arrive
    /// until the device is restarted.
    Error {
        /// Error message.
        message: String,
    },

    /// The worker has torn down the session.
    Stopped,
}

impl DeviceEvent {
    /// Returns true for per-frame traffic.
    pub fn is_frame(&self) -> bool {
        matches!(self, Self::FrameReady { .. })
    }
}
