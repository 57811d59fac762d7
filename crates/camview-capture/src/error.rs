//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Windows API error.
    #[error("Windows API error: {message}")]
    WindowsApi {
        message: String,
        #[cfg(windows)]
        #[source]
        source: Option<windows::core::Error>,
    },

    /// Capture device not found.
    #[error("Capture device not found: {0}")]
    DeviceNotFound(String),

    /// Enumeration returned no devices.
    #[error("No capture devices available")]
    NoDevices,

    /// No capture backend on this platform.
    #[error("Video capture not supported on this platform")]
    NotSupported,

    /// The grabber cannot deliver the requested pixel format.
    #[error("Pixel format not supported: {0}")]
    FormatNotSupported(String),

    /// Source and grabber did not agree on a format.
    #[error("Format negotiation failed: {0}")]
    Negotiation(String),

    /// The graph refused to run or stop.
    #[error("Capture pipeline error: {0}")]
    Pipeline(String),

    /// The worker thread could not be spawned.
    #[error("Failed to spawn capture worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

#[cfg(windows)]
impl From<windows::core::Error> for CaptureError {
    fn from(err: windows::core::Error) -> Self {
        Self::WindowsApi {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}
