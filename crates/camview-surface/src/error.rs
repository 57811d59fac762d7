//! Error types for the surface module.

use thiserror::Error;

use camview_capture::CaptureError;

/// Errors that can occur on a display surface.
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// The bound device failed to start.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// No frame is available to grab.
    #[error("No frame available")]
    NoFrame,

    /// The render thread could not be spawned.
    #[error("Failed to spawn render thread: {0}")]
    RenderSpawn(#[source] std::io::Error),
}
