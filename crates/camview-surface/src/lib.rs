//! Headless display surface for camview devices.
//!
//! A surface binds one capture device at a time, follows its events on a
//! render thread, and hands out rotated snapshots and (optionally mirrored)
//! still frames.

mod error;
mod surface;

pub use error::SurfaceError;
pub use surface::DisplaySurface;

/// Result type for surface operations.
pub type SurfaceResult<T> = Result<T, SurfaceError>;
