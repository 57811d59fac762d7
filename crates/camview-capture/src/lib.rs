//! Webcam capture pipeline.
//!
//! This crate enumerates video capture devices, runs one capture graph per
//! started device on a dedicated worker thread, copies every decoded frame
//! into a fixed-size frame buffer, and exposes the newest frame as a bitmap
//! together with a once-per-second framerate estimate.

mod backend;
mod bitmap;
mod device;
mod enumerate;
mod error;
mod frame;
mod framerate;
#[cfg(windows)]
mod mf;
mod observers;
mod sink;
pub mod synthetic;

pub use backend::{CaptureBackend, FilterGraph, UnavailableBackend};
pub use bitmap::{Bitmap, SharedBitmap};
pub use device::{device_handles, DeviceHandle};
pub use enumerate::{default_backend, find_device, list_devices};
pub use error::CaptureError;
pub use frame::{frame_buffer, FrameReader, FrameWriter};
pub use framerate::{frames_per_second, FramerateCounter};
#[cfg(windows)]
pub use mf::MediaFoundationBackend;
pub use sink::{FrameNotice, FrameSink, SinkReceivers, FRAME_NOTICE_CAPACITY};

pub use camview_ipc::{CaptureConfig, DeviceDescriptor, DeviceEvent, FrameFormat, PixelFormat};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
