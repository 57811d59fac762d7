//! Capture backend and graph traits.

use std::sync::Arc;

use camview_ipc::{DeviceDescriptor, FrameFormat, PixelFormat};

use crate::error::CaptureError;
use crate::sink::FrameSink;
use crate::CaptureResult;

/// A source of capture devices.
pub trait CaptureBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Snapshot of the devices present right now, in OS order.
    fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>>;

    /// Open a graph for one device.
    ///
    /// Called on the device worker thread; the graph never leaves it.
    fn open_graph(&self, device_id: &str) -> CaptureResult<Box<dyn FilterGraph>>;
}

/// A source → grabber → sink pipeline for one device.
///
/// Calls arrive in order: `connect`, `render`, `set_callback`, `run`, then
/// `stop` once. Dropping the graph releases it; no callback may run after
/// `stop` returns or the graph is dropped.
pub trait FilterGraph {
    /// Connect the device output to the grabber, requesting `requested`,
    /// and return the negotiated format.
    fn connect(&mut self, requested: PixelFormat) -> CaptureResult<FrameFormat>;

    /// Route the grabber output to a default renderer with any native
    /// preview window kept hidden.
    ///
    /// Pipelines that pull frames without a renderer stage (the Media
    /// Foundation source reader, the synthetic pattern) have nothing to do
    /// here and keep the default.
    fn render(&mut self) -> CaptureResult<()> {
        Ok(())
    }

    /// Register the per-frame callback.
    fn set_callback(&mut self, sink: Arc<FrameSink>) -> CaptureResult<()>;

    /// Start streaming.
    fn run(&mut self) -> CaptureResult<()>;

    /// Stop streaming.
    fn stop(&mut self) -> CaptureResult<()>;
}

/// Backend for platforms without a native capture API.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

impl CaptureBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        Err(CaptureError::NotSupported)
    }

    fn open_graph(&self, _device_id: &str) -> CaptureResult<Box<dyn FilterGraph>> {
        Err(CaptureError::NotSupported)
    }
}
