//! A software capture backend producing a moving test pattern.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, RecvTimeoutError};
use parking_lot::RwLock;
use tracing::{debug, info};

use camview_ipc::{DeviceDescriptor, FrameFormat, PixelFormat, BYTES_PER_PIXEL};

use crate::backend::{CaptureBackend, FilterGraph};
use crate::error::CaptureError;
use crate::sink::FrameSink;
use crate::CaptureResult;

/// A fake camera.
#[derive(Debug, Clone)]
pub struct SyntheticDevice {
    pub descriptor: DeviceDescriptor,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bottom_up: bool,
    /// Make negotiation fail, as a busy or codec-less device would.
    pub fail_negotiation: bool,
}

impl SyntheticDevice {
    /// A 640x480 device at 30 frames per second.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            descriptor: DeviceDescriptor::new(name, id),
            width: 640,
            height: 480,
            fps: 30,
            bottom_up: false,
            fail_negotiation: false,
        }
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn bottom_up(mut self, bottom_up: bool) -> Self {
        self.bottom_up = bottom_up;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_negotiation = true;
        self
    }
}

/// Pixel value of the test pattern at column `x`, row `y` of frame `frame`.
pub fn pattern_pixel(x: u32, y: u32, frame: u64) -> [u8; 4] {
    [x as u8, y as u8, frame as u8, 0xFF]
}

/// Backend serving [`SyntheticDevice`]s.
///
/// Devices can be added, removed or reconfigured at any time; each
/// enumeration and each new graph sees the current set. Removing a device
/// while it streams behaves like unplugging it.
#[derive(Debug, Default)]
pub struct SyntheticBackend {
    devices: Arc<RwLock<Vec<SyntheticDevice>>>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device: SyntheticDevice) -> Self {
        self.add_device(device);
        self
    }

    pub fn add_device(&self, device: SyntheticDevice) {
        self.devices.write().push(device);
    }

    pub fn remove_device(&self, device_id: &str) {
        self.devices.write().retain(|d| d.descriptor.id != device_id);
    }

    /// Change the resolution a device negotiates on its next session.
    pub fn set_resolution(&self, device_id: &str, width: u32, height: u32) -> CaptureResult<()> {
        let mut devices = self.devices.write();
        let device = devices
            .iter_mut()
            .find(|d| d.descriptor.id == device_id)
            .ok_or_else(|| CaptureError::DeviceNotFound(device_id.to_string()))?;
        device.width = width;
        device.height = height;
        Ok(())
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        Ok(self
            .devices
            .read()
            .iter()
            .map(|d| d.descriptor.clone())
            .collect())
    }

    fn open_graph(&self, device_id: &str) -> CaptureResult<Box<dyn FilterGraph>> {
        let device = self
            .devices
            .read()
            .iter()
            .find(|d| d.descriptor.id == device_id)
            .cloned()
            .ok_or_else(|| CaptureError::DeviceNotFound(device_id.to_string()))?;

        Ok(Box::new(SyntheticGraph {
            device,
            plugged: Arc::clone(&self.devices),
            format: None,
            sink: None,
            pipeline: None,
        }))
    }
}

struct SyntheticGraph {
    device: SyntheticDevice,
    plugged: Arc<RwLock<Vec<SyntheticDevice>>>,
    format: Option<FrameFormat>,
    sink: Option<Arc<FrameSink>>,
    pipeline: Option<(Sender<()>, JoinHandle<()>)>,
}

impl FilterGraph for SyntheticGraph {
    fn connect(&mut self, requested: PixelFormat) -> CaptureResult<FrameFormat> {
        if self.device.fail_negotiation {
            return Err(CaptureError::Negotiation(format!(
                "{} refused every media type",
                self.device.descriptor.id
            )));
        }

        let format = FrameFormat {
            width: self.device.width,
            height: self.device.height,
            pixel_format: requested,
            bottom_up: self.device.bottom_up,
        };
        if format.is_empty() {
            return Err(CaptureError::Negotiation("zero-sized frame".to_string()));
        }

        debug!(width = format.width, height = format.height, "Synthetic format negotiated");
        self.format = Some(format);
        Ok(format)
    }

    fn set_callback(&mut self, sink: Arc<FrameSink>) -> CaptureResult<()> {
        self.sink = Some(sink);
        Ok(())
    }

    fn run(&mut self) -> CaptureResult<()> {
        let format = self
            .format
            .ok_or_else(|| CaptureError::Pipeline("graph not connected".to_string()))?;
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| CaptureError::Pipeline("no callback registered".to_string()))?;

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let interval = Duration::from_secs(1) / self.device.fps.max(1);
        let device_id = self.device.descriptor.id.clone();
        let plugged = Arc::clone(&self.plugged);

        let handle = thread::Builder::new()
            .name("synthetic-pipeline".to_string())
            .spawn(move || {
                let start = Instant::now();
                let mut frame = vec![0u8; format.frame_len()];
                let mut index = 0u64;

                loop {
                    if !plugged.read().iter().any(|d| d.descriptor.id == device_id) {
                        sink.pipeline_failed(format!("{device_id} was disconnected"));
                        break;
                    }

                    render_pattern(&mut frame, format, index);
                    let sample_time = start.elapsed().as_secs_f64();
                    sink.sample_cb(sample_time);
                    sink.buffer_cb(sample_time, &frame);
                    index += 1;

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                debug!(frames = index, "Synthetic pipeline exiting");
            })?;

        info!(device = %self.device.descriptor.id, "Synthetic pipeline running");
        self.pipeline = Some((stop_tx, handle));
        Ok(())
    }

    fn stop(&mut self) -> CaptureResult<()> {
        if let Some((stop_tx, handle)) = self.pipeline.take() {
            drop(stop_tx);
            handle
                .join()
                .map_err(|_| CaptureError::Pipeline("synthetic pipeline panicked".to_string()))?;
        }
        self.sink = None;
        Ok(())
    }
}

impl Drop for SyntheticGraph {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn render_pattern(frame: &mut [u8], format: FrameFormat, index: u64) {
    let width = format.width as usize;
    let height = format.height as usize;

    for (row, line) in frame.chunks_exact_mut(format.stride()).enumerate() {
        // Keep the image upright for bottom-up consumers.
        let y = if format.bottom_up { height - 1 - row } else { row };
        for (x, px) in line.chunks_exact_mut(BYTES_PER_PIXEL).take(width).enumerate() {
            px.copy_from_slice(&pattern_pixel(x as u32, y as u32, index));
        }
    }
}
