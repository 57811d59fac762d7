//! The display surface.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use camview_capture::{Bitmap, DeviceHandle, SharedBitmap};
use camview_ipc::{DeviceEvent, Rotation, SurfaceConfig};

use crate::error::SurfaceError;
use crate::SurfaceResult;

/// What the surface currently shows.
#[derive(Debug, Default)]
struct SurfaceView {
    source: Option<SharedBitmap>,
    framerate: u32,
    frames_rendered: u64,
    last_error: Option<String>,
}

struct Binding {
    device: Arc<DeviceHandle>,
    detach: Sender<()>,
    render: JoinHandle<()>,
}

impl Binding {
    /// Stop the device, then wind down the render thread.
    fn release(self) {
        self.device.stop();
        drop(self.detach);
        if self.render.join().is_err() {
            warn!("Render thread panicked");
        }
    }
}

/// Shows the live bitmap of one bound device.
pub struct DisplaySurface {
    config: RwLock<SurfaceConfig>,
    view: Arc<RwLock<SurfaceView>>,
    captured: Mutex<Option<Bitmap>>,
    binding: Mutex<Option<Binding>>,
}

impl DisplaySurface {
    pub fn new() -> Self {
        Self::with_config(SurfaceConfig::default())
    }

    pub fn with_config(config: SurfaceConfig) -> Self {
        Self {
            config: RwLock::new(config),
            view: Arc::new(RwLock::new(SurfaceView::default())),
            captured: Mutex::new(None),
            binding: Mutex::new(None),
        }
    }

    /// Bind a device, or unbind with `None`.
    ///
    /// The previously bound device is stopped and unsubscribed; the new one
    /// is subscribed to and started.
    #[instrument(name = "surface_set_device", skip_all, fields(device = device.as_ref().map(|d| d.id().to_string())))]
    pub fn set_device(&self, device: Option<Arc<DeviceHandle>>) -> SurfaceResult<()> {
        let mut binding = self.binding.lock();

        if let Some(previous) = binding.take() {
            debug!(device = %previous.device.id(), "Releasing previous device");
            previous.release();
        }
        *self.view.write() = SurfaceView::default();

        let Some(device) = device else {
            return Ok(());
        };

        let events = device.subscribe();
        let (detach, detach_rx) = crossbeam_channel::bounded::<()>(0);
        let render_device = Arc::clone(&device);
        let view = Arc::clone(&self.view);

        let render = thread::Builder::new()
            .name("surface-render".to_string())
            .spawn(move || render_loop(render_device, events, detach_rx, view))
            .map_err(SurfaceError::RenderSpawn)?;

        let bound = Binding {
            device: Arc::clone(&device),
            detach,
            render,
        };

        if let Err(e) = device.start() {
            bound.release();
            return Err(e.into());
        }

        info!(device = %device.id(), name = %device.name(), "Device bound");
        *binding = Some(bound);
        Ok(())
    }

    /// The bound device.
    pub fn device(&self) -> Option<Arc<DeviceHandle>> {
        self.binding.lock().as_ref().map(|b| Arc::clone(&b.device))
    }

    /// The live bitmap being shown.
    pub fn source(&self) -> Option<SharedBitmap> {
        self.view.read().source.clone()
    }

    /// Snapshot of the shown frame with the surface rotation applied.
    pub fn current_bitmap(&self) -> Option<Bitmap> {
        let source = self.source()?;
        let rotation = self.rotation();
        Some(source.snapshot().rotated(rotation))
    }

    /// Grab the shown frame as a still, mirrored horizontally when asked.
    ///
    /// The still is also kept as [`DisplaySurface::captured`].
    pub fn grab_still(&self, mirror: bool) -> SurfaceResult<Bitmap> {
        let current = self.current_bitmap().ok_or(SurfaceError::NoFrame)?;
        let still = if mirror { current.mirrored() } else { current };

        debug!(width = still.width(), height = still.height(), mirror, "Still grabbed");
        *self.captured.lock() = Some(still.clone());
        Ok(still)
    }

    /// Grab a still using the configured mirroring.
    pub fn capture_still(&self) -> SurfaceResult<Bitmap> {
        let mirror = self.config.read().mirror_stills;
        self.grab_still(mirror)
    }

    /// The last grabbed still.
    pub fn captured(&self) -> Option<Bitmap> {
        self.captured.lock().clone()
    }

    pub fn framerate(&self) -> u32 {
        self.view.read().framerate
    }

    /// Frames shown since the device was bound.
    pub fn frames_rendered(&self) -> u64 {
        self.view.read().frames_rendered
    }

    /// The last error the bound device reported.
    pub fn last_error(&self) -> Option<String> {
        self.view.read().last_error.clone()
    }

    pub fn rotation(&self) -> Rotation {
        self.config.read().rotation
    }

    pub fn set_rotation(&self, rotation: Rotation) {
        debug!(degrees = rotation.degrees(), "Surface rotation set");
        self.config.write().rotation = rotation;
    }
}

impl Default for DisplaySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DisplaySurface {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.lock().take() {
            binding.release();
        }
    }
}

fn render_loop(
    device: Arc<DeviceHandle>,
    events: Receiver<DeviceEvent>,
    detach: Receiver<()>,
    view: Arc<RwLock<SurfaceView>>,
) {
    loop {
        crossbeam_channel::select! {
            recv(detach) -> _ => break,
            recv(events) -> event => match event {
                Ok(event) => apply(&device, &view, event),
                Err(_) => break,
            },
        }
    }
    debug!(device = %device.id(), "Render loop exiting");
}

fn apply(device: &DeviceHandle, view: &RwLock<SurfaceView>, event: DeviceEvent) {
    match event {
        DeviceEvent::Started => {
            view.write().last_error = None;
        }
        DeviceEvent::BitmapReady { width, height } => {
            debug!(width, height, "Binding new bitmap");
            view.write().source = device.bitmap();
        }
        DeviceEvent::FrameReady { .. } => {
            view.write().frames_rendered += 1;
        }
        DeviceEvent::FramerateChanged { fps } => {
            view.write().framerate = fps;
        }
        DeviceEvent::Error { message } => {
            warn!(device = %device.id(), "Device reported an error: {}", message);
            view.write().last_error = Some(message);
        }
        DeviceEvent::Stopped => {
            let mut view = view.write();
            view.source = None;
            view.framerate = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camview_capture::synthetic::{pattern_pixel, SyntheticBackend, SyntheticDevice};
    use camview_capture::CaptureBackend;
    use std::time::{Duration, Instant};

    fn eventually(what: &str, check: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn backend() -> Arc<dyn CaptureBackend> {
        Arc::new(
            SyntheticBackend::new()
                .with_device(SyntheticDevice::new("front", "Front").resolution(12, 6).fps(100))
                .with_device(SyntheticDevice::new("back", "Back").resolution(6, 4).fps(100))
                .with_device(SyntheticDevice::new("broken", "Broken").failing()),
        )
    }

    #[test]
    fn test_bound_device_renders_frames() {
        let backend = backend();
        let surface = DisplaySurface::new();
        let device = Arc::new(DeviceHandle::new(backend, "front"));

        surface.set_device(Some(Arc::clone(&device))).unwrap();
        eventually("frames", || surface.frames_rendered() > 0);

        assert!(device.is_running());
        let bitmap = surface.current_bitmap().unwrap();
        assert_eq!((bitmap.width(), bitmap.height()), (12, 6));
    }

    #[test]
    fn test_grab_still_mirrors() {
        let surface = DisplaySurface::new();
        surface
            .set_device(Some(Arc::new(DeviceHandle::new(backend(), "front"))))
            .unwrap();
        eventually("frames", || surface.frames_rendered() > 0);

        let still = surface.grab_still(true).unwrap();
        let frame = still.pixel(0, 0).unwrap()[2] as u64;
        for y in 0..still.height() {
            for x in 0..still.width() {
                assert_eq!(
                    still.pixel(x, y),
                    Some(pattern_pixel(still.width() - 1 - x, y, frame))
                );
            }
        }
        assert_eq!(surface.captured(), Some(still));
    }

    #[test]
    fn test_rotation_applies_to_current_bitmap() {
        let surface = DisplaySurface::with_config(SurfaceConfig {
            rotation: Rotation::Clockwise90,
            mirror_stills: false,
        });
        surface
            .set_device(Some(Arc::new(DeviceHandle::new(backend(), "front"))))
            .unwrap();
        eventually("frames", || surface.frames_rendered() > 0);

        let rotated = surface.capture_still().unwrap();
        assert_eq!((rotated.width(), rotated.height()), (6, 12));

        surface.set_rotation(Rotation::None);
        let upright = surface.current_bitmap().unwrap();
        assert_eq!((upright.width(), upright.height()), (12, 6));
    }

    #[test]
    fn test_switching_devices_stops_previous() {
        let backend = backend();
        let surface = DisplaySurface::new();
        let front = Arc::new(DeviceHandle::new(Arc::clone(&backend), "front"));
        let back = Arc::new(DeviceHandle::new(backend, "back"));

        surface.set_device(Some(Arc::clone(&front))).unwrap();
        eventually("front frames", || surface.frames_rendered() > 0);

        surface.set_device(Some(Arc::clone(&back))).unwrap();
        assert!(!front.is_running());
        assert!(back.is_running());
        assert_eq!(surface.device().unwrap().id(), "back");

        eventually("back bitmap", || {
            surface
                .current_bitmap()
                .is_some_and(|b| (b.width(), b.height()) == (6, 4))
        });
    }

    #[test]
    fn test_unbind_clears_view() {
        let surface = DisplaySurface::new();
        let device = Arc::new(DeviceHandle::new(backend(), "front"));
        surface.set_device(Some(Arc::clone(&device))).unwrap();
        eventually("frames", || surface.frames_rendered() > 0);

        surface.set_device(None).unwrap();

        assert!(!device.is_running());
        assert!(surface.device().is_none());
        assert!(surface.source().is_none());
        assert_eq!(surface.frames_rendered(), 0);
        assert!(matches!(surface.grab_still(false), Err(SurfaceError::NoFrame)));
    }

    #[test]
    fn test_failing_device_reports_error_without_frames() {
        let surface = DisplaySurface::new();
        surface
            .set_device(Some(Arc::new(DeviceHandle::new(backend(), "broken"))))
            .unwrap();

        eventually("error", || surface.last_error().is_some());
        assert!(surface.current_bitmap().is_none());
        assert_eq!(surface.framerate(), 0);
    }
}
