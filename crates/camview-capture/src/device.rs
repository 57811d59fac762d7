//! Device handles: one capture session per device.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, info_span, instrument, trace, warn};

use camview_ipc::{CaptureConfig, DeviceDescriptor, DeviceEvent, FrameFormat};

use crate::backend::{CaptureBackend, FilterGraph};
use crate::bitmap::SharedBitmap;
use crate::enumerate::{find_device, list_devices};
use crate::error::CaptureError;
use crate::frame::frame_buffer;
use crate::framerate::FramerateCounter;
use crate::observers::Observers;
use crate::sink::{FrameNotice, FrameSink};
use crate::CaptureResult;

/// A capture device and its (at most one) running session.
///
/// `start` spawns a dedicated worker thread that owns the capture graph;
/// `stop` cancels it and waits for teardown. Dropping the handle stops it.
pub struct DeviceHandle {
    descriptor: DeviceDescriptor,
    backend: Arc<dyn CaptureBackend>,
    config: CaptureConfig,
    state: Arc<DeviceState>,
    worker: Mutex<Option<Worker>>,
}

/// State the worker publishes for readers on other threads.
struct DeviceState {
    format: RwLock<Option<FrameFormat>>,
    bitmap: RwLock<Option<SharedBitmap>>,
    framerate: AtomicU32,
    observers: Observers,
}

struct Worker {
    cancel: Sender<()>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn shutdown(self) {
        drop(self.cancel);
        if self.thread.join().is_err() {
            warn!("Capture worker panicked");
        }
    }
}

struct WorkerContext {
    device_id: String,
    backend: Arc<dyn CaptureBackend>,
    config: CaptureConfig,
    state: Arc<DeviceState>,
}

impl DeviceHandle {
    /// Create a handle for a device identifier.
    ///
    /// The display name is looked up by enumeration; an identifier that is
    /// not currently present gets an empty name.
    pub fn new(backend: Arc<dyn CaptureBackend>, device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        let name = find_device(backend.as_ref(), &device_id)
            .map(|d| d.name)
            .unwrap_or_default();
        Self::from_descriptor(backend, DeviceDescriptor::new(name, device_id))
    }

    /// Create a handle for an enumerated device.
    pub fn from_descriptor(backend: Arc<dyn CaptureBackend>, descriptor: DeviceDescriptor) -> Self {
        Self::with_config(backend, descriptor, CaptureConfig::default())
    }

    /// Create a handle with an explicit configuration.
    pub fn with_config(
        backend: Arc<dyn CaptureBackend>,
        descriptor: DeviceDescriptor,
        config: CaptureConfig,
    ) -> Self {
        let state = Arc::new(DeviceState {
            format: RwLock::new(None),
            bitmap: RwLock::new(None),
            framerate: AtomicU32::new(0),
            observers: Observers::new(config.event_capacity),
        });

        Self {
            descriptor,
            backend,
            config,
            state,
            worker: Mutex::new(None),
        }
    }

    /// Open the first enumerated device.
    pub fn default_device(backend: Arc<dyn CaptureBackend>) -> CaptureResult<Self> {
        let descriptor = list_devices(backend.as_ref())
            .into_iter()
            .next()
            .ok_or(CaptureError::NoDevices)?;
        Ok(Self::from_descriptor(backend, descriptor))
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Display name (empty when the device was not found at construction).
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Negotiated format of the running session.
    pub fn format(&self) -> Option<FrameFormat> {
        *self.state.format.read()
    }

    /// Last published framerate estimate.
    pub fn framerate(&self) -> u32 {
        self.state.framerate.load(Ordering::Relaxed)
    }

    /// The bitmap backed by the running session's frame buffer.
    pub fn bitmap(&self) -> Option<SharedBitmap> {
        self.state.bitmap.read().clone()
    }

    /// Whether a worker is running (whether or not frames are arriving).
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Receive this device's events.
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        self.state.observers.subscribe()
    }

    /// Start capturing, replacing any running session.
    ///
    /// Graph errors do not surface here: they are logged and reported as
    /// [`DeviceEvent::Error`], and the worker keeps running without frames.
    #[instrument(name = "device_start", skip(self), fields(device = %self.descriptor.id))]
    pub fn start(&self) -> CaptureResult<()> {
        let mut worker = self.worker.lock();
        if let Some(previous) = worker.take() {
            debug!("Stopping previous session");
            previous.shutdown();
            self.state.release();
        }

        info!("Starting capture");

        let (cancel, cancel_rx) = crossbeam_channel::bounded::<()>(0);
        let ctx = WorkerContext {
            device_id: self.descriptor.id.clone(),
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        };

        let thread = thread::Builder::new()
            .name("capture-worker".to_string())
            .spawn(move || run_worker(ctx, cancel_rx))?;

        *worker = Some(Worker { cancel, thread });
        Ok(())
    }

    /// Stop capturing and wait for the worker to tear down.
    ///
    /// A no-op when not running.
    #[instrument(name = "device_stop", skip(self), fields(device = %self.descriptor.id))]
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        info!("Stopping capture");
        worker.shutdown();
        self.state.release();
        info!("Capture stopped");
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("descriptor", &self.descriptor)
            .field("backend", &self.backend.name())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One handle per enumerated device.
pub fn device_handles(backend: &Arc<dyn CaptureBackend>) -> Vec<DeviceHandle> {
    list_devices(backend.as_ref())
        .into_iter()
        .map(|descriptor| DeviceHandle::from_descriptor(Arc::clone(backend), descriptor))
        .collect()
}

impl DeviceState {
    /// Size a new frame buffer for `format` and publish a bitmap over it.
    fn reconfigure(&self, format: FrameFormat, sink: &FrameSink) {
        let (writer, reader) = frame_buffer(format);
        debug!(
            width = format.width,
            height = format.height,
            bytes = writer.len(),
            "Allocated frame buffer"
        );

        sink.attach(writer);
        *self.bitmap.write() = Some(SharedBitmap::new(reader));
        *self.format.write() = Some(format);

        self.observers.notify(DeviceEvent::BitmapReady {
            width: format.width,
            height: format.height,
        });
    }

    /// Pull the newest frame into the bitmap and advance the framerate.
    ///
    /// Every frame published since the last presentation counts toward the
    /// framerate, including frames whose notices were coalesced.
    fn present(&self, notice: FrameNotice, framerate: &mut FramerateCounter) {
        let Some(bitmap) = self.bitmap.read().clone() else {
            return;
        };

        let shown = bitmap.sequence();
        let frames = if bitmap.invalidate() {
            let sequence = bitmap.sequence();
            trace!(sequence, skipped = sequence.saturating_sub(shown + 1), "Frame presented");
            self.observers.notify(DeviceEvent::FrameReady { sequence });
            sequence.saturating_sub(shown)
        } else {
            trace!(notice = notice.sequence, shown, "Frame already presented");
            0
        };

        if let Some(fps) = framerate.record_frames(notice.arrived, frames) {
            self.framerate.store(fps, Ordering::Relaxed);
            debug!(fps, "Framerate updated");
            self.observers.notify(DeviceEvent::FramerateChanged { fps });
        }
    }

    fn release(&self) {
        *self.bitmap.write() = None;
        *self.format.write() = None;
        self.framerate.store(0, Ordering::Relaxed);
    }
}

fn run_worker(ctx: WorkerContext, cancel: Receiver<()>) {
    let span = info_span!("capture_worker", device = %ctx.device_id, backend = ctx.backend.name());
    let _enter = span.enter();

    ctx.state.observers.notify(DeviceEvent::Started);

    let (sink, receivers) = FrameSink::new();
    let sink = Arc::new(sink);

    let graph = match build_graph(&ctx, &sink) {
        Ok(graph) => Some(graph),
        Err(e) => {
            warn!("Capture graph failed: {}", e);
            ctx.state.observers.notify(DeviceEvent::Error {
                message: e.to_string(),
            });
            None
        }
    };

    let mut framerate = FramerateCounter::new(Instant::now(), ctx.config.framerate_window());

    loop {
        crossbeam_channel::select! {
            recv(cancel) -> _ => break,
            recv(receivers.notices) -> notice => match notice {
                Ok(notice) => ctx.state.present(notice, &mut framerate),
                Err(_) => {
                    let _ = cancel.recv();
                    break;
                }
            },
            recv(receivers.failures) -> failure => {
                if let Ok(message) = failure {
                    // No reconnection: the session stays up without frames
                    // until stopped.
                    warn!("Capture pipeline failed: {}", message);
                    ctx.state.observers.notify(DeviceEvent::Error { message });
                }
            },
        }
    }

    if let Some(mut graph) = graph {
        if let Err(e) = graph.stop() {
            debug!("Graph stop failed: {}", e);
        }
        drop(graph);
    }
    sink.detach();
    ctx.state.release();

    ctx.state.observers.notify(DeviceEvent::Stopped);
    debug!("Capture worker exiting");
}

#[instrument(name = "build_graph", skip_all)]
fn build_graph(ctx: &WorkerContext, sink: &Arc<FrameSink>) -> CaptureResult<Box<dyn FilterGraph>> {
    let mut graph = ctx.backend.open_graph(&ctx.device_id)?;

    let format = graph.connect(ctx.config.pixel_format)?;
    if format.is_empty() {
        return Err(CaptureError::Negotiation(format!(
            "negotiated an empty frame ({}x{})",
            format.width, format.height
        )));
    }
    info!(
        width = format.width,
        height = format.height,
        bottom_up = format.bottom_up,
        "Format negotiated"
    );

    ctx.state.reconfigure(format, sink);

    graph.render()?;
    graph.set_callback(Arc::clone(sink))?;
    graph.run()?;

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::FRAME_NOTICE_CAPACITY;
    use crate::synthetic::{pattern_pixel, SyntheticBackend, SyntheticDevice};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn wait_for(rx: &Receiver<DeviceEvent>, pred: impl Fn(&DeviceEvent) -> bool) -> DeviceEvent {
        loop {
            let event = rx
                .recv_timeout(TIMEOUT)
                .expect("timed out waiting for device event");
            if pred(&event) {
                return event;
            }
        }
    }

    fn backend_with(device: SyntheticDevice) -> Arc<SyntheticBackend> {
        Arc::new(SyntheticBackend::new().with_device(device))
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let handle = DeviceHandle::new(backend_with(SyntheticDevice::new("cam", "Cam")), "cam");
        handle.stop();
        handle.stop();
        assert!(!handle.is_running());
        assert!(handle.bitmap().is_none());
    }

    #[test]
    fn test_unknown_id_has_empty_name() {
        let handle = DeviceHandle::new(Arc::new(SyntheticBackend::new()), "nowhere");
        assert_eq!(handle.name(), "");
        assert_eq!(handle.id(), "nowhere");

        let events = handle.subscribe();
        handle.start().unwrap();
        let event = wait_for(&events, |e| matches!(e, DeviceEvent::Error { .. }));
        assert!(matches!(event, DeviceEvent::Error { message } if message.contains("nowhere")));
        assert!(handle.is_running());
        handle.stop();
    }

    #[test]
    fn test_known_id_resolves_name() {
        let handle = DeviceHandle::new(backend_with(SyntheticDevice::new("cam", "Desk camera")), "cam");
        assert_eq!(handle.name(), "Desk camera");
    }

    #[test]
    fn test_zero_devices() {
        let backend: Arc<dyn CaptureBackend> = Arc::new(SyntheticBackend::new());
        assert!(device_handles(&backend).is_empty());
        assert!(matches!(
            DeviceHandle::default_device(backend),
            Err(CaptureError::NoDevices)
        ));
    }

    #[test]
    fn test_frames_reach_bitmap() {
        let handle = DeviceHandle::new(
            backend_with(SyntheticDevice::new("cam", "Cam").resolution(16, 8).fps(200)),
            "cam",
        );
        let events = handle.subscribe();
        handle.start().unwrap();

        assert_eq!(events.recv_timeout(TIMEOUT).unwrap(), DeviceEvent::Started);
        assert_eq!(
            wait_for(&events, |e| matches!(e, DeviceEvent::BitmapReady { .. })),
            DeviceEvent::BitmapReady { width: 16, height: 8 }
        );
        wait_for(&events, DeviceEvent::is_frame);

        let bitmap = handle.bitmap().unwrap();
        assert_eq!(handle.format(), Some(FrameFormat::bgr32(16, 8)));
        assert_eq!(bitmap.byte_len(), 16 * 8 * 4);

        let still = bitmap.snapshot();
        let frame = still.pixel(0, 0).unwrap()[2];
        assert_eq!(still.pixel(15, 7), Some(pattern_pixel(15, 7, frame as u64)));

        handle.stop();
    }

    #[test]
    fn test_start_stop_releases_everything() {
        let handle = DeviceHandle::new(
            backend_with(SyntheticDevice::new("cam", "Cam").resolution(32, 32).fps(100)),
            "cam",
        );
        let events = handle.subscribe();

        for _ in 0..3 {
            handle.start().unwrap();
            wait_for(&events, |e| matches!(e, DeviceEvent::BitmapReady { .. }));
            let weak = handle.bitmap().unwrap().downgrade();

            handle.stop();

            assert!(!handle.is_running());
            assert!(handle.bitmap().is_none());
            assert!(handle.format().is_none());
            assert_eq!(handle.framerate(), 0);
            assert!(weak.upgrade().is_none());
            wait_for(&events, |e| *e == DeviceEvent::Stopped);
        }
    }

    #[test]
    fn test_renegotiation_reallocates_buffer() {
        let backend = backend_with(SyntheticDevice::new("cam", "Cam").fps(60));
        let handle = DeviceHandle::new(backend.clone(), "cam");
        let events = handle.subscribe();

        handle.start().unwrap();
        wait_for(&events, |e| matches!(e, DeviceEvent::BitmapReady { .. }));
        let first = handle.bitmap().unwrap();
        assert_eq!(first.byte_len(), 640 * 480 * 4);
        let old = first.downgrade();
        drop(first);

        backend.set_resolution("cam", 320, 240).unwrap();
        handle.start().unwrap();
        assert_eq!(
            wait_for(&events, |e| matches!(e, DeviceEvent::BitmapReady { .. })),
            DeviceEvent::BitmapReady { width: 320, height: 240 }
        );
        assert_eq!(handle.bitmap().unwrap().byte_len(), 320 * 240 * 4);
        assert!(old.upgrade().is_none());

        handle.stop();
    }

    #[test]
    fn test_negotiation_failure_keeps_worker_alive() {
        let handle = DeviceHandle::new(backend_with(SyntheticDevice::new("cam", "Cam").failing()), "cam");
        let events = handle.subscribe();

        handle.start().unwrap();
        wait_for(&events, |e| matches!(e, DeviceEvent::Error { .. }));

        assert!(handle.is_running());
        assert!(handle.bitmap().is_none());
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());

        handle.stop();
        assert_eq!(events.recv_timeout(TIMEOUT).unwrap(), DeviceEvent::Stopped);
    }

    #[test]
    fn test_restart_replaces_worker() {
        let handle = DeviceHandle::new(
            backend_with(SyntheticDevice::new("cam", "Cam").resolution(8, 8).fps(100)),
            "cam",
        );
        let events = handle.subscribe();

        handle.start().unwrap();
        wait_for(&events, |e| matches!(e, DeviceEvent::BitmapReady { .. }));
        handle.start().unwrap();

        // The old worker is gone before the new one starts.
        wait_for(&events, |e| *e == DeviceEvent::Stopped);
        assert_eq!(
            wait_for(&events, |e| !e.is_frame()),
            DeviceEvent::Started
        );
        wait_for(&events, DeviceEvent::is_frame);
        assert!(handle.is_running());

        handle.stop();
    }

    #[test]
    fn test_framerate_is_published() {
        let backend = backend_with(SyntheticDevice::new("cam", "Cam").resolution(8, 8).fps(100));
        let config = CaptureConfig {
            framerate_window_ms: 100,
            ..Default::default()
        };
        let descriptor = list_devices(backend.as_ref()).remove(0);
        let handle = DeviceHandle::with_config(backend, descriptor, config);
        let events = handle.subscribe();

        handle.start().unwrap();
        let event = wait_for(&events, |e| matches!(e, DeviceEvent::FramerateChanged { .. }));
        let DeviceEvent::FramerateChanged { fps } = event else {
            unreachable!()
        };
        assert!(fps > 0);
        assert_eq!(handle.framerate(), fps);

        handle.stop();
    }

    #[test]
    fn test_drop_stops_worker() {
        let handle = DeviceHandle::new(backend_with(SyntheticDevice::new("cam", "Cam").fps(100)), "cam");
        let events = handle.subscribe();
        handle.start().unwrap();
        wait_for(&events, |e| matches!(e, DeviceEvent::BitmapReady { .. }));

        drop(handle);
        wait_for(&events, |e| *e == DeviceEvent::Stopped);
    }

    #[test]
    fn test_framerate_counts_coalesced_frames() {
        let state = DeviceState {
            format: RwLock::new(None),
            bitmap: RwLock::new(None),
            framerate: AtomicU32::new(0),
            observers: Observers::new(16),
        };
        let events = state.observers.subscribe();
        let (sink, receivers) = FrameSink::new();
        state.reconfigure(FrameFormat::bgr32(2, 2), &sink);

        // More frames than the notice channel holds, before the worker drains it.
        for i in 0..10u8 {
            sink.buffer_cb(0.0, &[i; 16]);
        }

        let start = Instant::now();
        let mut framerate = FramerateCounter::new(start, Duration::from_millis(1000));
        let mut notices = 0;
        while let Ok(notice) = receivers.notices.try_recv() {
            state.present(FrameNotice { arrived: start, ..notice }, &mut framerate);
            notices += 1;
        }

        assert_eq!(notices, FRAME_NOTICE_CAPACITY);
        assert_eq!(
            framerate.record_frames(start + Duration::from_millis(1000), 0),
            Some(10)
        );

        assert!(matches!(events.try_recv().unwrap(), DeviceEvent::BitmapReady { .. }));
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::FrameReady { sequence: 10 });
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_unplugged_device_reports_error() {
        let backend = backend_with(SyntheticDevice::new("cam", "Cam").resolution(8, 8).fps(100));
        let handle = DeviceHandle::new(backend.clone(), "cam");
        let events = handle.subscribe();

        handle.start().unwrap();
        wait_for(&events, DeviceEvent::is_frame);

        backend.remove_device("cam");
        let event = wait_for(&events, |e| matches!(e, DeviceEvent::Error { .. }));
        assert!(matches!(event, DeviceEvent::Error { message } if message.contains("disconnected")));
        assert!(handle.is_running());
        assert!(list_devices(backend.as_ref()).is_empty());

        handle.stop();
        wait_for(&events, |e| *e == DeviceEvent::Stopped);
    }

    #[test]
    fn test_stop_does_not_wait_for_next_frame() {
        let handle = DeviceHandle::new(
            backend_with(SyntheticDevice::new("cam", "Cam").resolution(4, 4).fps(1)),
            "cam",
        );
        let events = handle.subscribe();
        handle.start().unwrap();
        wait_for(&events, DeviceEvent::is_frame);

        let begun = Instant::now();
        handle.stop();

        assert!(begun.elapsed() < Duration::from_millis(500));
        assert!(!handle.is_running());
    }
}
