//! Media Foundation capture backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, instrument, trace, warn};
use windows::core::{GUID, HSTRING, PWSTR};
use windows::Win32::Media::MediaFoundation::{
    IMFActivate, IMFAttributes, IMFMediaSource, IMFMediaType, IMFSample, IMFSourceReader,
    MFCreateAttributes, MFCreateDeviceSource, MFCreateMediaType,
    MFCreateSourceReaderFromMediaSource, MFEnumDeviceSources, MFMediaType_Video, MFStartup,
    MFVideoFormat_RGB32, MFSTARTUP_NOSOCKET, MF_DEVSOURCE_ATTRIBUTE_FRIENDLY_NAME,
    MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE, MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE_VIDCAP_GUID,
    MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE_VIDCAP_SYMBOLIC_LINK, MF_MT_DEFAULT_STRIDE,
    MF_MT_FRAME_SIZE, MF_MT_MAJOR_TYPE, MF_MT_SUBTYPE, MF_SOURCE_READERF_ENDOFSTREAM,
    MF_SOURCE_READERF_ERROR, MF_SOURCE_READER_ENABLE_VIDEO_PROCESSING,
    MF_SOURCE_READER_FIRST_VIDEO_STREAM, MF_VERSION,
};
use windows::Win32::System::Com::{CoInitializeEx, CoTaskMemFree, COINIT_MULTITHREADED};

use camview_ipc::{DeviceDescriptor, FrameFormat, PixelFormat};

use crate::backend::{CaptureBackend, FilterGraph};
use crate::error::CaptureError;
use crate::sink::FrameSink;
use crate::CaptureResult;

const FIRST_VIDEO_STREAM: u32 = MF_SOURCE_READER_FIRST_VIDEO_STREAM.0 as u32;

/// Sample timestamps are in 100ns units.
const TICKS_PER_SECOND: f64 = 10_000_000.0;

fn api_error(message: &str) -> CaptureError {
    CaptureError::WindowsApi {
        message: message.to_string(),
        source: None,
    }
}

/// Initialize COM for the current thread if not already initialized.
fn ensure_com_initialized() {
    // S_FALSE (already initialized) and RPC_E_CHANGED_MODE both leave COM usable.
    unsafe {
        let _ = CoInitializeEx(None, COINIT_MULTITHREADED);
    }
}

fn ensure_media_foundation() -> CaptureResult<()> {
    static STARTUP: OnceLock<Result<(), String>> = OnceLock::new();

    ensure_com_initialized();
    STARTUP
        .get_or_init(|| {
            unsafe { MFStartup(MF_VERSION, MFSTARTUP_NOSOCKET) }.map_err(|e| e.message().to_string())
        })
        .clone()
        .map_err(|message| CaptureError::WindowsApi {
            message,
            source: None,
        })
}

fn video_source_attributes(size: u32) -> CaptureResult<IMFAttributes> {
    let mut attributes: Option<IMFAttributes> = None;
    unsafe {
        MFCreateAttributes(&mut attributes, size)?;
    }
    let attributes = attributes.ok_or_else(|| api_error("MFCreateAttributes returned nothing"))?;
    unsafe {
        attributes.SetGUID(
            &MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE,
            &MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE_VIDCAP_GUID,
        )?;
    }
    Ok(attributes)
}

fn allocated_string(attributes: &IMFAttributes, key: &GUID) -> CaptureResult<String> {
    let mut value = PWSTR::null();
    let mut len = 0u32;
    unsafe {
        attributes.GetAllocatedString(key, &mut value, &mut len)?;
        let text = value.to_string().unwrap_or_default();
        CoTaskMemFree(Some(value.0 as *const _));
        Ok(text)
    }
}

/// Video capture devices through Media Foundation.
///
/// Device identifiers are the symbolic links Media Foundation reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct MediaFoundationBackend;

impl MediaFoundationBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for MediaFoundationBackend {
    fn name(&self) -> &'static str {
        "media-foundation"
    }

    #[instrument(name = "mf_enumerate", skip(self))]
    fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        ensure_media_foundation()?;
        let attributes = video_source_attributes(1)?;

        let mut sources: *mut Option<IMFActivate> = std::ptr::null_mut();
        let mut count = 0u32;
        unsafe {
            MFEnumDeviceSources(&attributes, &mut sources, &mut count)?;
        }
        if sources.is_null() {
            return Ok(Vec::new());
        }

        let activates: Vec<IMFActivate> = unsafe {
            let slots = std::slice::from_raw_parts_mut(sources, count as usize);
            let taken = slots.iter_mut().filter_map(Option::take).collect();
            CoTaskMemFree(Some(sources as *const _));
            taken
        };

        let mut devices = Vec::with_capacity(activates.len());
        for activate in &activates {
            let id = match allocated_string(activate, &MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE_VIDCAP_SYMBOLIC_LINK) {
                Ok(id) => id,
                Err(e) => {
                    debug!("Skipping device without symbolic link: {}", e);
                    continue;
                }
            };
            let name = allocated_string(activate, &MF_DEVSOURCE_ATTRIBUTE_FRIENDLY_NAME).unwrap_or_default();
            devices.push(DeviceDescriptor::new(name, id));
        }

        debug!(count = devices.len(), "Enumerated video capture devices");
        Ok(devices)
    }

    #[instrument(name = "mf_open_graph", skip(self))]
    fn open_graph(&self, device_id: &str) -> CaptureResult<Box<dyn FilterGraph>> {
        ensure_media_foundation()?;

        let attributes = video_source_attributes(2)?;
        let link = HSTRING::from(device_id);
        unsafe {
            attributes.SetString(&MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE_VIDCAP_SYMBOLIC_LINK, &link)?;
        }

        let source: IMFMediaSource = unsafe { MFCreateDeviceSource(&attributes) }.map_err(|e| {
            debug!("MFCreateDeviceSource failed: {}", e);
            CaptureError::DeviceNotFound(device_id.to_string())
        })?;

        let mut reader_attributes: Option<IMFAttributes> = None;
        unsafe {
            MFCreateAttributes(&mut reader_attributes, 1)?;
        }
        let reader_attributes =
            reader_attributes.ok_or_else(|| api_error("MFCreateAttributes returned nothing"))?;
        unsafe {
            // Lets the reader convert whatever the camera emits into RGB32.
            reader_attributes.SetUINT32(&MF_SOURCE_READER_ENABLE_VIDEO_PROCESSING, 1)?;
        }

        let reader = unsafe { MFCreateSourceReaderFromMediaSource(&source, &reader_attributes)? };

        Ok(Box::new(MediaFoundationGraph {
            source,
            reader,
            sink: None,
            pipeline: None,
        }))
    }
}

struct MediaFoundationGraph {
    source: IMFMediaSource,
    reader: IMFSourceReader,
    sink: Option<Arc<FrameSink>>,
    pipeline: Option<Pipeline>,
}

struct Pipeline {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

// SAFETY: Media Foundation objects are free-threaded, and the graph stops
// using the reader on its own thread once the pipeline thread is running.
struct SendReader(IMFSourceReader);
unsafe impl Send for SendReader {}

impl FilterGraph for MediaFoundationGraph {
    fn connect(&mut self, requested: PixelFormat) -> CaptureResult<FrameFormat> {
        let subtype = match requested {
            PixelFormat::Bgr32 => MFVideoFormat_RGB32,
        };

        let media_type: IMFMediaType = unsafe { MFCreateMediaType()? };
        unsafe {
            media_type.SetGUID(&MF_MT_MAJOR_TYPE, &MFMediaType_Video)?;
            media_type.SetGUID(&MF_MT_SUBTYPE, &subtype)?;
            self.reader
                .SetCurrentMediaType(FIRST_VIDEO_STREAM, None, &media_type)
                .map_err(|e| CaptureError::FormatNotSupported(format!("{requested:?}: {}", e.message())))?;
        }

        let current = unsafe { self.reader.GetCurrentMediaType(FIRST_VIDEO_STREAM)? };
        let size = unsafe { current.GetUINT64(&MF_MT_FRAME_SIZE)? };
        let stride = unsafe { current.GetUINT32(&MF_MT_DEFAULT_STRIDE) }.ok().map(|s| s as i32);

        let format = FrameFormat {
            width: (size >> 32) as u32,
            height: size as u32,
            pixel_format: requested,
            // Uncompressed RGB without an explicit stride follows the DIB
            // convention: bottom row first.
            bottom_up: stride.map_or(true, |s| s < 0),
        };
        debug!(?format, ?stride, "Source reader media type set");
        Ok(format)
    }

    fn set_callback(&mut self, sink: Arc<FrameSink>) -> CaptureResult<()> {
        self.sink = Some(sink);
        Ok(())
    }

    fn run(&mut self) -> CaptureResult<()> {
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| CaptureError::Pipeline("no callback registered".to_string()))?;

        let reader = SendReader(self.reader.clone());
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("mf-pipeline".to_string())
            .spawn(move || read_samples(reader, sink, flag))?;

        info!("Media Foundation pipeline running");
        self.pipeline = Some(Pipeline { running, thread });
        Ok(())
    }

    fn stop(&mut self) -> CaptureResult<()> {
        let Some(pipeline) = self.pipeline.take() else {
            self.sink = None;
            return Ok(());
        };
        pipeline.running.store(false, Ordering::SeqCst);

        // A synchronous ReadSample only returns with the next sample. Shutting
        // the source down releases it even when the camera has stalled.
        unsafe {
            if let Err(e) = self.source.Stop() {
                debug!("Media source stop failed: {}", e);
            }
            if let Err(e) = self.reader.Flush(FIRST_VIDEO_STREAM) {
                debug!("Source reader flush failed: {}", e);
            }
            if let Err(e) = self.source.Shutdown() {
                debug!("Media source shutdown failed: {}", e);
            }
        }

        pipeline
            .thread
            .join()
            .map_err(|_| CaptureError::Pipeline("pipeline thread panicked".to_string()))?;
        self.sink = None;
        Ok(())
    }
}

impl Drop for MediaFoundationGraph {
    fn drop(&mut self) {
        let _ = self.stop();
        unsafe {
            let _ = self.source.Shutdown();
        }
    }
}

fn read_samples(reader: SendReader, sink: Arc<FrameSink>, running: Arc<AtomicBool>) {
    ensure_com_initialized();
    let reader = reader.0;
    let stop_flags = (MF_SOURCE_READERF_ENDOFSTREAM.0 | MF_SOURCE_READERF_ERROR.0) as u32;

    while running.load(Ordering::SeqCst) {
        let mut flags = 0u32;
        let mut timestamp = 0i64;
        let mut sample: Option<IMFSample> = None;

        let result = unsafe {
            reader.ReadSample(
                FIRST_VIDEO_STREAM,
                0,
                None,
                Some(&mut flags),
                Some(&mut timestamp),
                Some(&mut sample),
            )
        };
        if let Err(e) = result {
            if running.load(Ordering::SeqCst) {
                warn!("Reading from capture device failed: {}", e);
                sink.pipeline_failed(format!("reading from the device failed: {}", e.message()));
            }
            break;
        }
        if flags & stop_flags != 0 {
            if running.load(Ordering::SeqCst) {
                warn!(flags, "Capture stream ended");
                sink.pipeline_failed("the device stopped streaming");
            }
            break;
        }

        // Stream ticks carry no sample.
        let Some(sample) = sample else {
            continue;
        };

        let sample_time = timestamp as f64 / TICKS_PER_SECOND;
        sink.sample_cb(sample_time);
        if let Err(e) = deliver(&sample, &sink, sample_time) {
            trace!("Dropped sample: {}", e);
        }
    }

    debug!("Media Foundation pipeline exiting");
}

fn deliver(sample: &IMFSample, sink: &FrameSink, sample_time: f64) -> windows::core::Result<()> {
    unsafe {
        let buffer = sample.ConvertToContiguousBuffer()?;
        let mut data = std::ptr::null_mut();
        let mut len = 0u32;
        buffer.Lock(&mut data, None, Some(&mut len))?;
        if !data.is_null() {
            sink.buffer_cb(sample_time, std::slice::from_raw_parts(data, len as usize));
        }
        buffer.Unlock()?;
    }
    Ok(())
}
