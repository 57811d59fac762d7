//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use camview_capture::synthetic::{SyntheticBackend, SyntheticDevice};
use camview_capture::{default_backend, find_device, list_devices, Bitmap, CaptureBackend, DeviceHandle};
use camview_surface::DisplaySurface;

use crate::config::ViewerConfig;
use crate::PreviewArgs;

/// Interval between status lines while previewing.
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

fn backend(synthetic: bool) -> Arc<dyn CaptureBackend> {
    if synthetic {
        Arc::new(
            SyntheticBackend::new()
                .with_device(SyntheticDevice::new("synthetic-0", "Synthetic Camera"))
                .with_device(
                    SyntheticDevice::new("synthetic-1", "Synthetic Camera (bottom-up)")
                        .resolution(320, 240)
                        .bottom_up(true),
                ),
        )
    } else {
        default_backend()
    }
}

/// Print the available capture devices.
pub fn list(json: bool, synthetic: bool) -> Result<()> {
    let backend = backend(synthetic);
    let devices = list_devices(backend.as_ref());

    if json {
        let text = serde_json::to_string_pretty(&devices).context("Failed to encode device list")?;
        println!("{text}");
        return Ok(());
    }

    if devices.is_empty() {
        println!("No capture devices found ({})", backend.name());
        return Ok(());
    }

    for (index, device) in devices.iter().enumerate() {
        println!("{index}: {device}  [{}]", device.id);
    }
    Ok(())
}

fn open_device(backend: Arc<dyn CaptureBackend>, args: &PreviewArgs, config: &ViewerConfig) -> Result<DeviceHandle> {
    let descriptor = if let Some(id) = &args.device {
        find_device(backend.as_ref(), id).with_context(|| format!("No capture device with id {id}"))?
    } else if let Some(index) = args.index {
        let devices = list_devices(backend.as_ref());
        let count = devices.len();
        devices
            .into_iter()
            .nth(index)
            .with_context(|| format!("Device index {index} out of range ({count} devices)"))?
    } else {
        let Some(first) = list_devices(backend.as_ref()).into_iter().next() else {
            bail!("No capture devices found ({})", backend.name());
        };
        first
    };

    Ok(DeviceHandle::with_config(backend, descriptor, config.capture.clone()))
}

/// Run a headless preview of one device.
pub fn preview(args: PreviewArgs) -> Result<()> {
    let mut config = ViewerConfig::load(args.config.as_deref())?;
    if let Some(rotation) = args.rotate {
        config.surface.rotation = rotation;
    }
    if args.mirror {
        config.surface.mirror_stills = true;
    }

    let device = Arc::new(open_device(backend(args.synthetic), &args, &config)?);
    info!(
        device = %device.id(),
        name = %device.name(),
        rotation = config.surface.rotation.degrees(),
        mirror = config.surface.mirror_stills,
        "Opening device"
    );

    let surface = DisplaySurface::with_config(config.surface.clone());
    surface
        .set_device(Some(Arc::clone(&device)))
        .context("Failed to start capture")?;

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    while Instant::now() < deadline {
        thread::sleep(STATUS_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));

        if let Some(error) = surface.last_error() {
            warn!("Capture error: {}", error);
        }
        let (width, height) = surface
            .current_bitmap()
            .map(|b| (b.width(), b.height()))
            .unwrap_or_default();
        info!(
            fps = surface.framerate(),
            frames = surface.frames_rendered(),
            width,
            height,
            "Preview"
        );
    }

    let still = args
        .snapshot
        .as_ref()
        .map(|_| surface.capture_still().context("No frame to save"))
        .transpose();

    surface.set_device(None).context("Failed to stop capture")?;

    if let (Some(path), Some(still)) = (args.snapshot.as_deref(), still?) {
        save_png(&still, path)?;
        info!(path = %path.display(), "Snapshot saved");
    }
    Ok(())
}

fn save_png(bitmap: &Bitmap, path: &Path) -> Result<()> {
    let image = image::RgbaImage::from_raw(bitmap.width(), bitmap.height(), bitmap.to_rgba())
        .context("Bitmap size does not match its pixels")?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write {}", path.display()))
}
