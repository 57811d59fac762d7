//! Device enumeration.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use camview_ipc::DeviceDescriptor;

use crate::backend::CaptureBackend;

/// List the capture devices present right now.
///
/// Enumeration failures are logged and reported as an empty list.
#[instrument(name = "list_devices", skip_all, fields(backend = backend.name()))]
pub fn list_devices(backend: &dyn CaptureBackend) -> Vec<DeviceDescriptor> {
    match backend.enumerate() {
        Ok(devices) => {
            debug!(count = devices.len(), "Enumerated capture devices");
            devices
        }
        Err(e) => {
            warn!("Device enumeration unavailable: {}", e);
            Vec::new()
        }
    }
}

/// Find a device by identifier.
pub fn find_device(backend: &dyn CaptureBackend, device_id: &str) -> Option<DeviceDescriptor> {
    list_devices(backend)
        .into_iter()
        .find(|d| d.id == device_id)
}

/// The native backend for this platform.
pub fn default_backend() -> Arc<dyn CaptureBackend> {
    #[cfg(windows)]
    {
        Arc::new(crate::mf::MediaFoundationBackend::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(crate::backend::UnavailableBackend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UnavailableBackend;
    use crate::synthetic::{SyntheticBackend, SyntheticDevice};

    #[test]
    fn test_unavailable_backend_lists_nothing() {
        assert!(list_devices(&UnavailableBackend).is_empty());
    }

    #[test]
    fn test_enumeration_order_is_kept() {
        let backend = SyntheticBackend::new()
            .with_device(SyntheticDevice::new("b-cam", "Zeta"))
            .with_device(SyntheticDevice::new("a-cam", "Alpha"));

        let ids: Vec<_> = list_devices(&backend).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["b-cam", "a-cam"]);
    }

    #[test]
    fn test_snapshot_is_not_cached() {
        let backend = SyntheticBackend::new();
        assert!(list_devices(&backend).is_empty());

        backend.add_device(SyntheticDevice::new("cam0", "Camera"));
        assert_eq!(list_devices(&backend).len(), 1);
        assert_eq!(find_device(&backend, "cam0").unwrap().name, "Camera");
        assert!(find_device(&backend, "cam1").is_none());
    }
}
