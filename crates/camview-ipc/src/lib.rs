//! Typed values shared between the camview capture core and its consumers.
//!
//! This crate defines the device descriptors, frame formats, events and
//! configuration passed between the capture pipeline and whatever displays
//! its frames.

mod config;
mod events;
mod types;

pub use config::{CaptureConfig, SurfaceConfig};
pub use events::DeviceEvent;
pub use types::{
    DeviceDescriptor, FrameFormat, InvalidRotation, PixelFormat, Rotation, BYTES_PER_PIXEL,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for device events (capture core → consumer).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel(capacity: usize) -> (Sender<DeviceEvent>, Receiver<DeviceEvent>) {
    crossbeam_channel::bounded(capacity)
}
