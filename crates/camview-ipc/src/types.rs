//! Common types used across the capture core and its consumers.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes per pixel of every frame the pipeline hands out.
pub const BYTES_PER_PIXEL: usize = 4;

/// A capture device as reported by enumeration.
///
/// Two descriptors are the same device when their identifiers match; the
/// display name plays no part in identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Human-readable device name (may be empty).
    pub name: String,

    /// Opaque OS device identifier.
    pub id: String,
}

impl DeviceDescriptor {
    /// Create a new descriptor.
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DeviceDescriptor {}

impl Hash for DeviceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Pixel layouts the pipeline can request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Uncompressed 32-bit RGB, stored as B, G, R, X bytes.
    #[default]
    Bgr32,
}

impl PixelFormat {
    /// Bits per pixel.
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Bgr32 => 32,
        }
    }
}

/// The format settled on by negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Pixel layout.
    pub pixel_format: PixelFormat,

    /// Whether the first row in memory is the bottom row of the image.
    pub bottom_up: bool,
}

impl FrameFormat {
    /// Create a top-down BGR32 format.
    pub fn bgr32(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::Bgr32,
            bottom_up: false,
        }
    }

    /// Bytes in one row.
    pub fn stride(&self) -> usize {
        self.width as usize * (self.pixel_format.bits_per_pixel() / 8) as usize
    }

    /// Bytes in one frame.
    pub fn frame_len(&self) -> usize {
        self.stride() * self.height as usize
    }

    /// Whether the format describes a usable frame.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Quarter-turn rotation applied to displayed frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Half,
    Clockwise270,
}

impl Rotation {
    /// Rotation angle in degrees.
    pub fn degrees(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Clockwise90 => 90,
            Self::Half => 180,
            Self::Clockwise270 => 270,
        }
    }

    /// Build a rotation from a multiple of 90 degrees (negative values turn
    /// counter-clockwise).
    pub fn from_degrees(degrees: i32) -> Result<Self, InvalidRotation> {
        if degrees % 90 != 0 {
            return Err(InvalidRotation(degrees.to_string()));
        }
        Ok(match degrees.rem_euclid(360) {
            0 => Self::None,
            90 => Self::Clockwise90,
            180 => Self::Half,
            _ => Self::Clockwise270,
        })
    }

    /// Whether the rotation swaps width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Clockwise90 | Self::Clockwise270)
    }
}

impl FromStr for Rotation {
    type Err = InvalidRotation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let degrees: i32 = s
            .trim()
            .parse()
            .map_err(|_| InvalidRotation(s.to_string()))?;
        Self::from_degrees(degrees)
    }
}

/// A rotation that is not a multiple of 90 degrees.
#[derive(Debug, Error)]
#[error("Rotation must be a multiple of 90 degrees, got {0}")]
pub struct InvalidRotation(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_descriptor_identity_is_id() {
        let a = DeviceDescriptor::new("Front camera", "usb#1");
        let b = DeviceDescriptor::new("Renamed", "usb#1");
        let c = DeviceDescriptor::new("Front camera", "usb#2");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_descriptor_display_falls_back_to_id() {
        assert_eq!(DeviceDescriptor::new("", "usb#7").to_string(), "usb#7");
        assert_eq!(DeviceDescriptor::new("Cam", "usb#7").to_string(), "Cam");
    }

    #[test]
    fn test_frame_len() {
        let format = FrameFormat::bgr32(640, 480);
        assert_eq!(format.stride(), 640 * 4);
        assert_eq!(format.frame_len(), 640 * 480 * 4);
        assert!(!format.is_empty());
        assert!(FrameFormat::bgr32(0, 480).is_empty());
    }

    #[test]
    fn test_rotation_parsing() {
        assert_eq!("90".parse::<Rotation>().unwrap(), Rotation::Clockwise90);
        assert_eq!("-90".parse::<Rotation>().unwrap(), Rotation::Clockwise270);
        assert_eq!("540".parse::<Rotation>().unwrap(), Rotation::Half);
        assert!("45".parse::<Rotation>().is_err());
        assert!("left".parse::<Rotation>().is_err());
    }
}
