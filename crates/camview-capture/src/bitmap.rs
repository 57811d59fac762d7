//! Displayable bitmaps backed by a frame buffer, and still copies of them.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use camview_ipc::{FrameFormat, Rotation, BYTES_PER_PIXEL};

use crate::frame::FrameReader;

/// A live bitmap over the reader half of a frame buffer.
///
/// Clones share the same memory. The pixels only change when
/// [`SharedBitmap::invalidate`] pulls in a newer frame.
#[derive(Clone)]
pub struct SharedBitmap {
    inner: Arc<BitmapInner>,
}

struct BitmapInner {
    format: FrameFormat,
    reader: Mutex<FrameReader>,
}

impl SharedBitmap {
    pub(crate) fn new(reader: FrameReader) -> Self {
        Self {
            inner: Arc::new(BitmapInner {
                format: reader.format(),
                reader: Mutex::new(reader),
            }),
        }
    }

    /// Negotiated format backing this bitmap.
    pub fn format(&self) -> FrameFormat {
        self.inner.format
    }

    pub fn width(&self) -> u32 {
        self.inner.format.width
    }

    pub fn height(&self) -> u32 {
        self.inner.format.height
    }

    /// Size of the backing frame in bytes.
    pub fn byte_len(&self) -> usize {
        self.inner.format.frame_len()
    }

    /// Re-read the frame buffer. Returns true when a newer frame was taken.
    pub fn invalidate(&self) -> bool {
        self.inner.reader.lock().refresh()
    }

    /// Sequence number of the frame currently shown.
    pub fn sequence(&self) -> u64 {
        self.inner.reader.lock().sequence()
    }

    /// Borrow the raw pixels as laid out by the source.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let reader = self.inner.reader.lock();
        f(reader.pixels())
    }

    /// Copy the current frame into a top-down still.
    pub fn snapshot(&self) -> Bitmap {
        let format = self.inner.format;
        self.with_pixels(|pixels| Bitmap::from_frame(format, pixels))
    }

    #[cfg(test)]
    pub(crate) fn downgrade(&self) -> std::sync::Weak<impl Sized> {
        Arc::downgrade(&self.inner)
    }
}

impl std::fmt::Debug for SharedBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBitmap")
            .field("format", &self.inner.format)
            .finish_non_exhaustive()
    }
}

/// A top-down BGRA still frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Bytes,
}

impl Bitmap {
    /// Wrap top-down BGRA pixels.
    ///
    /// Returns `None` when the pixel count does not match the dimensions.
    pub fn new(width: u32, height: u32, pixels: impl Into<Bytes>) -> Option<Self> {
        let pixels = pixels.into();
        if pixels.len() != width as usize * height as usize * BYTES_PER_PIXEL {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Copy a frame laid out per `format`, flipping bottom-up sources.
    pub fn from_frame(format: FrameFormat, frame: &[u8]) -> Self {
        let stride = format.stride();
        let height = format.height as usize;
        let mut pixels = vec![0u8; stride * height];

        for (row, dst) in pixels.chunks_exact_mut(stride.max(1)).enumerate() {
            let src_row = if format.bottom_up {
                height - 1 - row
            } else {
                row
            };
            let start = src_row * stride;
            if let Some(src) = frame.get(start..start + stride) {
                dst.copy_from_slice(src);
            }
        }

        Self {
            width: format.width,
            height: format.height,
            pixels: Bytes::from(pixels),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw BGRA bytes, top row first.
    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    /// BGRA value at column `x`, row `y`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.pixels[offset..offset + BYTES_PER_PIXEL]);
        Some(px)
    }

    /// Horizontal mirror: column `x` takes the source's column `width-1-x`.
    pub fn mirrored(&self) -> Self {
        let row_len = self.width as usize * BYTES_PER_PIXEL;
        let mut out = Vec::with_capacity(self.pixels.len());

        for row in self.pixels.chunks_exact(row_len.max(1)) {
            for px in row.chunks_exact(BYTES_PER_PIXEL).rev() {
                out.extend_from_slice(px);
            }
        }

        Self {
            width: self.width,
            height: self.height,
            pixels: Bytes::from(out),
        }
    }

    /// Rotate clockwise by a quarter-turn multiple.
    pub fn rotated(&self, rotation: Rotation) -> Self {
        if rotation == Rotation::None {
            return self.clone();
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let (out_w, out_h) = if rotation.swaps_axes() { (h, w) } else { (w, h) };
        let mut out = vec![0u8; self.pixels.len()];

        for y in 0..h {
            for x in 0..w {
                let (dx, dy) = match rotation {
                    Rotation::None => (x, y),
                    Rotation::Clockwise90 => (h - 1 - y, x),
                    Rotation::Half => (w - 1 - x, h - 1 - y),
                    Rotation::Clockwise270 => (y, w - 1 - x),
                };
                let src = (y * w + x) * BYTES_PER_PIXEL;
                let dst = (dy * out_w + dx) * BYTES_PER_PIXEL;
                out[dst..dst + BYTES_PER_PIXEL]
                    .copy_from_slice(&self.pixels[src..src + BYTES_PER_PIXEL]);
            }
        }

        Self {
            width: out_w as u32,
            height: out_h as u32,
            pixels: Bytes::from(out),
        }
    }

    /// Convert to opaque RGBA bytes.
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len());
        for px in self.pixels.chunks_exact(BYTES_PER_PIXEL) {
            out.extend_from_slice(&[px[2], px[1], px[0], 0xFF]);
        }
        out
    }
}
