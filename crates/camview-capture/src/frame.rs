//! Fixed-size frame storage shared between the frame sink and the bitmap.
//!
//! A frame buffer holds three frame-sized slots. The writer fills its own
//! back slot and swaps it with the shared middle slot; the reader swaps the
//! middle slot into its own front slot when a fresh frame is waiting. Only
//! the swap happens under the lock, so the writer never waits on a copy and
//! the reader never sees a half-written frame.

use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;

use camview_ipc::FrameFormat;

struct Slot {
    pixels: Box<[u8]>,
    sequence: u64,
}

impl Slot {
    fn new(len: usize) -> Self {
        Self {
            pixels: vec![0u8; len].into_boxed_slice(),
            sequence: 0,
        }
    }
}

struct Middle {
    slot: Slot,
    // Set while the middle slot holds a frame the reader has not taken.
    fresh: bool,
}

struct Shared {
    format: FrameFormat,
    middle: Mutex<Middle>,
}

/// Allocate a frame buffer for the given format.
///
/// Each slot is exactly `format.frame_len()` bytes.
pub fn frame_buffer(format: FrameFormat) -> (FrameWriter, FrameReader) {
    let len = format.frame_len();
    let shared = Arc::new(Shared {
        format,
        middle: Mutex::new(Middle {
            slot: Slot::new(len),
            fresh: false,
        }),
    });

    let writer = FrameWriter {
        shared: Arc::clone(&shared),
        back: Slot::new(len),
        published: 0,
    };
    let reader = FrameReader {
        shared,
        front: Slot::new(len),
    };
    (writer, reader)
}

/// Producer half of a frame buffer.
pub struct FrameWriter {
    shared: Arc<Shared>,
    back: Slot,
    published: u64,
}

impl FrameWriter {
    /// Format the buffer was sized for.
    pub fn format(&self) -> FrameFormat {
        self.shared.format
    }

    /// Size of one frame in bytes.
    pub fn len(&self) -> usize {
        self.back.pixels.len()
    }

    /// Whether the buffer holds zero-sized frames.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy a frame in and publish it, returning the number of bytes copied
    /// and the sequence number of the published frame.
    ///
    /// Sources longer than the buffer are truncated; shorter sources leave
    /// the tail of the slot untouched.
    pub fn write(&mut self, src: &[u8]) -> (usize, u64) {
        let n = src.len().min(self.back.pixels.len());
        self.back.pixels[..n].copy_from_slice(&src[..n]);

        self.published += 1;
        self.back.sequence = self.published;

        let mut middle = self.shared.middle.lock();
        mem::swap(&mut middle.slot, &mut self.back);
        middle.fresh = true;
        (n, self.published)
    }
}

/// Consumer half of a frame buffer.
pub struct FrameReader {
    shared: Arc<Shared>,
    front: Slot,
}

impl FrameReader {
    /// Format the buffer was sized for.
    pub fn format(&self) -> FrameFormat {
        self.shared.format
    }

    /// Size of one frame in bytes.
    pub fn len(&self) -> usize {
        self.front.pixels.len()
    }

    /// Whether the buffer holds zero-sized frames.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence number of the front frame (0 before the first refresh).
    pub fn sequence(&self) -> u64 {
        self.front.sequence
    }

    /// Take the newest published frame, if one arrived since the last call.
    pub fn refresh(&mut self) -> bool {
        let mut middle = self.shared.middle.lock();
        if !middle.fresh {
            return false;
        }
        mem::swap(&mut middle.slot, &mut self.front);
        middle.fresh = false;
        true
    }

    /// The current front frame.
    pub fn pixels(&self) -> &[u8] {
        &self.front.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_sized_for_format() {
        let (writer, reader) = frame_buffer(FrameFormat::bgr32(640, 480));
        assert_eq!(writer.len(), 640 * 480 * 4);
        assert_eq!(reader.len(), 640 * 480 * 4);
        assert_eq!(reader.pixels().len(), 640 * 480 * 4);
    }

    #[test]
    fn test_refresh_without_write_keeps_front() {
        let (_writer, mut reader) = frame_buffer(FrameFormat::bgr32(2, 2));
        assert!(!reader.refresh());
        assert!(reader.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reader_sees_newest_frame() {
        let (mut writer, mut reader) = frame_buffer(FrameFormat::bgr32(2, 1));

        writer.write(&[1; 8]);
        writer.write(&[2; 8]);
        let (_, sequence) = writer.write(&[3; 8]);

        assert!(reader.refresh());
        assert_eq!(reader.pixels(), &[3; 8]);
        assert_eq!(reader.sequence(), sequence);
        assert!(!reader.refresh());
        assert_eq!(reader.pixels(), &[3; 8]);
    }

    #[test]
    fn test_write_truncates_long_source() {
        let (mut writer, mut reader) = frame_buffer(FrameFormat::bgr32(1, 1));

        let (copied, _) = writer.write(&[9; 16]);
        assert_eq!(copied, 4);
        assert!(reader.refresh());
        assert_eq!(reader.pixels(), &[9; 4]);
    }

    #[test]
    fn test_concurrent_frames_are_never_torn() {
        let (mut writer, mut reader) = frame_buffer(FrameFormat::bgr32(64, 64));
        let len = writer.len();

        let producer = std::thread::spawn(move || {
            for i in 0..2_000u32 {
                writer.write(&vec![(i % 251) as u8; len]);
            }
        });

        let mut seen = 0;
        loop {
            let done = producer.is_finished();
            if reader.refresh() {
                let first = reader.pixels()[0];
                assert!(reader.pixels().iter().all(|&b| b == first));
                seen += 1;
            }
            if done {
                break;
            }
        }
        producer.join().unwrap();
        assert!(seen > 0);
        assert_eq!(reader.pixels()[0], (1_999 % 251) as u8);
    }
}
