//! The per-frame callback registered with a capture graph.

use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::frame::FrameWriter;

/// Channel capacity for frame notices (sink → worker).
pub const FRAME_NOTICE_CAPACITY: usize = 4;

/// Sent to the device worker after each frame is copied in.
#[derive(Debug, Clone, Copy)]
pub struct FrameNotice {
    /// Sequence number of the published frame.
    pub sequence: u64,

    /// When the copy finished.
    pub arrived: Instant,
}

/// The worker's ends of a sink's channels.
pub struct SinkReceivers {
    /// One notice per copied frame, coalesced while the worker lags.
    pub notices: Receiver<FrameNotice>,

    /// Why the pipeline stopped delivering frames on its own.
    pub failures: Receiver<String>,
}

/// Receives raw frames from the pipeline thread.
///
/// Frames that arrive before a frame buffer is attached are dropped.
pub struct FrameSink {
    target: Mutex<Option<FrameWriter>>,
    notices: Sender<FrameNotice>,
    failures: Sender<String>,
}

impl FrameSink {
    /// Create a sink and the receiving ends of its channels.
    pub fn new() -> (Self, SinkReceivers) {
        let (notices, notices_rx) = crossbeam_channel::bounded(FRAME_NOTICE_CAPACITY);
        let (failures, failures_rx) = crossbeam_channel::bounded(1);
        let sink = Self {
            target: Mutex::new(None),
            notices,
            failures,
        };
        let receivers = SinkReceivers {
            notices: notices_rx,
            failures: failures_rx,
        };
        (sink, receivers)
    }

    /// Start copying frames into `writer`.
    pub fn attach(&self, writer: FrameWriter) {
        *self.target.lock() = Some(writer);
    }

    /// Stop copying frames, releasing the writer.
    pub fn detach(&self) -> Option<FrameWriter> {
        self.target.lock().take()
    }

    /// Whether a frame buffer is attached.
    pub fn is_attached(&self) -> bool {
        self.target.lock().is_some()
    }

    /// Sample-level hook. Unused.
    pub fn sample_cb(&self, _sample_time: f64) {}

    /// Buffer-level hook, called with every decoded frame.
    pub fn buffer_cb(&self, sample_time: f64, buffer: &[u8]) {
        let mut target = self.target.lock();
        let Some(writer) = target.as_mut() else {
            return;
        };

        let (copied, sequence) = writer.write(buffer);
        drop(target);

        if copied != buffer.len() {
            trace!(
                copied,
                received = buffer.len(),
                sample_time,
                "Frame size differs from negotiated format"
            );
        }

        let notice = FrameNotice {
            sequence,
            arrived: Instant::now(),
        };

        // The frame itself is already in the buffer; a full channel means the
        // worker has a notice pending and will pick this frame up with it.
        match self.notices.try_send(notice) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!(sequence, "Frame notice coalesced"),
            Err(TrySendError::Disconnected(_)) => trace!(sequence, "Frame notice dropped"),
        }
    }

    /// Report that the pipeline stopped delivering frames without being
    /// asked to. Only the first report is kept.
    pub fn pipeline_failed(&self, message: impl Into<String>) {
        let message = message.into();
        if self.failures.try_send(message.clone()).is_err() {
            debug!("Pipeline failure not delivered: {}", message);
        }
    }
}
