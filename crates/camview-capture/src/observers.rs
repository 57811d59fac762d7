//! Fan-out of device events to subscribers.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::trace;

use camview_ipc::DeviceEvent;

/// Registered event listeners.
///
/// Each subscriber owns a bounded channel. A full channel drops the event
/// for that subscriber only; a dropped receiver unsubscribes.
pub(crate) struct Observers {
    subscribers: Mutex<Vec<Sender<DeviceEvent>>>,
    capacity: usize,
}

impl Observers {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<DeviceEvent> {
        let (tx, rx) = camview_ipc::event_channel(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn notify(&self, event: DeviceEvent) {
        self.subscribers.lock().retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!(?event, "Subscriber lagging, event dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.subscribers.lock().len()
    }
}
