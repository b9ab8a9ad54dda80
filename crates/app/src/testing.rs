//! Spies shared by the unit tests of this crate.

use std::sync::Mutex;

use crate::ports::{BusPublisher, OutboundMessage, PublishError};

/// Records every published message.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingPublisher {
    /// Drain what was published so far.
    pub(crate) fn take(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl BusPublisher for RecordingPublisher {
    fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}
