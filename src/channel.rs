//! The shared channel between reporters and the collector.

use crossbeam_channel::{Receiver, Sender};

use crate::event::Message;

/// An unbounded FIFO queue, fed by any number of reporters
/// and drained by at most one collector at a time.
#[derive(Clone, Debug)]
pub(crate) struct Channel {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
}

impl Channel {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    pub(crate) fn sender(&self) -> &Sender<Message> {
        &self.sender
    }

    pub(crate) fn receiver(&self) -> &Receiver<Message> {
        &self.receiver
    }

    /// Returns `true` if no messages are waiting to be collected.
    pub(crate) fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
