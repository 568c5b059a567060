use crossbeam_channel::Sender;

use crate::{event::Message, Error, ProgressEvent, Transport};

/// Implementation of `Transport` feeding a collector's channel
/// from within the same process.
#[derive(Clone, Debug)]
pub(crate) struct ChannelTransport {
    /// The sending-half of the shared channel.
    pub(crate) sender: Sender<Message>,
}

impl From<Sender<Message>> for ChannelTransport {
    fn from(sender: Sender<Message>) -> Self {
        Self { sender }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, event: ProgressEvent) -> Result<(), Error> {
        self.sender
            .send(Message::Event(event))
            .map_err(|_| Error::Disconnected)
    }

    fn flush(&self) -> Result<(), Error> {
        // Nothing is buffered on this side of the channel.
        Ok(())
    }
}
