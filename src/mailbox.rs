//! Module that contains the hand-off buffer between the receive loop and the send loop.

use crate::message::Message;
use tokio::sync::mpsc;

/// Number of outbound messages that can wait for the send loop.
pub const MAILBOX_CAPACITY: usize = 1;

/// Producer side of the mailbox, owned by the token and snapshot logic.
#[derive(Debug, Clone)]
pub struct MailboxSender(mpsc::Sender<Message>);

/// Consumer side of the mailbox, owned by the send loop.
#[derive(Debug)]
pub struct MailboxReceiver(mpsc::Receiver<Message>);

/// Error returned when the other side of the mailbox is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxClosed(pub Message);

/// Function that creates a mailbox holding at most `MAILBOX_CAPACITY` pending messages.
pub fn mailbox() -> (MailboxSender, MailboxReceiver) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    (MailboxSender(tx), MailboxReceiver(rx))
}

impl MailboxSender {
    /// Function that waits until the slot is free and then places `message` in it.
    pub async fn put(&self, message: Message) -> Result<(), MailboxClosed> {
        self.0.send(message).await.map_err(|e| MailboxClosed(e.0))
    }
}

impl MailboxReceiver {
    /// Function that waits for the next pending message. Returns `None` once every
    /// producer is dropped and the slot is empty.
    pub async fn take(&mut self) -> Option<Message> {
        self.0.recv().await
    }
}
