use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{PublisherError, Result};
use crate::message::Message;

/// Default number of pending messages the queue holds before producers block.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// How long a producer on a current-thread runtime parks between retries
/// while the queue is at capacity.
const FULL_QUEUE_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Producer half of the bounded hand-off queue. Cloned into every producer
/// thread; the single reactor thread holds the [`QueueReceiver`].
#[derive(Clone)]
pub struct MessageQueue {
    sender: mpsc::Sender<Message>,
}

/// Reactor half of the hand-off queue.
pub struct QueueReceiver {
    receiver: mpsc::Receiver<Message>,
}

/// Creates the bounded FIFO buffer shared between producers and the reactor.
pub fn bounded(capacity: usize) -> (MessageQueue, QueueReceiver) {
    let (sender, receiver) = mpsc::channel(capacity);
    (MessageQueue { sender }, QueueReceiver { receiver })
}

impl MessageQueue {
    /// Enqueues a message, blocking the calling thread while the queue is at
    /// capacity. Backpressure by design: producers slow down rather than
    /// overwhelm an unready or slow broker link.
    ///
    /// Callable from any execution context except the reactor thread itself:
    /// plain threads block in the channel, threads inside a tokio runtime
    /// block without tripping the runtime's blocking check.
    pub fn enqueue(&self, message: Message) -> Result<()> {
        match Handle::try_current() {
            // Plain thread: block right here until space frees.
            Err(_) => self
                .sender
                .blocking_send(message)
                .map_err(|_| PublisherError::QueueClosed),
            // Worker of a multi-thread runtime: hand the slot back to the
            // runtime before blocking, same backpressure otherwise.
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.sender.blocking_send(message))
                    .map_err(|_| PublisherError::QueueClosed)
            }
            // Current-thread runtime: `blocking_send` panics here, so park
            // between bounded send attempts instead. The runtime thread is
            // still blocked, which is what backpressure means.
            Ok(_) => {
                let mut message = message;
                loop {
                    match self.sender.try_send(message) {
                        Ok(()) => return Ok(()),
                        Err(mpsc::error::TrySendError::Full(returned)) => {
                            message = returned;
                            std::thread::sleep(FULL_QUEUE_RETRY_INTERVAL);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            return Err(PublisherError::QueueClosed)
                        }
                    }
                }
            }
        }
    }
}

impl QueueReceiver {
    /// Returns the next message in FIFO order, or `None` if the queue is
    /// currently empty. Never blocks the reactor thread.
    pub fn dequeue_non_blocking(&mut self) -> Option<Message> {
        match self.receiver.try_recv() {
            Ok(message) => Some(message),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                debug!("All queue senders dropped");
                None
            }
        }
    }
}
