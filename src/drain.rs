use chrono::Utc;
use lapin::{options::BasicPublishOptions, BasicProperties};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::error::PublisherError;
use crate::message::Message;
use crate::queue::QueueReceiver;

/// Default pause between drain ticks.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(300);

/// Drives publication from the hand-off queue into the channel at a fixed
/// cadence, one message per tick.
///
/// This is a level-triggered polling design: worst-case latency for a fresh
/// message is bounded by the tick interval, and outbound load is paced to one
/// message per tick. A tick that finds the channel not ready drops the
/// message with a log entry; there is no retry or requeue.
pub struct DrainScheduler {
    interval: Duration,
}

impl DrainScheduler {
    pub fn new(interval: Duration) -> Self {
        DrainScheduler { interval }
    }

    /// The reactor's main loop. Exits when the stopping flag is observed,
    /// after tearing the connection down on this thread.
    pub async fn run(
        &self,
        manager: &mut ConnectionManager,
        receiver: Arc<Mutex<QueueReceiver>>,
        stopping: Arc<AtomicBool>,
    ) {
        info!(interval_ms = self.interval.as_millis() as u64, "Drain loop started");
        loop {
            if stopping.load(Ordering::SeqCst) {
                manager.close().await;
                info!("Drain loop stopped");
                return;
            }
            if let Some(message) = Self::next_message(&receiver) {
                self.publish(manager, message).await;
            }
            sleep(self.interval).await;
        }
    }

    fn next_message(receiver: &Arc<Mutex<QueueReceiver>>) -> Option<Message> {
        // Only the reactor ever locks the receiver; the lock exists so the
        // facade can hand the receiver to a fresh reactor after a restart.
        let mut guard = match receiver.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.dequeue_non_blocking()
    }

    /// Publishes one message, or drops it if the channel is not ready.
    async fn publish(&self, manager: &mut ConnectionManager, message: Message) {
        let Some(channel) = manager.ready_channel().await else {
            warn!(key = %message.key, "Skipping message, channel not ready");
            return;
        };

        let exchange = manager.exchange_config();
        let routing_key = message.routing_key(exchange.routing_key_prefix.as_deref());
        debug!(%routing_key, payload_len = message.payload.len(), "Publishing message");

        let properties = BasicProperties::default()
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_timestamp(Utc::now().timestamp() as u64);

        let result = channel
            .basic_publish(
                &exchange.exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                properties,
            )
            .await
            .map_err(|e| PublisherError::Publish(e.to_string()));
        if let Err(e) = result {
            error!(error = %e, %routing_key, "Publishing error");
        }
    }
}
