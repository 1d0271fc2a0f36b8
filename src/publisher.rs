use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{ConnectionConfig, ExchangeConfig};
use crate::connection::ConnectionManager;
use crate::drain::{DrainScheduler, DEFAULT_DRAIN_INTERVAL};
use crate::error::{PublisherError, Result};
use crate::message::Message;
use crate::queue::{self, MessageQueue, QueueReceiver, DEFAULT_QUEUE_CAPACITY};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Asynchronous publisher: producers enqueue from any thread, a dedicated
/// background reactor thread owns the broker connection and drains the queue.
///
/// `start`, `push` and `close` take `&self`, so any number of producer
/// threads can share one instance (behind an `Arc` if they need ownership).
/// A producer blocked in `push` under backpressure holds no lock and never
/// stalls the others or `close`.
///
/// The first `push` pays the connection-establishment latency, since the
/// reactor is started lazily.
pub struct Publisher {
    connection_config: ConnectionConfig,
    exchange_config: ExchangeConfig,
    queue: MessageQueue,
    receiver: Arc<Mutex<QueueReceiver>>,
    stopping: Arc<AtomicBool>,
    reactor: Mutex<Option<JoinHandle<()>>>,
    drain_interval: Duration,
    shutdown_timeout: Duration,
}

impl Publisher {
    pub fn new(connection_config: ConnectionConfig, exchange_config: ExchangeConfig) -> Self {
        let (queue, receiver) = queue::bounded(DEFAULT_QUEUE_CAPACITY);
        Publisher {
            connection_config,
            exchange_config,
            queue,
            receiver: Arc::new(Mutex::new(receiver)),
            stopping: Arc::new(AtomicBool::new(false)),
            reactor: Mutex::new(None),
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Overrides the pending-message capacity (default 10,000). Producers
    /// block in `push` while the queue is at capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        let (queue, receiver) = queue::bounded(capacity);
        self.queue = queue;
        self.receiver = Arc::new(Mutex::new(receiver));
        self
    }

    /// Overrides the drain cadence (default 300 ms). One message is published
    /// per tick, so this bounds both latency and outbound rate.
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    /// Overrides how long `close` waits for the reactor to exit (default 5 s).
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    fn reactor_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.reactor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn reactor_alive(&self) -> bool {
        self.reactor_slot()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Starts the background reactor thread. Safe to call when already
    /// started; a live reactor is left alone.
    pub fn start(&self) -> &Self {
        let mut slot = self.reactor_slot();
        if slot.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return self;
        }

        info!("Starting reactor thread");
        self.stopping.store(false, Ordering::SeqCst);
        let connection_config = self.connection_config.clone();
        let exchange_config = self.exchange_config.clone();
        let receiver = Arc::clone(&self.receiver);
        let stopping = Arc::clone(&self.stopping);
        let drain_interval = self.drain_interval;

        let spawned = thread::Builder::new()
            .name("rbmq-reactor".to_string())
            .spawn(move || {
                reactor_main(
                    connection_config,
                    exchange_config,
                    receiver,
                    stopping,
                    drain_interval,
                )
            });
        match spawned {
            Ok(handle) => *slot = Some(handle),
            Err(e) => error!(error = %e, "Failed to spawn reactor thread"),
        }
        self
    }

    /// Enqueues a message for asynchronous publication, starting the reactor
    /// first if it is not alive. Blocks only under sustained backpressure at
    /// queue capacity; the reactor lock is released before enqueueing, so a
    /// blocked producer never starves other producers or `close`.
    ///
    /// Broker-side failures never surface here; by the time publication is
    /// attempted this call has already returned.
    pub fn push(
        &self,
        key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        routing_key_prefix: Option<String>,
    ) -> Result<()> {
        self.start();
        self.queue
            .enqueue(Message::new(key, payload, routing_key_prefix))
    }

    /// Graceful shutdown: flags the reactor to stop (it tears down the
    /// channel and connection on its own thread), then joins it with a
    /// bounded wait. Idempotent; a second call is a no-op.
    pub fn close(&self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        let handle = self.reactor_slot().take();
        let Some(handle) = handle else {
            debug!("No reactor thread to join");
            return Ok(());
        };

        let deadline = Instant::now() + self.shutdown_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "Reactor thread did not stop in time, leaving it detached"
                );
                return Err(PublisherError::JoinTimeout(self.shutdown_timeout));
            }
            thread::sleep(Duration::from_millis(10));
        }
        if handle.join().is_err() {
            error!("Reactor thread panicked");
        }
        info!("Publisher closed");
        Ok(())
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        // A publisher dropped without close() must not leave the reactor
        // spinning; the flag stops it within one tick.
        self.stopping.store(true, Ordering::SeqCst);
    }
}

/// Reactor entry point: a current-thread tokio runtime owns the connection,
/// the channel and the drain loop, so all connection state stays single-owner.
fn reactor_main(
    connection_config: ConnectionConfig,
    exchange_config: ExchangeConfig,
    receiver: Arc<Mutex<QueueReceiver>>,
    stopping: Arc<AtomicBool>,
    drain_interval: Duration,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build reactor runtime");
            return;
        }
    };

    runtime.block_on(async {
        let mut manager = ConnectionManager::new(
            connection_config,
            exchange_config,
            Arc::clone(&stopping),
        );
        if let Err(e) = manager.dial().await {
            error!(error = %e, "Dial failed, abandoning reactor; call start() to retry");
            return;
        }
        DrainScheduler::new(drain_interval)
            .run(&mut manager, receiver, stopping)
            .await;
    });
}
